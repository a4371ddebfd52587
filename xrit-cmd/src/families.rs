use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use xrit::organizer::{Family, Slot};
use xrit::Families;

use crate::render::{self, Format};

#[derive(Debug, Serialize)]
struct Table {
    default_slots: Vec<(u16, Slot)>,
    families: Vec<Family>,
}

pub fn families(path: Option<&Path>, format: &Format) -> Result<()> {
    let families = match path {
        Some(path) => Families::with_file(path, true)
            .with_context(|| format!("loading families from {path:?}"))?,
        None => Families::default(),
    };

    let table = Table {
        default_slots: families
            .default_slots()
            .iter()
            .map(|(channel, slot)| (*channel, *slot))
            .collect(),
        families: families.all().to_vec(),
    };

    render::write(&table, format, TEXT_TEMPLATE)
}

const TEXT_TEMPLATE: &str = r"Default slots: {{ #each default_slots }}{{ this.[0] }}={{ this.[1] }}{{ #if @last }}{{ else }}, {{ /if }}{{ /each }}
-----------------------------------------------------------------------------------------------
Name        Product  Satellite     Region        Longitude  Slots
-----------------------------------------------------------------------------------------------
{{ #each families }}{{ lpad 10 name }}  {{ lpad 7 productId }}  {{ lpad 12 satellite }}  {{ lpad 12 region }}  {{ lpad 9 longitude }}  {{ #each slots }}{{ @key }}={{ this }}{{ #if @last }}{{ else }}, {{ /if }}{{ /each }}
{{ /each }}";
