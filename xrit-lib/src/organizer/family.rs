use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Result;

const FAMILIESDB: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/src/organizer/families.json"
));

/// Fixed image slot of a [GroupData](super::GroupData).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Slot {
    Visible,
    Infrared,
    WaterVapour,
}

/// Per-satellite defaults and channel routing for organizing image segments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Family {
    pub name: String,
    /// NOAA product id of the family's image products.
    pub product_id: u16,
    #[serde(default)]
    pub satellite: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub longitude: Option<f32>,
    /// Use the NOAA subproduct id as the channel number when the ancillary text
    /// does not provide one.
    #[serde(default)]
    pub channel_from_subproduct: bool,
    #[serde(default)]
    pub crop: bool,
    /// Channel number to slot. When empty the table-wide defaults apply.
    #[serde(default)]
    pub slots: BTreeMap<u16, Slot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FamilyDB {
    #[serde(default)]
    default_slots: BTreeMap<u16, Slot>,
    families: Vec<Family>,
}

/// Satellite family table.
///
/// The default implementation uses a table embedded at compile-time. To use a
/// custom table, or to add families to the built-in one, use [Families::with_file].
#[derive(Debug, Clone, PartialEq)]
pub struct Families {
    db: FamilyDB,
}

impl Default for Families {
    fn default() -> Self {
        let db: FamilyDB =
            serde_json::from_str(FAMILIESDB).expect("built-in family db is not valid");
        Self { db }
    }
}

impl Families {
    /// Load families from a JSON file.
    ///
    /// If `built_in` the built-in families are added for any product id the file does
    /// not define, and the built-in default slots are used if the file has none.
    ///
    /// # Errors
    /// If the file cannot be read or is not a valid family table.
    pub fn with_file<P: AsRef<Path>>(path: P, built_in: bool) -> Result<Families> {
        let mut db: FamilyDB = serde_json::from_reader(File::open(path)?)?;
        let file_ids: HashSet<u16> = db.families.iter().map(|f| f.product_id).collect();

        if built_in {
            let builtin = Families::default().db;
            if db.default_slots.is_empty() {
                db.default_slots = builtin.default_slots;
            }
            for family in builtin.families {
                // file entries win
                if file_ids.contains(&family.product_id) {
                    continue;
                }
                db.families.push(family);
            }
        }

        Ok(Self { db })
    }

    #[must_use]
    pub fn all(&self) -> &[Family] {
        &self.db.families
    }

    /// Slots used for products without a family, or by families without their own.
    #[must_use]
    pub fn default_slots(&self) -> &BTreeMap<u16, Slot> {
        &self.db.default_slots
    }

    #[must_use]
    pub fn lookup(&self, product_id: u16) -> Option<&Family> {
        self.db.families.iter().find(|f| f.product_id == product_id)
    }

    /// Resolve the slot for `channel` of a product.
    #[must_use]
    pub fn slot(&self, family: Option<&Family>, channel: u16) -> Option<Slot> {
        let slots = match family {
            Some(family) if !family.slots.is_empty() => &family.slots,
            _ => &self.db.default_slots,
        };
        slots.get(&channel).copied()
    }
}
