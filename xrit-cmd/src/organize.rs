use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use xrit::organizer::ChannelSlot;
use xrit::{Families, GroupData, Organizer, OrganizerConfig};

use crate::render::{self, Format};

#[derive(Debug, Serialize)]
struct SlotSummary {
    name: String,
    segments: usize,
    max_segments: u16,
    complete: bool,
    files: Vec<String>,
}

impl SlotSummary {
    fn new(name: &str, slot: &ChannelSlot) -> Self {
        SlotSummary {
            name: name.to_string(),
            segments: slot.segments.len(),
            max_segments: slot.max_segments,
            complete: slot.is_complete(),
            files: slot
                .segments
                .values()
                .map(|p| p.to_string_lossy().to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
struct GroupSummary {
    key: i64,
    satellite: String,
    region: String,
    frame_time: Option<DateTime<Utc>>,
    complete: bool,
    slots: Vec<SlotSummary>,
}

impl From<&GroupData> for GroupSummary {
    fn from(group: &GroupData) -> Self {
        let mut slots = vec![
            SlotSummary::new("visible", &group.visible),
            SlotSummary::new("infrared", &group.infrared),
            SlotSummary::new("water vapour", &group.water_vapour),
        ];
        slots.extend(
            group
                .other
                .iter()
                .map(|(name, slot)| SlotSummary::new(name, slot)),
        );
        slots.retain(|s| s.max_segments != 0);

        GroupSummary {
            key: group.key,
            satellite: group.satellite.clone(),
            region: group.region.clone(),
            frame_time: group.frame_time,
            complete: group.is_complete(),
            slots,
        }
    }
}

#[derive(Debug, Serialize)]
struct Summary {
    folder: String,
    files: usize,
    groups: Vec<GroupSummary>,
}

pub fn organize(folder: &Path, families: Option<&Path>, format: &Format) -> Result<()> {
    let families = match families {
        Some(path) => Families::with_file(path, true)
            .with_context(|| format!("loading families from {path:?}"))?,
        None => Families::default(),
    };
    let mut organizer = Organizer::new(
        OrganizerConfig::builder()
            .folder(folder)
            .families(families)
            .build(),
    );

    let files = organizer
        .poll()
        .with_context(|| format!("scanning {folder:?}"))?;
    info!("organized {files} files into {} groups", organizer.groups().len());

    let summary = Summary {
        folder: folder.to_string_lossy().to_string(),
        files,
        groups: organizer.groups().values().map(GroupSummary::from).collect(),
    };

    render::write(&summary, format, TEXT_TEMPLATE)
}

const TEXT_TEMPLATE: &str = r"{{ folder }}: {{ files }} files
===============================================================================================
{{ #each groups }}{{ key }} {{ satellite }} {{ region }} {{ frame_time }}{{ #if complete }} (complete){{ /if }}
{{ #each slots }}  {{ lpad 24 name }}  {{ segments }}/{{ max_segments }}
{{ /each }}{{ /each }}";
