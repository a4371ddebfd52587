use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Slot;

/// Segments of one channel of a group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSlot {
    pub segments: BTreeMap<u16, PathBuf>,
    /// Expected number of segments, zero until the first segment is seen.
    pub max_segments: u16,
    pub first_segment: Option<u16>,
    pub columns: u16,
    /// Total lines of all segments received.
    pub lines: u32,
    pub pixel_aspect: f32,
    pub column_offset: i32,
    pub line_offset: i32,
    pub processed: bool,
}

/// Geometry of a segment being added to a slot.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SegmentGeometry {
    pub columns: u16,
    pub lines: u16,
    pub pixel_aspect: f32,
    pub column_offset: i32,
    pub line_offset: i32,
    pub max_segments: u16,
}

impl ChannelSlot {
    /// Record a segment. Geometry and the segment count are latched from the first
    /// segment; later segments only contribute lines.
    pub fn add_segment(&mut self, index: u16, path: PathBuf, geometry: &SegmentGeometry) {
        if self.segments.is_empty() && self.max_segments == 0 {
            self.columns = geometry.columns;
            self.lines = u32::from(geometry.lines);
            self.pixel_aspect = geometry.pixel_aspect;
            self.column_offset = geometry.column_offset;
            self.line_offset = geometry.line_offset;
            self.max_segments = geometry.max_segments.max(1);
        } else if !self.segments.contains_key(&index) {
            self.lines += u32::from(geometry.lines);
        }
        self.segments.insert(index, path);
        self.first_segment = Some(self.first_segment.map_or(index, |first| first.min(index)));
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.segments.len() == usize::from(self.max_segments)
    }

    /// Slot expects segments, i.e., its channel has been seen.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.max_segments != 0
    }

    fn force_complete(&mut self) {
        self.processed = true;
        self.segments.clear();
    }
}

/// Navigation latched from a group's first segment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Navigation {
    pub column_offset: i32,
    pub line_offset: i32,
    pub column_scaling: i32,
    pub line_scaling: i32,
}

/// Segments belonging to one logical product, e.g., one imaging pass over all
/// channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupData {
    pub key: i64,
    pub satellite: String,
    pub region: String,
    pub longitude: Option<f32>,
    pub frame_time: Option<DateTime<Utc>>,
    pub navigation: Option<Navigation>,
    pub crop: bool,
    pub created_at: DateTime<Utc>,
    pub visible: ChannelSlot,
    pub infrared: ChannelSlot,
    pub water_vapour: ChannelSlot,
    pub other: BTreeMap<String, ChannelSlot>,
}

impl GroupData {
    #[must_use]
    pub fn new(key: i64, created_at: DateTime<Utc>) -> Self {
        GroupData {
            key,
            satellite: String::from("Unknown"),
            region: String::from("Unknown"),
            longitude: None,
            frame_time: None,
            navigation: None,
            crop: false,
            created_at,
            visible: ChannelSlot::default(),
            infrared: ChannelSlot::default(),
            water_vapour: ChannelSlot::default(),
            other: BTreeMap::default(),
        }
    }

    #[must_use]
    pub fn slot(&self, slot: Slot) -> &ChannelSlot {
        match slot {
            Slot::Visible => &self.visible,
            Slot::Infrared => &self.infrared,
            Slot::WaterVapour => &self.water_vapour,
        }
    }

    pub fn slot_mut(&mut self, slot: Slot) -> &mut ChannelSlot {
        match slot {
            Slot::Visible => &mut self.visible,
            Slot::Infrared => &mut self.infrared,
            Slot::WaterVapour => &mut self.water_vapour,
        }
    }

    fn slots(&self) -> impl Iterator<Item = &ChannelSlot> {
        [&self.visible, &self.infrared, &self.water_vapour]
            .into_iter()
            .chain(self.other.values())
    }

    /// Every slot that has been seen has all of its segments.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.slots()
            .filter(|s| s.is_active())
            .all(ChannelSlot::is_complete)
    }

    /// Every slot that has been seen has been processed.
    #[must_use]
    pub fn is_processed(&self) -> bool {
        self.slots()
            .filter(|s| s.is_active())
            .all(|s| s.processed)
    }

    fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.created_at).to_std().unwrap_or_default()
    }

    /// The group has existed long enough for late channels of the same time to have
    /// arrived.
    #[must_use]
    pub fn ready_to_mark(&self, now: DateTime<Utc>, dwell: Duration) -> bool {
        self.age(now) > dwell
    }

    #[must_use]
    pub fn timed_out(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.age(now) > timeout
    }

    /// Mark every slot processed and drop any remaining segments.
    pub fn force_complete(&mut self) {
        self.visible.force_complete();
        self.infrared.force_complete();
        self.water_vapour.force_complete();
        for slot in self.other.values_mut() {
            slot.force_complete();
        }
    }
}
