//! Grouping of finished image segment files into multi-channel products.
//!
//! The [Organizer] is polled periodically. Each poll scans a folder for new product
//! files, reads their headers and files every segment into the [GroupData] for its
//! frame time. Consumers pick up complete groups, or groups that have exceeded the
//! hard timeout, and remove them when done.
mod family;
mod group;
mod timestamp;

pub use family::*;
pub use group::*;
pub use timestamp::*;

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Utc};
use tracing::{debug, info, warn};
use typed_builder::TypedBuilder;

use crate::product::{HeaderParser, ProductHeader, XritHeaderParser};
use crate::{Error, Result};

/// Minimum group age before a complete group is considered final.
pub const DEFAULT_GROUP_DWELL: Duration = Duration::from_secs(60);
/// Group age after which it is force-completed.
pub const DEFAULT_GROUP_TIMEOUT: Duration = Duration::from_secs(20 * 60);
/// Channel used when neither the ancillary text nor the family provides one.
pub const UNKNOWN_CHANNEL: u16 = 99;

/// Frame times before this year come from devices with known timestamp bugs.
const SANE_YEAR: i32 = 2005;

#[derive(TypedBuilder, Clone)]
pub struct OrganizerConfig {
    /// Folder containing finished product files.
    #[builder(setter(into))]
    pub folder: PathBuf,
    /// Only files ending in this suffix are considered.
    #[builder(default = String::from(".lrit"), setter(into))]
    pub suffix: String,
    #[builder(default = DEFAULT_GROUP_DWELL)]
    pub dwell: Duration,
    #[builder(default = DEFAULT_GROUP_TIMEOUT)]
    pub timeout: Duration,
    #[builder(default)]
    pub families: Families,
    #[builder(default = Arc::new(XritHeaderParser))]
    pub parser: Arc<dyn HeaderParser>,
}

/// What a segment file contributes to a group.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentInfo {
    pub satellite: String,
    pub region: String,
    pub channel: u16,
    pub segment: u16,
    pub image_id: u16,
    pub frame_time: DateTime<Utc>,
    pub key: i64,
}

impl SegmentInfo {
    /// Derive segment info from ancillary text, falling back to family defaults.
    /// `fallback_time` is used when the header carries no usable time.
    #[must_use]
    pub fn describe(
        families: &Families,
        path: &Path,
        header: &ProductHeader,
        fallback_time: DateTime<Utc>,
    ) -> Self {
        let empty = BTreeMap::default();
        let ancillary = header.ancillary.as_ref().unwrap_or(&empty);
        let family = header.product_id().and_then(|id| families.lookup(id));

        let satellite = ancillary
            .get("Satellite")
            .cloned()
            .or_else(|| family.and_then(|f| f.satellite.clone()))
            .unwrap_or_else(|| String::from("Unknown"));
        let region = ancillary
            .get("Region")
            .cloned()
            .or_else(|| family.and_then(|f| f.region.clone()))
            .unwrap_or_else(|| String::from("Unknown"));
        let channel = ancillary
            .get("Channel")
            .and_then(|c| c.parse().ok())
            .or_else(|| {
                family
                    .filter(|f| f.channel_from_subproduct)
                    .and_then(|_| header.subproduct_id())
            })
            .unwrap_or(UNKNOWN_CHANNEL);

        let mut frame_time = match ancillary.get("Time of frame start") {
            Some(s) => parse_frame_time(s).or_else(|| {
                warn!(path = ?path, value = %s, "invalid frame start time");
                None
            }),
            None => None,
        }
        .or(header.timestamp)
        .unwrap_or(fallback_time);

        let segment = header.segment.map_or(0, |s| s.sequence);
        let image_id = header.segment.map_or(0, |s| s.image_id);
        let mut key = frame_time.timestamp();

        if frame_time.year() < SANE_YEAR {
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default();
            if name.contains("OR_ABI") {
                key = i64::from(image_id);
            } else if name.contains("IMG_DK") {
                if let Some(t) = parse_himawari_filename(name) {
                    frame_time = t;
                    key = t.timestamp();
                }
            }
        }

        SegmentInfo {
            satellite,
            region,
            channel,
            segment,
            image_id,
            frame_time,
            key,
        }
    }
}

fn geometry(header: &ProductHeader) -> SegmentGeometry {
    let navigation = header.navigation.as_ref();
    SegmentGeometry {
        columns: header.image_structure.map_or(0, |s| s.columns),
        lines: header.image_structure.map_or(0, |s| s.lines),
        pixel_aspect: navigation
            .filter(|n| n.line_scaling != 0)
            .map_or(1.0, |n| n.column_scaling as f32 / n.line_scaling as f32),
        column_offset: navigation.map_or(0, |n| n.column_offset),
        line_offset: navigation.map_or(0, |n| n.line_offset),
        max_segments: header.segment.map_or(1, |s| s.max_segments),
    }
}

fn other_key(key: i64, header: &ProductHeader) -> String {
    format!(
        "{}-{}-{}",
        key.rem_euclid(1000),
        header.product_id().unwrap_or_default(),
        header.subproduct_name()
    )
}

/// Files image segments into groups.
pub struct Organizer {
    config: OrganizerConfig,
    groups: BTreeMap<i64, GroupData>,
    processed: HashSet<PathBuf>,
}

impl Organizer {
    #[must_use]
    pub fn new(config: OrganizerConfig) -> Self {
        Organizer {
            config,
            groups: BTreeMap::default(),
            processed: HashSet::default(),
        }
    }

    #[must_use]
    pub fn groups(&self) -> &BTreeMap<i64, GroupData> {
        &self.groups
    }

    #[must_use]
    pub fn group(&self, key: i64) -> Option<&GroupData> {
        self.groups.get(&key)
    }

    /// Mutable access to a group, e.g., to mark slots processed once consumed.
    pub fn group_mut(&mut self, key: i64) -> Option<&mut GroupData> {
        self.groups.get_mut(&key)
    }

    #[must_use]
    pub fn is_processed<P: AsRef<Path>>(&self, path: P) -> bool {
        self.processed.contains(path.as_ref())
    }

    /// Scan the folder for files not yet processed and file them into groups,
    /// returning the number of files processed.
    ///
    /// Files whose header cannot be parsed are logged and not looked at again while
    /// they remain in the folder. Files that cannot be read are retried on the next
    /// poll.
    ///
    /// # Errors
    /// If the folder cannot be listed.
    pub fn poll(&mut self) -> Result<usize> {
        let listed: HashSet<PathBuf> = fs::read_dir(&self.config.folder)?
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry.path()),
                Err(err) => {
                    warn!(folder = ?self.config.folder, "failed to read folder entry: {err}");
                    None
                }
            })
            .filter(|path| {
                path.is_file()
                    && path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.ends_with(&self.config.suffix))
            })
            .collect();

        // Forget files that are gone so a new file at the same path is picked up.
        self.processed.retain(|path| listed.contains(path));

        let mut files: Vec<PathBuf> = listed
            .into_iter()
            .filter(|path| !self.processed.contains(path))
            .collect();
        files.sort();

        let now = Utc::now();
        let mut count = 0;
        for path in files {
            match self.process_file(&path, now) {
                Ok(()) => {
                    self.processed.insert(path);
                    count += 1;
                }
                Err(Error::Io(err)) => {
                    warn!(path = ?path, "failed to read segment, will retry: {err}");
                }
                Err(err) => {
                    warn!(path = ?path, "skipping segment: {err}");
                    self.processed.insert(path);
                }
            }
        }
        if count > 0 {
            debug!(count, groups = self.groups.len(), "poll complete");
        }
        Ok(count)
    }

    fn process_file(&mut self, path: &Path, now: DateTime<Utc>) -> Result<()> {
        let dat = fs::read(path)?;
        let header = self.config.parser.parse(&dat)?;
        let mtime: DateTime<Utc> = fs::metadata(path)?.modified()?.into();
        let info = SegmentInfo::describe(&self.config.families, path, &header, mtime);
        self.add_segment(path, &header, &info, now);
        Ok(())
    }

    /// File a segment into its group, creating the group if needed.
    pub fn add_segment(
        &mut self,
        path: &Path,
        header: &ProductHeader,
        info: &SegmentInfo,
        now: DateTime<Utc>,
    ) {
        let family = header
            .product_id()
            .and_then(|id| self.config.families.lookup(id));
        let group = self.groups.entry(info.key).or_insert_with(|| {
            info!(key = info.key, satellite = %info.satellite, region = %info.region, "new group");
            let mut group = GroupData::new(info.key, now);
            group.satellite.clone_from(&info.satellite);
            group.region.clone_from(&info.region);
            group.frame_time = Some(info.frame_time);
            group
        });

        if info.segment == 0 {
            if group.longitude.is_none() {
                group.longitude = family.and_then(|f| f.longitude);
                group.crop = family.is_some_and(|f| f.crop);
            }
            if group.navigation.is_none() {
                group.navigation = header
                    .navigation
                    .as_ref()
                    .filter(|n| n.column_scaling != 0 && n.line_scaling != 0)
                    .map(|n| Navigation {
                        column_offset: n.column_offset,
                        line_offset: n.line_offset,
                        column_scaling: n.column_scaling,
                        line_scaling: n.line_scaling,
                    });
            }
        }

        let slot = match self.config.families.slot(family, info.channel) {
            Some(slot) => group.slot_mut(slot),
            None => group.other.entry(other_key(info.key, header)).or_default(),
        };
        slot.add_segment(info.segment, path.to_path_buf(), &geometry(header));
        debug!(
            key = info.key,
            channel = info.channel,
            segment = info.segment,
            path = ?path,
            "added segment"
        );
    }

    /// Keys of groups that are complete and old enough to be final.
    #[must_use]
    pub fn ready(&self, now: DateTime<Utc>) -> Vec<i64> {
        self.groups
            .values()
            .filter(|g| !g.is_processed() && g.is_complete() && g.ready_to_mark(now, self.config.dwell))
            .map(|g| g.key)
            .collect()
    }

    /// Force-complete every group that has exceeded the hard timeout, returning their
    /// keys.
    pub fn expire(&mut self, now: DateTime<Utc>) -> Vec<i64> {
        let mut expired = Vec::default();
        for group in self.groups.values_mut() {
            if !group.is_processed() && group.timed_out(now, self.config.timeout) {
                warn!(key = group.key, complete = group.is_complete(), "group timed out");
                group.force_complete();
                expired.push(group.key);
            }
        }
        expired
    }

    /// Remove a group, e.g., once the consumer has finished with it.
    pub fn take_group(&mut self, key: i64) -> Option<GroupData> {
        self.groups.remove(&key)
    }

    /// Remove all groups whose slots have all been processed, returning how many were
    /// removed.
    pub fn remove_processed(&mut self) -> usize {
        let before = self.groups.len();
        self.groups.retain(|_, g| !g.is_processed());
        before - self.groups.len()
    }
}
