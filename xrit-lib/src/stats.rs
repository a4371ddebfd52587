//! Decode statistics.
use std::collections::BTreeMap;
use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Counters for anomalies that are recovered from rather than reported as errors.
///
/// One of these is kept per channel and one for the whole demultiplexer; frame
/// processing fills in a fresh instance that is then merged into both with [Stats::add].
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    /// Non-fill frames handed to a reassembler
    pub frames: u64,
    pub fill_frames: u64,
    pub replayed: u64,
    pub duplicates: u64,
    /// Non-fill packets finalized
    pub packets: u64,
    pub crc_fails: u64,
    /// Packets finalized before reaching their declared length
    pub length_fails: u64,
    pub frame_loss: u64,
    pub frame_jumps: u64,
    /// Packets closed at a packet boundary while still short without any frame loss.
    pub bugs: u64,
    /// Products handed to the file router, by NOAA product id
    pub products: BTreeMap<u16, u64>,
}

impl Stats {
    pub fn add(&mut self, other: &Stats) {
        self.frames += other.frames;
        self.fill_frames += other.fill_frames;
        self.replayed += other.replayed;
        self.duplicates += other.duplicates;
        self.packets += other.packets;
        self.crc_fails += other.crc_fails;
        self.length_fails += other.length_fails;
        self.frame_loss += other.frame_loss;
        self.frame_jumps += other.frame_jumps;
        self.bugs += other.bugs;
        for (id, count) in &other.products {
            *self.products.entry(*id).or_default() += count;
        }
    }

    /// Total number of delivered products.
    #[must_use]
    pub fn products_total(&self) -> u64 {
        self.products.values().sum()
    }
}

impl Display for Stats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Stats{{frames={}, packets={}, crc_fails={}, length_fails={}, frame_loss={}, frame_jumps={}, bugs={}, products={}}}",
            self.frames,
            self.packets,
            self.crc_fails,
            self.length_fails,
            self.frame_loss,
            self.frame_jumps,
            self.bugs,
            self.products_total(),
        )
    }
}
