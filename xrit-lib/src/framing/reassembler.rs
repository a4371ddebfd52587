use std::collections::HashMap;
use std::fmt::Display;

use tracing::{debug, error, trace, warn};

use super::{Frame, VcduHeader, Vcid};
use crate::spacepacket::{Apid, Packet, PrimaryHeader};
use crate::stats::Stats;

/// Frame counter deltas at or above this are counted as a corrupted counter rather
/// than as lost frames.
pub const MAX_FRAME_LOSS: u64 = 1000;

/// Reassembles transport packets from the frames of a single virtual channel.
///
/// Frames must be provided in the order they were received. Packets are returned as
/// soon as they are closed, either because all their bytes have been seen or because
/// a following packet boundary forced them closed. Closed packets are returned even
/// when they fail their checksum or are short; see [Packet::crc_valid] and
/// [Packet::is_complete].
pub struct Reassembler {
    vcid: Vcid,
    ignore_counter_jump: bool,
    last_counter: Option<u32>,
    // Packet still waiting on data from future frames
    open_apid: Option<Apid>,
    // Bytes not yet belonging to any packet. Only ever holds a partial primary header
    // between frames.
    carry: Vec<u8>,
    partial: HashMap<Apid, Packet>,
}

impl Display for Reassembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Reassembler{{vcid={}, last_counter={:?}, open_apid={:?}, carry_len={}}}",
            self.vcid,
            self.last_counter,
            self.open_apid,
            self.carry.len()
        )
    }
}

impl Reassembler {
    /// Create a reassembler for `vcid`.
    ///
    /// When `ignore_counter_jump` is set, backward counter jumps and counter wraps are
    /// still logged but never counted as frame loss.
    #[must_use]
    pub fn new(vcid: Vcid, ignore_counter_jump: bool) -> Self {
        Reassembler {
            vcid,
            ignore_counter_jump,
            last_counter: None,
            open_apid: None,
            carry: Vec::default(),
            partial: HashMap::default(),
        }
    }

    #[must_use]
    pub fn vcid(&self) -> Vcid {
        self.vcid
    }

    /// Counter of the last accepted frame, if any.
    #[must_use]
    pub fn last_counter(&self) -> Option<u32> {
        self.last_counter
    }

    #[must_use]
    pub fn open_apid(&self) -> Option<Apid> {
        self.open_apid
    }

    /// Drop all partial packet state and counter history, e.g., after a loss of lock.
    pub fn reset(&mut self) {
        self.last_counter = None;
        self.open_apid = None;
        self.carry.clear();
        self.partial.clear();
    }

    /// Process the next frame for this channel, returning any packets closed by it.
    ///
    /// Anomalies are counted in `stats` rather than returned.
    pub fn process_frame(&mut self, frame: &Frame, stats: &mut Stats) -> Vec<Packet> {
        let mut ready = Vec::default();
        if !self.check_sequence(&frame.header, stats) {
            return ready;
        }
        stats.frames += 1;
        self.packetize(frame, stats, &mut ready);
        ready
    }

    /// Returns false if the frame should be dropped.
    fn check_sequence(&mut self, header: &VcduHeader, stats: &mut Stats) -> bool {
        let counter = header.counter;
        if header.replay {
            stats.replayed += 1;
            debug!(vcid = self.vcid, counter, "replayed frame, dropping");
            return false;
        }
        let Some(last) = self.last_counter else {
            self.last_counter = Some(counter);
            return true;
        };
        if counter == last {
            stats.duplicates += 1;
            warn!(vcid = self.vcid, counter, "duplicate frame counter, dropping");
            return false;
        }

        let jump = last > counter;
        let wrap = jump && counter == 0;
        let wrap_loss =
            i64::from(VcduHeader::COUNTER_MAX) - i64::from(last) + i64::from(counter) - 1;
        let wrap_problem = wrap && wrap_loss > 0;

        if jump && !wrap {
            warn!(vcid = self.vcid, last, counter, "frame counter jumped backwards");
            self.mark_open_lost();
        } else if !wrap && last + 1 != counter {
            error!(
                vcid = self.vcid,
                last,
                counter,
                lost = counter - last - 1,
                "lost frames"
            );
            self.mark_open_lost();
        } else if wrap_problem {
            if self.ignore_counter_jump {
                warn!(vcid = self.vcid, last, counter, "ignoring loss across counter wrap");
            } else {
                error!(vcid = self.vcid, last, counter, lost = wrap_loss, "lost frames across counter wrap");
                self.mark_open_lost();
            }
        }

        let lost = if jump && !wrap {
            stats.frame_jumps += 1;
            if self.ignore_counter_jump {
                None
            } else {
                Some((i64::from(counter) - i64::from(last) - 1).unsigned_abs())
            }
        } else if wrap {
            if self.ignore_counter_jump {
                None
            } else {
                Some(wrap_loss.max(0).unsigned_abs())
            }
        } else {
            Some(u64::from(counter - last - 1))
        };
        if let Some(lost) = lost {
            if lost < MAX_FRAME_LOSS {
                stats.frame_loss += lost;
            } else {
                warn!(
                    vcid = self.vcid,
                    last, counter, lost, "frame loss too large, assuming corrupt counter"
                );
            }
        }

        // Any counter that got here is either ahead of the last one or a detected
        // jump/wrap, all of which become the new reference.
        self.last_counter = Some(counter);
        true
    }

    fn mark_open_lost(&mut self) {
        if let Some(apid) = self.open_apid {
            if let Some(packet) = self.partial.get_mut(&apid) {
                packet.frame_lost = true;
            }
        }
    }

    fn packetize(&mut self, frame: &Frame, stats: &mut Stats, ready: &mut Vec<Packet>) {
        let mut data = frame.payload();

        if !frame.has_header() {
            if let Some(apid) = self.open_apid {
                if let Some(packet) = self.partial.get_mut(&apid) {
                    packet.append(data);
                }
            } else if self.carry.is_empty() {
                // Nothing open and no packet starts here, i.e., no sync yet
                trace!(vcid = self.vcid, counter = frame.header.counter, "no packet sync, dropping frame data");
            } else {
                self.carry.extend_from_slice(data);
                self.parse_carry(stats, ready);
            }
            return;
        }

        let mut fhp = frame.header_offset();
        if fhp != frame.first_header as usize {
            debug!(vcid = self.vcid, fhp = frame.first_header, "first header pointer beyond payload");
        }

        // Bytes before the boundary complete a primary header left over from the
        // previous frame.
        if self.open_apid.is_none() && !self.carry.is_empty() {
            self.carry.extend_from_slice(&data[..fhp]);
            data = &data[fhp..];
            fhp = 0;
            self.parse_carry(stats, ready);
        }

        // Bytes before the boundary close the open packet.
        if let Some(apid) = self.open_apid.take() {
            if let Some(mut packet) = self.partial.remove(&apid) {
                packet.append(&data[..fhp]);
                if !packet.is_complete() && !packet.frame_lost {
                    stats.bugs += 1;
                    debug!(vcid = self.vcid, packet = %packet, "packet short at boundary without frame loss");
                }
                finalize(self.vcid, packet, stats, ready);
            }
            data = &data[fhp..];
            fhp = 0;
        }

        if !self.carry.is_empty() {
            debug!(vcid = self.vcid, len = self.carry.len(), "dropping bytes before packet boundary");
            self.carry.clear();
        }
        self.carry.extend_from_slice(&data[fhp..]);
        self.parse_carry(stats, ready);
    }

    /// Decode as many packets as possible from the carry buffer. A packet whose data
    /// runs past the end of the buffer becomes the open packet.
    fn parse_carry(&mut self, stats: &mut Stats, ready: &mut Vec<Packet>) {
        self.open_apid = None;
        let mut offset = 0;
        loop {
            let rest = &self.carry[offset..];
            let Some(header) = PrimaryHeader::decode(rest) else {
                break;
            };
            if header.version != 0 {
                warn!(vcid = self.vcid, header = ?header, "bad packet version, dropping buffered data");
                offset = self.carry.len();
                break;
            }

            let need = PrimaryHeader::LEN + header.data_len();
            if rest.len() >= need {
                let packet = Packet::new(header, &rest[PrimaryHeader::LEN..need]);
                offset += need;
                finalize(self.vcid, packet, stats, ready);
            } else {
                let packet = Packet::new(header, &rest[PrimaryHeader::LEN..]);
                if let Some(replaced) = self.partial.insert(header.apid, packet) {
                    debug!(vcid = self.vcid, packet = %replaced, "replacing partial packet");
                }
                self.open_apid = Some(header.apid);
                offset = self.carry.len();
                break;
            }
        }
        self.carry.drain(..offset);
    }
}

fn finalize(vcid: Vcid, packet: Packet, stats: &mut Stats, ready: &mut Vec<Packet>) {
    if packet.is_fill() {
        trace!(vcid, "dropping fill packet");
        return;
    }
    stats.packets += 1;

    let crc_valid = packet.crc_valid();
    let complete = packet.is_complete();
    if !crc_valid {
        stats.crc_fails += 1;
    }
    if !complete {
        stats.length_fails += 1;
    }
    if !crc_valid || !complete {
        if packet.frame_lost {
            warn!(vcid, packet = %packet, crc_valid, "packet corrupted by lost frames");
        } else {
            warn!(vcid, packet = %packet, crc_valid, complete, "packet failed validation");
        }
    }
    ready.push(packet);
}
