//! Transport packets (M_SDUs) carried in the frame packet zone.
use std::fmt::Display;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::crc;

pub type Apid = u16;

/// Position of a packet within its product.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceFlag {
    Continuation,
    First,
    Last,
    /// Packet is not part of a group, i.e., the whole product.
    Single,
}

impl From<u8> for SequenceFlag {
    fn from(value: u8) -> Self {
        match value & 0x3 {
            0 => Self::Continuation,
            1 => Self::First,
            2 => Self::Last,
            _ => Self::Single,
        }
    }
}

/// CCSDS Primary Header
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
pub struct PrimaryHeader {
    pub version: u8,
    pub type_flag: u8,
    pub has_secondary_header: bool,
    pub apid: Apid,
    pub sequence_flags: SequenceFlag,
    pub sequence_id: u16,
    /// Length of the packet data field minus 1. The data field includes the trailing
    /// 2 byte checksum.
    pub len_minus1: u16,
}

impl PrimaryHeader {
    /// Size of a ``PrimaryHeader``
    pub const LEN: usize = 6;
    pub const SEQ_MAX: u16 = 16383;
    /// APID used for idle packets
    pub const FILL_APID: Apid = 2047;

    /// Decode from bytes. Returns `None` if there are not enough bytes to construct the
    /// header.
    #[must_use]
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::LEN {
            return None;
        }
        let d1 = u16::from_be_bytes([buf[0], buf[1]]);
        let d2 = u16::from_be_bytes([buf[2], buf[3]]);
        let d3 = u16::from_be_bytes([buf[4], buf[5]]);

        Some(PrimaryHeader {
            version: (d1 >> 13 & 0x7) as u8,
            type_flag: (d1 >> 12 & 0x1) as u8,
            has_secondary_header: (d1 >> 11 & 0x1) == 1,
            apid: (d1 & 0x7ff),
            sequence_flags: SequenceFlag::from((d2 >> 14 & 0x3) as u8),
            sequence_id: (d2 & 0x3fff),
            len_minus1: d3,
        })
    }

    /// Number of bytes in the packet data field, including the checksum.
    #[must_use]
    pub fn data_len(&self) -> usize {
        self.len_minus1 as usize + 1
    }
}

/// A transport packet under assembly, or fully assembled.
///
/// `data` holds the packet data field only (no primary header), including the
/// trailing checksum once complete.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Packet {
    pub header: PrimaryHeader,
    pub data: Vec<u8>,
    /// Set when a frame discontinuity was seen while this packet was being assembled.
    pub frame_lost: bool,
}

impl Display for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Packet{{apid={}, seq={:?}/{}, data:[len={}/{}], frame_lost={}}}",
            self.header.apid,
            self.header.sequence_flags,
            self.header.sequence_id,
            self.data.len(),
            self.header.data_len(),
            self.frame_lost,
        )
    }
}

impl Packet {
    /// Start a packet with whatever portion of its data field is available. Bytes
    /// beyond the declared length are not taken.
    #[must_use]
    pub fn new(header: PrimaryHeader, data: &[u8]) -> Self {
        let mut packet = Packet {
            header,
            data: Vec::with_capacity(header.data_len()),
            frame_lost: false,
        };
        packet.append(data);
        packet
    }

    /// Append data field bytes, truncating at the declared length. Returns the number of
    /// bytes taken.
    pub fn append(&mut self, dat: &[u8]) -> usize {
        let room = self.header.data_len().saturating_sub(self.data.len());
        if dat.len() > room {
            warn!(
                apid = self.header.apid,
                extra = dat.len() - room,
                "packet overflow, truncating"
            );
        }
        let take = dat.len().min(room);
        self.data.extend_from_slice(&dat[..take]);
        take
    }

    #[must_use]
    pub fn apid(&self) -> Apid {
        self.header.apid
    }

    #[must_use]
    pub fn sequence(&self) -> SequenceFlag {
        self.header.sequence_flags
    }

    #[must_use]
    pub fn is_fill(&self) -> bool {
        self.header.apid == PrimaryHeader::FILL_APID
    }

    /// True when the data field has reached its declared length.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.data.len() == self.header.data_len()
    }

    /// Declared user data length, i.e., data field length without the checksum.
    #[must_use]
    pub fn user_data_len(&self) -> usize {
        self.header.data_len().saturating_sub(2)
    }

    /// Check the trailing checksum against the rest of the data field.
    #[must_use]
    pub fn crc_valid(&self) -> bool {
        crc::validate(&self.data)
    }
}

/// Calculate the number of missing sequence ids.
///
/// `cur` is the current sequence id. `last` is the sequence id seen before `cur`.
#[must_use]
pub fn missing_packets(cur: u16, last: u16) -> u16 {
    let expected = if last + 1 > PrimaryHeader::SEQ_MAX {
        0
    } else {
        last + 1
    };
    if cur != expected {
        if last + 1 > cur {
            return cur + PrimaryHeader::SEQ_MAX - last;
        }
        return cur - last - 1;
    }
    0
}

/// Transport file header found at the start of the first packet of a product.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportHeader {
    pub file_counter: u16,
    /// Product length in bits
    pub length: u64,
}

impl TransportHeader {
    pub const LEN: usize = 10;

    #[must_use]
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::LEN {
            return None;
        }
        let mut length = [0u8; 8];
        length.copy_from_slice(&buf[2..10]);
        Some(TransportHeader {
            file_counter: u16::from_be_bytes([buf[0], buf[1]]),
            length: u64::from_be_bytes(length),
        })
    }
}
