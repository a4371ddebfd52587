//! Transfer frame decoding and per-channel demultiplexing.
//!
//! Frames are fixed 892 byte VCDUs: a 6 byte VCDU primary header, a 2 byte M_PDU
//! header holding the first-header-pointer, then 884 bytes of packet zone.
mod demux;
mod reader;
mod reassembler;

pub use demux::*;
pub use reader::*;
pub use reassembler::*;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub type Scid = u16;
pub type Vcid = u16;

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy)]
pub struct VcduHeader {
    pub version: u8,
    pub scid: Scid,
    pub vcid: Vcid,
    pub counter: u32,
    pub replay: bool,
}

impl VcduHeader {
    /// VCDU header length in bytes
    pub const LEN: usize = 6;
    /// VCID indicating a fill frame
    pub const FILL: Vcid = 63;
    /// Largest counter value; the next counter after this is 0.
    pub const COUNTER_MAX: u32 = 0xff_ffff;

    /// Construct from the provided bytes, or `None` if there are not enough bytes.
    #[must_use]
    pub fn decode(dat: &[u8]) -> Option<Self> {
        if dat.len() < Self::LEN {
            return None;
        }

        Some(VcduHeader {
            version: (dat[0] >> 6) & 0x3,
            scid: (u16::from(dat[0] & 0x3f) << 2) | u16::from((dat[1] & 0xc0) >> 6),
            vcid: u16::from(dat[1] & 0x3f),
            counter: u32::from_be_bytes([0, dat[2], dat[3], dat[4]]),
            replay: dat[5] & 0x80 != 0,
        })
    }
}

/// A single transfer frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: VcduHeader,
    /// First-header-pointer from the M_PDU header. Offset into [Frame::payload] of the
    /// first packet primary header, or [Frame::NO_HEADER].
    pub first_header: u16,
    /// All frame bytes, including headers
    pub data: Vec<u8>,
}

impl Frame {
    /// Total frame length in bytes
    pub const LEN: usize = 892;
    /// Offset of the packet zone
    pub const PAYLOAD_OFFSET: usize = VcduHeader::LEN + 2;
    /// First-header-pointer value indicating no packet starts in this frame
    pub const NO_HEADER: u16 = 0x7ff;

    /// Decode a frame from exactly [Frame::LEN] bytes.
    ///
    /// # Errors
    /// [Error::InvalidFrameSize] if `dat` is not exactly one frame long.
    pub fn decode(dat: &[u8]) -> Result<Self> {
        if dat.len() != Self::LEN {
            return Err(Error::InvalidFrameSize {
                actual: dat.len(),
                expected: Self::LEN,
            });
        }
        let header = VcduHeader::decode(dat).ok_or(Error::InvalidFrameSize {
            actual: dat.len(),
            expected: Self::LEN,
        })?;
        let first_header = u16::from_be_bytes([dat[6], dat[7]]) & 0x7ff;

        Ok(Frame {
            header,
            first_header,
            data: dat.to_vec(),
        })
    }

    #[must_use]
    pub fn is_fill(&self) -> bool {
        self.header.vcid == VcduHeader::FILL
    }

    #[must_use]
    pub fn has_header(&self) -> bool {
        self.first_header != Self::NO_HEADER
    }

    /// Offset of the first packet header in the payload, clamped to the payload length.
    #[must_use]
    pub fn header_offset(&self) -> usize {
        (self.first_header as usize).min(Self::LEN - Self::PAYLOAD_OFFSET)
    }

    /// The packet zone bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.data[Self::PAYLOAD_OFFSET..]
    }
}
