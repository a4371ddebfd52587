//! Packet checksum.
//!
//! Transport packets carry a trailing CRC-16/CCITT-FALSE (polynomial 0x1021, initial
//! value 0xffff, no reflection, no final xor) computed over the packet data field,
//! excluding the checksum bytes themselves.
use crc::{Crc, CRC_16_IBM_3740};

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Compute the packet checksum over `dat`.
#[must_use]
pub fn crc16(dat: &[u8]) -> u16 {
    CRC16.checksum(dat)
}

/// Validate `dat` where the last 2 bytes are the big-endian checksum of the bytes
/// before them. Returns false if there are fewer than 2 bytes.
#[must_use]
pub fn validate(dat: &[u8]) -> bool {
    if dat.len() < 2 {
        return false;
    }
    let (body, tail) = dat.split_at(dat.len() - 2);
    crc16(body) == u16::from_be_bytes([tail[0], tail[1]])
}
