#![allow(dead_code)]
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use xrit::crc::crc16;
use xrit::{FileRouter, Frame, PrimaryHeader, ProductHeader, SequenceFlag};

pub const PAYLOAD_LEN: usize = Frame::LEN - Frame::PAYLOAD_OFFSET;

fn flag_bits(flag: SequenceFlag) -> u16 {
    match flag {
        SequenceFlag::Continuation => 0,
        SequenceFlag::First => 1,
        SequenceFlag::Last => 2,
        SequenceFlag::Single => 3,
    }
}

/// Encode a packet with a valid trailing CRC over `user`.
pub fn packet(apid: u16, flag: SequenceFlag, seq: u16, user: &[u8]) -> Vec<u8> {
    let crc = crc16(user);
    let len_minus1 = (user.len() + 2 - 1) as u16;
    let mut dat = Vec::with_capacity(PrimaryHeader::LEN + user.len() + 2);
    dat.extend_from_slice(&(apid & 0x7ff).to_be_bytes());
    dat.extend_from_slice(&(flag_bits(flag) << 14 | (seq & 0x3fff)).to_be_bytes());
    dat.extend_from_slice(&len_minus1.to_be_bytes());
    dat.extend_from_slice(user);
    dat.extend_from_slice(&crc.to_be_bytes());
    dat
}

/// Idle packet exactly `total` bytes long, header included.
pub fn fill_packet(total: usize) -> Vec<u8> {
    assert!(total > PrimaryHeader::LEN + 2, "fill packet too short");
    packet(
        PrimaryHeader::FILL_APID,
        SequenceFlag::Single,
        0,
        &vec![0u8; total - PrimaryHeader::LEN - 2],
    )
}

/// Encode a single frame.
pub fn frame(vcid: u8, counter: u32, first_header: u16, payload: &[u8]) -> Vec<u8> {
    assert_eq!(payload.len(), PAYLOAD_LEN);
    let mut dat = Vec::with_capacity(Frame::LEN);
    // version 1, scid 0
    dat.push(0x40);
    dat.push(vcid & 0x3f);
    dat.extend_from_slice(&counter.to_be_bytes()[1..]);
    dat.push(0);
    dat.extend_from_slice(&(first_header & 0x7ff).to_be_bytes());
    dat.extend_from_slice(payload);
    dat
}

/// Lay packets out back to back over frames with consecutive counters starting at
/// `counter`, padding the last frame with an idle packet.
pub fn frames_from_packets(vcid: u8, counter: u32, packets: &[Vec<u8>]) -> Vec<Vec<u8>> {
    let mut stream = Vec::default();
    let mut starts = Vec::default();
    for packet in packets {
        starts.push(stream.len());
        stream.extend_from_slice(packet);
    }
    let rem = PAYLOAD_LEN - stream.len() % PAYLOAD_LEN;
    if rem != PAYLOAD_LEN {
        let total = if rem > PrimaryHeader::LEN + 2 {
            rem
        } else {
            rem + PAYLOAD_LEN
        };
        starts.push(stream.len());
        stream.extend_from_slice(&fill_packet(total));
    }

    stream
        .chunks(PAYLOAD_LEN)
        .enumerate()
        .map(|(idx, chunk)| {
            let lo = idx * PAYLOAD_LEN;
            let hi = lo + PAYLOAD_LEN;
            let fhp = starts
                .iter()
                .find(|s| (lo..hi).contains(*s))
                .map_or(Frame::NO_HEADER, |s| (s - lo) as u16);
            frame(vcid, counter + idx as u32, fhp, chunk)
        })
        .collect()
}

/// xRIT header record builder. The primary record is generated by [HeaderBuilder::build].
#[derive(Default)]
pub struct HeaderBuilder {
    file_type: u8,
    records: Vec<u8>,
}

impl HeaderBuilder {
    pub fn new(file_type: u8) -> Self {
        HeaderBuilder {
            file_type,
            records: Vec::default(),
        }
    }

    fn record(mut self, kind: u8, body: &[u8]) -> Self {
        self.records.push(kind);
        self.records
            .extend_from_slice(&((body.len() + 3) as u16).to_be_bytes());
        self.records.extend_from_slice(body);
        self
    }

    pub fn image_structure(self, columns: u16, lines: u16, compression: u8) -> Self {
        let mut body = vec![8];
        body.extend_from_slice(&columns.to_be_bytes());
        body.extend_from_slice(&lines.to_be_bytes());
        body.push(compression);
        self.record(1, &body)
    }

    pub fn navigation(self, column_scaling: i32, line_scaling: i32, column_offset: i32, line_offset: i32) -> Self {
        let mut body = vec![0u8; 32];
        body[..11].copy_from_slice(b"GEOS(-75.0)");
        body.extend_from_slice(&column_scaling.to_be_bytes());
        body.extend_from_slice(&line_scaling.to_be_bytes());
        body.extend_from_slice(&column_offset.to_be_bytes());
        body.extend_from_slice(&line_offset.to_be_bytes());
        self.record(2, &body)
    }

    pub fn annotation(self, text: &str) -> Self {
        self.record(4, text.as_bytes())
    }

    /// CCSDS day segmented time with a P-field.
    pub fn timestamp(self, days_since_1958: u16, millis: u32) -> Self {
        let mut body = vec![0x40];
        body.extend_from_slice(&days_since_1958.to_be_bytes());
        body.extend_from_slice(&millis.to_be_bytes());
        self.record(5, &body)
    }

    pub fn ancillary(self, text: &str) -> Self {
        self.record(6, text.as_bytes())
    }

    pub fn segment(self, image_id: u16, sequence: u16, max_segments: u16) -> Self {
        let mut body = Vec::default();
        for v in [image_id, sequence, 0, sequence * 10, max_segments, 100, max_segments * 10] {
            body.extend_from_slice(&v.to_be_bytes());
        }
        self.record(128, &body)
    }

    pub fn noaa(self, product_id: u16, subproduct_id: u16, compression: u8) -> Self {
        let mut body = b"NOAA".to_vec();
        body.extend_from_slice(&product_id.to_be_bytes());
        body.extend_from_slice(&subproduct_id.to_be_bytes());
        body.extend_from_slice(&0u16.to_be_bytes());
        body.push(compression);
        self.record(129, &body)
    }

    pub fn rice(self, flags: u16, pixels_per_block: u8, scanlines: u8) -> Self {
        let mut body = flags.to_be_bytes().to_vec();
        body.push(pixels_per_block);
        body.push(scanlines);
        self.record(131, &body)
    }

    pub fn build(self, data_len: usize) -> Vec<u8> {
        let header_len = 16 + self.records.len();
        let mut dat = vec![0, 0, 16, self.file_type];
        dat.extend_from_slice(&(header_len as u32).to_be_bytes());
        dat.extend_from_slice(&((data_len * 8) as u64).to_be_bytes());
        dat.extend_from_slice(&self.records);
        dat
    }
}

/// User data of the first packet of a product: transport header then product bytes.
pub fn first_user_data(file_counter: u16, product: &[u8]) -> Vec<u8> {
    let mut dat = file_counter.to_be_bytes().to_vec();
    dat.extend_from_slice(&((product.len() * 8) as u64).to_be_bytes());
    dat.extend_from_slice(product);
    dat
}

/// Router that records each delivery and the file contents at delivery time.
#[derive(Default, Clone)]
pub struct RecordingRouter {
    pub delivered: Arc<Mutex<Vec<(PathBuf, Vec<u8>, ProductHeader)>>>,
}

impl RecordingRouter {
    pub fn deliveries(&self) -> Vec<(PathBuf, Vec<u8>, ProductHeader)> {
        self.delivered.lock().unwrap().clone()
    }
}

impl FileRouter for RecordingRouter {
    fn handle_file(&self, path: &Path, header: &ProductHeader) {
        let dat = std::fs::read(path).unwrap_or_default();
        self.delivered
            .lock()
            .unwrap()
            .push((path.to_path_buf(), dat, header.clone()));
    }
}
