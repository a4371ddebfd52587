#![doc = include_str!("../README.md")]

mod error;

pub mod crc;
pub mod framing;
pub mod organizer;
pub mod product;
pub mod spacepacket;
pub mod stats;

pub use error::{Error, Result};
pub use framing::{Demultiplexer, DemuxConfig, Frame, Reassembler, Vcid};
pub use organizer::{Families, GroupData, Organizer, OrganizerConfig};
pub use product::{
    Decompressor, DirectoryRouter, FileRouter, HeaderParser, ProductAssembler, ProductHeader,
    ProductKind, XritHeaderParser,
};
pub use spacepacket::{Apid, Packet, PrimaryHeader, SequenceFlag};
pub use stats::Stats;
