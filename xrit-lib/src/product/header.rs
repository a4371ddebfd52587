//! xRIT file headers.
//!
//! A product file starts with a sequence of header records, each encoded as a 1 byte
//! record type, a 2 byte big-endian record length (including these 3 bytes) and the
//! record body. The primary record gives the total length of all header records.
use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::{Error, Result};

/// NOAA product ids carried in the NOAA specific record.
pub mod product_id {
    pub const NOAA_TEXT: u16 = 1;
    pub const OTHER_SATELLITES_1: u16 = 3;
    pub const OTHER_SATELLITES_2: u16 = 4;
    pub const WEATHER_DATA: u16 = 6;
    pub const DCS: u16 = 8;
    pub const HRIT_EMWIN: u16 = 9;
    pub const GOES13_ABI: u16 = 13;
    pub const GOES15_ABI: u16 = 15;
    pub const GOES16_ABI: u16 = 16;
    pub const GOES17_ABI: u16 = 17;
    pub const EMWIN: u16 = 42;
    pub const HIMAWARI8_ABI: u16 = 43;
}

/// Record type codes
mod record {
    pub const PRIMARY: u8 = 0;
    pub const IMAGE_STRUCTURE: u8 = 1;
    pub const IMAGE_NAVIGATION: u8 = 2;
    pub const IMAGE_DATA_FUNCTION: u8 = 3;
    pub const ANNOTATION: u8 = 4;
    pub const TIMESTAMP: u8 = 5;
    pub const ANCILLARY_TEXT: u8 = 6;
    pub const KEY: u8 = 7;
    pub const SEGMENT_IDENTIFICATION: u8 = 128;
    pub const NOAA_SPECIFIC: u8 = 129;
    pub const HEADER_STRUCTURED: u8 = 130;
    pub const RICE_COMPRESSION: u8 = 131;
    pub const DCS_FILENAME: u8 = 132;
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Rice,
    Jpeg,
    Gif,
    Zip,
    Unknown(u8),
}

impl From<u8> for Compression {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::None,
            1 => Self::Rice,
            2 => Self::Jpeg,
            5 => Self::Gif,
            10 => Self::Zip,
            x => Self::Unknown(x),
        }
    }
}

/// Broad classification of a product used to decide where it is filed.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProductKind {
    Image,
    Text,
    Dcs,
    Emwin,
    WeatherData,
    OtherSatellite,
    Unknown,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrimaryRecord {
    pub file_type: u8,
    /// Total length of all header records
    pub header_length: u32,
    /// Product data length in bits
    pub data_length: u64,
}

impl PrimaryRecord {
    pub const FILE_TYPE_IMAGE: u8 = 0;
    pub const FILE_TYPE_TEXT: u8 = 2;
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageStructure {
    pub bits_per_pixel: u8,
    pub columns: u16,
    pub lines: u16,
    pub compression: Compression,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ImageNavigation {
    pub projection: String,
    pub column_scaling: i32,
    pub line_scaling: i32,
    pub column_offset: i32,
    pub line_offset: i32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentIdentification {
    pub image_id: u16,
    pub sequence: u16,
    pub start_column: u16,
    pub start_line: u16,
    pub max_segments: u16,
    pub max_columns: u16,
    pub max_lines: u16,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct NoaaSpecific {
    pub signature: String,
    pub product_id: u16,
    pub subproduct_id: u16,
    pub parameter: u16,
    pub compression: Compression,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiceCompression {
    pub flags: u16,
    pub pixels_per_block: u8,
    pub scanlines_per_packet: u8,
}

/// Record with a type code not decoded here.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct UnknownRecord {
    pub kind: u8,
    pub data: Vec<u8>,
}

/// All header records of a product.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProductHeader {
    pub primary: PrimaryRecord,
    pub image_structure: Option<ImageStructure>,
    pub navigation: Option<ImageNavigation>,
    pub image_data_function: Option<String>,
    pub annotation: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub ancillary: Option<BTreeMap<String, String>>,
    pub key: Option<Vec<u8>>,
    pub segment: Option<SegmentIdentification>,
    pub noaa: Option<NoaaSpecific>,
    pub header_structured: Option<String>,
    pub rice: Option<RiceCompression>,
    pub dcs_filename: Option<String>,
    pub unknown: Vec<UnknownRecord>,
}

fn be_u16(dat: &[u8], offset: usize) -> Result<u16> {
    dat.get(offset..offset + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or_else(|| short(offset))
}

fn be_u32(dat: &[u8], offset: usize) -> Result<u32> {
    dat.get(offset..offset + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| short(offset))
}

fn be_i32(dat: &[u8], offset: usize) -> Result<i32> {
    be_u32(dat, offset).map(|x| x as i32)
}

fn be_u64(dat: &[u8], offset: usize) -> Result<u64> {
    let hi = u64::from(be_u32(dat, offset)?);
    let lo = u64::from(be_u32(dat, offset + 4)?);
    Ok(hi << 32 | lo)
}

fn byte(dat: &[u8], offset: usize) -> Result<u8> {
    dat.get(offset).copied().ok_or_else(|| short(offset))
}

fn text(dat: &[u8]) -> String {
    String::from_utf8_lossy(dat)
        .trim_matches(|c: char| c == '\0' || c.is_whitespace())
        .to_string()
}

fn short(offset: usize) -> Error {
    Error::HeaderParse(format!("record too short for field at offset {offset}"))
}

/// Parse `key=value;key=value` ancillary text.
#[must_use]
pub fn parse_ancillary(s: &str) -> BTreeMap<String, String> {
    s.split(';')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| match item.split_once('=') {
            Some((k, v)) => (k.trim().to_string(), v.trim().to_string()),
            None => (item.to_string(), String::new()),
        })
        .collect()
}

/// Decode a CCSDS day segmented time with 2 bytes of days since 1958-01-01 and 4
/// bytes of milliseconds of day.
fn decode_cds(dat: &[u8], offset: usize) -> Result<DateTime<Utc>> {
    let days = be_u16(dat, offset)?;
    let millis = be_u32(dat, offset + 2)?;
    let epoch = NaiveDate::from_ymd_opt(1958, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| Error::HeaderParse("invalid CDS epoch".to_string()))?;
    Ok((epoch + Duration::days(i64::from(days)) + Duration::milliseconds(i64::from(millis))).and_utc())
}

impl ProductHeader {
    /// Decode header records from the start of `dat`.
    ///
    /// Decoding stops at the header length given by the primary record, or when the
    /// data runs out in the middle of a record.
    ///
    /// # Errors
    /// [Error::HeaderParse] if there is no primary record or a record is malformed.
    pub fn decode(dat: &[u8]) -> Result<Self> {
        let mut header = ProductHeader {
            primary: PrimaryRecord {
                file_type: 0,
                header_length: 0,
                data_length: 0,
            },
            image_structure: None,
            navigation: None,
            image_data_function: None,
            annotation: None,
            timestamp: None,
            ancillary: None,
            key: None,
            segment: None,
            noaa: None,
            header_structured: None,
            rice: None,
            dcs_filename: None,
            unknown: Vec::default(),
        };
        let mut have_primary = false;
        let mut end = dat.len();
        let mut offset = 0;

        while offset + 3 <= end {
            let kind = dat[offset];
            let size = be_u16(dat, offset + 1)? as usize;
            if size < 3 {
                return Err(Error::HeaderParse(format!(
                    "record type {kind} at {offset} has invalid size {size}"
                )));
            }
            let Some(rec) = dat.get(offset..offset + size) else {
                warn!(kind, size, available = dat.len() - offset, "not enough data for header record");
                break;
            };
            trace!(kind, size, offset, "header record");

            match kind {
                record::PRIMARY => {
                    header.primary = PrimaryRecord {
                        file_type: byte(rec, 3)?,
                        header_length: be_u32(rec, 4)?,
                        data_length: be_u64(rec, 8)?,
                    };
                    have_primary = true;
                    end = end.min(header.primary.header_length as usize);
                }
                record::IMAGE_STRUCTURE => {
                    header.image_structure = Some(ImageStructure {
                        bits_per_pixel: byte(rec, 3)?,
                        columns: be_u16(rec, 4)?,
                        lines: be_u16(rec, 6)?,
                        compression: Compression::from(byte(rec, 8)?),
                    });
                }
                record::IMAGE_NAVIGATION => {
                    header.navigation = Some(ImageNavigation {
                        projection: text(rec.get(3..35).ok_or_else(|| short(3))?),
                        column_scaling: be_i32(rec, 35)?,
                        line_scaling: be_i32(rec, 39)?,
                        column_offset: be_i32(rec, 43)?,
                        line_offset: be_i32(rec, 47)?,
                    });
                }
                record::IMAGE_DATA_FUNCTION => header.image_data_function = Some(text(&rec[3..])),
                record::ANNOTATION => header.annotation = Some(text(&rec[3..])),
                record::TIMESTAMP => {
                    // Standard records carry a 1 byte P-field before the T-field
                    let t_offset = if size >= 10 { 4 } else { 3 };
                    header.timestamp = Some(decode_cds(rec, t_offset)?);
                }
                record::ANCILLARY_TEXT => {
                    header.ancillary = Some(parse_ancillary(&text(&rec[3..])));
                }
                record::KEY => header.key = Some(rec[3..].to_vec()),
                record::SEGMENT_IDENTIFICATION => {
                    header.segment = Some(SegmentIdentification {
                        image_id: be_u16(rec, 3)?,
                        sequence: be_u16(rec, 5)?,
                        start_column: be_u16(rec, 7)?,
                        start_line: be_u16(rec, 9)?,
                        max_segments: be_u16(rec, 11)?,
                        max_columns: be_u16(rec, 13)?,
                        max_lines: be_u16(rec, 15)?,
                    });
                }
                record::NOAA_SPECIFIC => {
                    header.noaa = Some(NoaaSpecific {
                        signature: text(rec.get(3..7).ok_or_else(|| short(3))?),
                        product_id: be_u16(rec, 7)?,
                        subproduct_id: be_u16(rec, 9)?,
                        parameter: be_u16(rec, 11)?,
                        compression: Compression::from(byte(rec, 13)?),
                    });
                }
                record::HEADER_STRUCTURED => header.header_structured = Some(text(&rec[3..])),
                record::RICE_COMPRESSION => {
                    header.rice = Some(RiceCompression {
                        flags: be_u16(rec, 3)?,
                        pixels_per_block: byte(rec, 5)?,
                        scanlines_per_packet: byte(rec, 6)?,
                    });
                }
                record::DCS_FILENAME => header.dcs_filename = Some(text(&rec[3..])),
                _ => header.unknown.push(UnknownRecord {
                    kind,
                    data: rec[3..].to_vec(),
                }),
            }
            offset += size;
        }

        if !have_primary {
            return Err(Error::HeaderParse("missing primary header record".to_string()));
        }
        Ok(header)
    }

    /// Product compression. The NOAA specific record takes precedence over the image
    /// structure record.
    #[must_use]
    pub fn compression(&self) -> Compression {
        if let Some(noaa) = &self.noaa {
            noaa.compression
        } else if let Some(structure) = &self.image_structure {
            structure.compression
        } else {
            Compression::None
        }
    }

    #[must_use]
    pub fn product_id(&self) -> Option<u16> {
        self.noaa.as_ref().map(|n| n.product_id)
    }

    #[must_use]
    pub fn subproduct_id(&self) -> Option<u16> {
        self.noaa.as_ref().map(|n| n.subproduct_id)
    }

    /// Product file name from the DCS filename or annotation records, without any
    /// directory components. `.lrit` is added when the name has no extension.
    #[must_use]
    pub fn filename(&self) -> Option<String> {
        let name = self
            .dcs_filename
            .as_deref()
            .or(self.annotation.as_deref())?;
        let name = Path::new(name).file_name()?.to_string_lossy().to_string();
        if name.is_empty() {
            return None;
        }
        if name.contains('.') {
            Some(name)
        } else {
            Some(format!("{name}.lrit"))
        }
    }

    #[must_use]
    pub fn kind(&self) -> ProductKind {
        use product_id::*;

        let is_kwin = || self.filename().is_some_and(|f| f.contains("KWIN"));
        match self.product_id() {
            Some(GOES13_ABI | GOES15_ABI | GOES16_ABI | GOES17_ABI | HIMAWARI8_ABI) => {
                ProductKind::Image
            }
            Some(NOAA_TEXT) => ProductKind::Text,
            Some(DCS) => ProductKind::Dcs,
            Some(EMWIN | HRIT_EMWIN) => ProductKind::Emwin,
            Some(OTHER_SATELLITES_1 | OTHER_SATELLITES_2) => ProductKind::OtherSatellite,
            Some(WEATHER_DATA) if is_kwin() => ProductKind::Emwin,
            Some(WEATHER_DATA) => ProductKind::WeatherData,
            Some(_) if is_kwin() => ProductKind::Emwin,
            Some(_) => ProductKind::Unknown,
            None => match self.primary.file_type {
                PrimaryRecord::FILE_TYPE_IMAGE if self.image_structure.is_some() => {
                    ProductKind::Image
                }
                PrimaryRecord::FILE_TYPE_TEXT => ProductKind::Text,
                _ => ProductKind::Unknown,
            },
        }
    }

    /// True for full disk scanner images. Newer imagers do not use scanner subproduct
    /// ids so this may be false for their full disk images.
    #[must_use]
    pub fn is_full_disk(&self) -> bool {
        use product_id::*;

        self.primary.file_type == PrimaryRecord::FILE_TYPE_IMAGE
            && matches!(
                self.product_id(),
                Some(GOES13_ABI | GOES15_ABI | GOES16_ABI | HIMAWARI8_ABI)
            )
            && matches!(
                self.subproduct_id(),
                Some(scanner::INFRARED_FULL_DISK | scanner::VISIBLE_FULL_DISK | scanner::WATER_VAPOUR_FULL_DISK)
            )
    }

    #[must_use]
    pub fn product_name(&self) -> String {
        match self.product_id() {
            Some(id) => product_name(id).to_string(),
            None => "Unknown".to_string(),
        }
    }

    #[must_use]
    pub fn subproduct_name(&self) -> String {
        match (self.product_id(), self.subproduct_id()) {
            (Some(id), Some(sub)) => subproduct_name(id, sub),
            _ => "Unknown".to_string(),
        }
    }
}

/// Scanner subproduct ids used by the older imagers.
pub mod scanner {
    pub const INFRARED_FULL_DISK: u16 = 1;
    pub const INFRARED_NORTHERN: u16 = 2;
    pub const INFRARED_SOUTHERN: u16 = 3;
    pub const INFRARED_UNITED_STATES: u16 = 4;
    pub const INFRARED_AREA_OF_INTEREST: u16 = 5;
    pub const VISIBLE_FULL_DISK: u16 = 11;
    pub const VISIBLE_NORTHERN: u16 = 12;
    pub const VISIBLE_SOUTHERN: u16 = 13;
    pub const VISIBLE_UNITED_STATES: u16 = 14;
    pub const VISIBLE_AREA_OF_INTEREST: u16 = 15;
    pub const WATER_VAPOUR_FULL_DISK: u16 = 21;
    pub const WATER_VAPOUR_NORTHERN: u16 = 22;
    pub const WATER_VAPOUR_SOUTHERN: u16 = 23;
    pub const WATER_VAPOUR_UNITED_STATES: u16 = 24;
    pub const WATER_VAPOUR_AREA_OF_INTEREST: u16 = 25;
}

#[must_use]
pub fn product_name(id: u16) -> &'static str {
    use product_id::*;
    match id {
        NOAA_TEXT => "NOAA Text",
        OTHER_SATELLITES_1 | OTHER_SATELLITES_2 => "Other Satellites",
        WEATHER_DATA => "Weather Data",
        DCS => "DCS",
        HRIT_EMWIN => "HRIT EMWIN TEXT",
        GOES13_ABI => "GOES 13 ABI",
        GOES15_ABI => "GOES 15 ABI",
        GOES16_ABI => "GOES 16 ABI",
        GOES17_ABI => "GOES 17 ABI",
        EMWIN => "EMWIN",
        HIMAWARI8_ABI => "Himawari 8 ABI",
        _ => "Unknown",
    }
}

#[must_use]
pub fn subproduct_name(product: u16, sub: u16) -> String {
    use product_id::*;
    use scanner::*;

    match product {
        GOES16_ABI | GOES17_ABI | HIMAWARI8_ABI if sub > 0 => format!("Channel {sub}"),
        GOES13_ABI | GOES15_ABI => {
            let band = match sub / 10 {
                0 => "Infrared",
                1 => "Visible",
                2 => "Water Vapour",
                _ => return "Unknown".to_string(),
            };
            let region = match sub {
                INFRARED_FULL_DISK | VISIBLE_FULL_DISK | WATER_VAPOUR_FULL_DISK => "Full Disk",
                INFRARED_NORTHERN | VISIBLE_NORTHERN | WATER_VAPOUR_NORTHERN => {
                    "Northern Hemisphere"
                }
                INFRARED_SOUTHERN | VISIBLE_SOUTHERN | WATER_VAPOUR_SOUTHERN => {
                    "Southern Hemisphere"
                }
                INFRARED_UNITED_STATES | VISIBLE_UNITED_STATES | WATER_VAPOUR_UNITED_STATES => {
                    "United States"
                }
                INFRARED_AREA_OF_INTEREST
                | VISIBLE_AREA_OF_INTEREST
                | WATER_VAPOUR_AREA_OF_INTEREST => "Area of Interest",
                _ => return "Unknown".to_string(),
            };
            format!("{band} {region}")
        }
        OTHER_SATELLITES_1 | OTHER_SATELLITES_2 => match sub {
            1 => "Infrared Full Disk".to_string(),
            3 => "Visible Full Disk".to_string(),
            _ => "None".to_string(),
        },
        _ if sub == 0 => "None".to_string(),
        _ => "Unknown".to_string(),
    }
}
