//! Product assembly from reassembled transport packets.
//!
//! Each APID on a channel carries one product at a time. A product starts with a
//! `First` (or `Single`) packet whose user data holds a transport file header and the
//! product header records, followed by `Continuation` packets and closed by a `Last`
//! packet. Finished products are handed to a [FileRouter].
mod header;
mod router;

pub use header::*;
pub use router::*;

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::framing::Vcid;
use crate::spacepacket::{missing_packets, Apid, Packet, SequenceFlag, TransportHeader};
use crate::{Error, Result};

/// Rice pixels-per-block used when a product does not carry a Rice record.
pub const DEFAULT_PIXELS_PER_BLOCK: u8 = 16;
/// Rice option mask used when a product does not carry a Rice record; allow-k13,
/// MSB first and NN (preprocessed) options.
pub const DEFAULT_RICE_FLAGS: u16 = 1 | 16 | 32;
/// Time after which a product without new packets is considered abandoned.
pub const DEFAULT_PRODUCT_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Decodes the product header records from the start of a product.
pub trait HeaderParser: Send + Sync {
    /// # Errors
    /// [Error::HeaderParse] if the header cannot be decoded.
    fn parse(&self, dat: &[u8]) -> Result<ProductHeader>;
}

/// [HeaderParser] for standard xRIT header records.
#[derive(Debug, Default, Clone, Copy)]
pub struct XritHeaderParser;

impl HeaderParser for XritHeaderParser {
    fn parse(&self, dat: &[u8]) -> Result<ProductHeader> {
        ProductHeader::decode(dat)
    }
}

/// Rice (CCSDS 121.0) decompression of one packet worth of image lines.
pub trait Decompressor: Send + Sync {
    /// # Errors
    /// [Error::Codec] if the data cannot be decompressed.
    fn decompress(
        &self,
        compressed: &[u8],
        columns: usize,
        pixels_per_block: u8,
        flags: u16,
    ) -> Result<Vec<u8>>;
}

/// [Decompressor] that always fails, leaving compressed lines zero filled.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedCodec;

impl Decompressor for UnsupportedCodec {
    fn decompress(&self, _: &[u8], _: usize, _: u8, _: u16) -> Result<Vec<u8>> {
        Err(Error::Codec("no rice decompressor available".to_string()))
    }
}

/// Receives each finished product file exactly once.
pub trait FileRouter: Send + Sync {
    fn handle_file(&self, path: &Path, header: &ProductHeader);
}

impl<F> FileRouter for F
where
    F: Fn(&Path, &ProductHeader) + Send + Sync,
{
    fn handle_file(&self, path: &Path, header: &ProductHeader) {
        self(path, header);
    }
}

/// A product currently being assembled.
#[derive(Debug, Clone)]
pub struct ProductInfo {
    pub apid: Apid,
    pub path: PathBuf,
    pub header: ProductHeader,
    pub transport: Option<TransportHeader>,
    pub last_sequence: u16,
    pub last_activity: Instant,
}

impl ProductInfo {
    #[must_use]
    pub fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_activity) > timeout
    }
}

/// A product handed to the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub apid: Apid,
    pub path: PathBuf,
    pub product_id: Option<u16>,
    /// Product was delivered before its last packet was seen.
    pub forced: bool,
}

/// Assembles the products of a single channel.
pub struct ProductAssembler {
    vcid: Vcid,
    dir: PathBuf,
    timeout: Duration,
    parser: Arc<dyn HeaderParser>,
    codec: Arc<dyn Decompressor>,
    router: Arc<dyn FileRouter>,
    open: HashMap<Apid, ProductInfo>,
}

impl ProductAssembler {
    /// Create an assembler writing in-progress products to `dir`.
    pub fn new<P: AsRef<Path>>(
        vcid: Vcid,
        dir: P,
        parser: Arc<dyn HeaderParser>,
        codec: Arc<dyn Decompressor>,
        router: Arc<dyn FileRouter>,
    ) -> Self {
        ProductAssembler {
            vcid,
            dir: dir.as_ref().to_path_buf(),
            timeout: DEFAULT_PRODUCT_TIMEOUT,
            parser,
            codec,
            router,
            open: HashMap::default(),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Products still waiting for packets.
    pub fn open_products(&self) -> impl Iterator<Item = &ProductInfo> {
        self.open.values()
    }

    /// Add a finalized packet, returning any products it caused to be delivered.
    pub fn handle_packet(&mut self, packet: &Packet) -> Vec<Delivery> {
        let apid = packet.apid();
        let seq = packet.sequence();
        let first = matches!(seq, SequenceFlag::First | SequenceFlag::Single);
        let mut delivered = Vec::default();

        if first {
            if let Some(prev) = self.open.remove(&apid) {
                warn!(
                    vcid = self.vcid,
                    apid,
                    path = ?prev.path,
                    "product restarted before its last packet, delivering partial product"
                );
                delivered.push(self.deliver(prev, true));
            }
            let Some(info) = self.start(packet) else {
                return delivered;
            };
            self.open.insert(apid, info);
        } else if !self.open.contains_key(&apid) {
            debug!(vcid = self.vcid, apid, seq = ?seq, "orphan packet, dropping");
            return delivered;
        }

        let Some(info) = self.open.get_mut(&apid) else {
            return delivered;
        };
        info.last_activity = Instant::now();

        let user = &packet.data[..packet.user_data_len().min(packet.data.len())];
        let body = if first {
            user.get(TransportHeader::LEN..).unwrap_or_default()
        } else {
            user
        };

        let sequence_id = packet.header.sequence_id;
        let dat = if !first && info.header.compression() == Compression::Rice {
            let columns = info
                .header
                .image_structure
                .map_or(0, |s| s.columns as usize);
            let mut dat = Vec::default();

            // Forward distance from the previous packet, so a wrap from 16383 to 0 is no gap.
            let missing = missing_packets(sequence_id, info.last_sequence) as usize;
            if missing > 0 {
                let lines = info.header.image_structure.map_or(0, |s| s.lines as usize);
                if missing <= lines {
                    warn!(vcid = self.vcid, apid, missing, "filling lines for missing packets");
                    dat.resize(missing * columns, 0);
                } else {
                    warn!(vcid = self.vcid, apid, missing, lines, "packet gap larger than image, not filling");
                }
            }

            let (pixels_per_block, flags) = info.header.rice.map_or(
                (DEFAULT_PIXELS_PER_BLOCK, DEFAULT_RICE_FLAGS),
                |r| (r.pixels_per_block, r.flags),
            );
            match self
                .codec
                .decompress(body, columns, pixels_per_block, flags)
            {
                Ok(lines) => dat.extend_from_slice(&lines),
                Err(err) => {
                    warn!(vcid = self.vcid, apid, sequence_id, "decompression failed, zero filling: {err}");
                    dat.resize(dat.len() + columns, 0);
                }
            }
            dat
        } else {
            body.to_vec()
        };
        info.last_sequence = sequence_id;

        if let Err(err) = write_product_data(&info.path, &dat, first) {
            error!(vcid = self.vcid, apid, path = ?info.path, "failed to write product data: {err}");
        }

        if matches!(seq, SequenceFlag::Last | SequenceFlag::Single) {
            if let Some(info) = self.open.remove(&apid) {
                delivered.push(self.deliver(info, false));
            }
        }

        delivered
    }

    /// Deliver any products that have not seen a packet within the timeout.
    pub fn flush_expired(&mut self, now: Instant) -> Vec<Delivery> {
        let expired: Vec<Apid> = self
            .open
            .values()
            .filter(|info| info.is_expired(now, self.timeout))
            .map(|info| info.apid)
            .collect();

        let mut delivered = Vec::default();
        for apid in expired {
            if let Some(info) = self.open.remove(&apid) {
                warn!(vcid = self.vcid, apid, path = ?info.path, "product expired, delivering partial product");
                delivered.push(self.deliver(info, true));
            }
        }
        delivered
    }

    /// Abandon all open products, removing their partial files.
    pub fn clear(&mut self) {
        for (apid, info) in self.open.drain() {
            debug!(vcid = self.vcid, apid, path = ?info.path, "discarding partial product");
            if let Err(err) = fs::remove_file(&info.path) {
                debug!(path = ?info.path, "failed to remove partial product: {err}");
            }
        }
    }

    fn start(&self, packet: &Packet) -> Option<ProductInfo> {
        let apid = packet.apid();
        let user = &packet.data[..packet.user_data_len().min(packet.data.len())];
        let transport = TransportHeader::decode(user);
        let Some(header_data) = user.get(TransportHeader::LEN..) else {
            warn!(vcid = self.vcid, apid, len = user.len(), "first packet too short for product header, dropping product");
            return None;
        };
        let header = match self.parser.parse(header_data) {
            Ok(header) => header,
            Err(err) => {
                warn!(vcid = self.vcid, apid, "dropping product: {err}");
                return None;
            }
        };

        if let Err(err) = fs::create_dir_all(&self.dir) {
            error!(dir = ?self.dir, "failed to create product directory: {err}");
            return None;
        }
        let path = self.dir.join(format!(
            "{:02}-{:04}-{:05}.lrit",
            self.vcid, apid, packet.header.sequence_id
        ));
        debug!(
            vcid = self.vcid,
            apid,
            path = ?path,
            filename = ?header.filename(),
            file_counter = ?transport.map(|t| t.file_counter),
            "starting product"
        );

        Some(ProductInfo {
            apid,
            path,
            header,
            transport,
            last_sequence: packet.header.sequence_id,
            last_activity: Instant::now(),
        })
    }

    fn deliver(&self, info: ProductInfo, forced: bool) -> Delivery {
        info!(
            vcid = self.vcid,
            apid = info.apid,
            kind = ?info.header.kind(),
            name = ?info.header.filename(),
            forced,
            "product complete"
        );
        self.router.handle_file(&info.path, &info.header);
        Delivery {
            apid: info.apid,
            path: info.path,
            product_id: info.header.product_id(),
            forced,
        }
    }
}

fn write_product_data(path: &Path, dat: &[u8], create: bool) -> Result<()> {
    let mut file = if create {
        File::create(path)?
    } else {
        OpenOptions::new().append(true).open(path)?
    };
    file.write_all(dat)?;
    Ok(())
}
