use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, error, info, span, Level};
use typed_builder::TypedBuilder;

use super::{Frame, Reassembler, Vcid};
use crate::product::{
    Decompressor, Delivery, FileRouter, HeaderParser, ProductAssembler, UnsupportedCodec,
    XritHeaderParser, DEFAULT_PRODUCT_TIMEOUT,
};
use crate::stats::Stats;
use crate::Result;

/// Demultiplexer configuration.
#[derive(TypedBuilder, Clone)]
pub struct DemuxConfig {
    /// Directory in-progress products are written to.
    #[builder(setter(into))]
    pub temp_dir: PathBuf,
    /// Do not count backward counter jumps or counter wraps as frame loss.
    #[builder(default = true)]
    pub ignore_counter_jump: bool,
    /// Time without packets after which a product is considered abandoned.
    #[builder(default = DEFAULT_PRODUCT_TIMEOUT)]
    pub product_timeout: Duration,
    #[builder(default = Arc::new(XritHeaderParser))]
    pub parser: Arc<dyn HeaderParser>,
    /// Rice decompressor. The default cannot decompress, leaving compressed image lines
    /// zero filled.
    #[builder(default = Arc::new(UnsupportedCodec))]
    pub decompressor: Arc<dyn Decompressor>,
    /// Receives finished products.
    pub router: Arc<dyn FileRouter>,
}

struct Channel {
    reassembler: Reassembler,
    assembler: ProductAssembler,
    stats: Stats,
}

impl Channel {
    fn new(config: &DemuxConfig, vcid: Vcid) -> Self {
        Channel {
            reassembler: Reassembler::new(vcid, config.ignore_counter_jump),
            assembler: ProductAssembler::new(
                vcid,
                &config.temp_dir,
                config.parser.clone(),
                config.decompressor.clone(),
                config.router.clone(),
            )
            .with_timeout(config.product_timeout),
            stats: Stats::default(),
        }
    }
}

struct Capture {
    dir: PathBuf,
    path: PathBuf,
    writer: BufWriter<File>,
}

impl Capture {
    fn create(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("demuxdump-{}.bin", Utc::now().timestamp_millis()));
        let writer = BufWriter::new(File::create(&path)?);
        Ok(Capture {
            dir: dir.to_path_buf(),
            path,
            writer,
        })
    }

    fn close(mut self) -> PathBuf {
        if let Err(err) = self.writer.flush() {
            error!(path = ?self.path, "failed to flush capture: {err}");
        }
        self.path
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Routes frames to a per-channel [Reassembler] and [ProductAssembler].
///
/// Each channel has its own lock so frames for different channels may be processed
/// concurrently from multiple threads. Frames for the same channel must be provided in
/// the order received.
pub struct Demultiplexer {
    config: DemuxConfig,
    channels: Mutex<HashMap<Vcid, Arc<Mutex<Channel>>>>,
    stats: Mutex<Stats>,
    capture: Mutex<Option<Capture>>,
}

impl Demultiplexer {
    #[must_use]
    pub fn new(config: DemuxConfig) -> Self {
        Demultiplexer {
            config,
            channels: Mutex::default(),
            stats: Mutex::default(),
            capture: Mutex::default(),
        }
    }

    /// Process one raw frame.
    ///
    /// # Errors
    /// [crate::Error::InvalidFrameSize] if `dat` is not exactly one frame. All other
    /// problems with the frame or its contents are logged and counted in the stats.
    pub fn process_frame(&self, dat: &[u8]) -> Result<()> {
        let frame = Frame::decode(dat)?;
        self.capture_frame(dat);

        if frame.is_fill() {
            lock(&self.stats).fill_frames += 1;
            return Ok(());
        }

        let vcid = frame.header.vcid;
        let span = span!(Level::TRACE, "frame", vcid, counter = frame.header.counter);
        let _guard = span.enter();

        let channel = self.channel(vcid);
        let mut delta = Stats::default();
        {
            let mut guard = lock(&channel);
            let channel = &mut *guard;
            let packets = channel.reassembler.process_frame(&frame, &mut delta);
            for packet in &packets {
                let delivered = channel.assembler.handle_packet(packet);
                count_products(&mut delta, &delivered);
            }
            channel.stats.add(&delta);
        }
        lock(&self.stats).add(&delta);

        Ok(())
    }

    fn channel(&self, vcid: Vcid) -> Arc<Mutex<Channel>> {
        let mut channels = lock(&self.channels);
        channels
            .entry(vcid)
            .or_insert_with(|| {
                info!(vcid, "new channel");
                Arc::new(Mutex::new(Channel::new(&self.config, vcid)))
            })
            .clone()
    }

    fn channel_list(&self) -> Vec<(Vcid, Arc<Mutex<Channel>>)> {
        lock(&self.channels)
            .iter()
            .map(|(vcid, ch)| (*vcid, ch.clone()))
            .collect()
    }

    /// Snapshot of the statistics for all channels.
    #[must_use]
    pub fn stats(&self) -> Stats {
        lock(&self.stats).clone()
    }

    /// Snapshot of the statistics for a single channel.
    #[must_use]
    pub fn channel_stats(&self, vcid: Vcid) -> Option<Stats> {
        let channel = lock(&self.channels).get(&vcid).cloned()?;
        let stats = lock(&channel).stats.clone();
        Some(stats)
    }

    /// Channels seen so far, in ascending order.
    #[must_use]
    pub fn vcids(&self) -> Vec<Vcid> {
        let mut vcids: Vec<Vcid> = lock(&self.channels).keys().copied().collect();
        vcids.sort_unstable();
        vcids
    }

    /// Clear the packet and product state of one channel, e.g., after the channel
    /// was re-acquired. Counters are kept.
    pub fn reset_channel(&self, vcid: Vcid) {
        let Some(channel) = lock(&self.channels).get(&vcid).cloned() else {
            return;
        };
        let mut channel = lock(&channel);
        debug!(vcid, reassembler = %channel.reassembler, "resetting channel");
        channel.reassembler.reset();
        channel.assembler.clear();
    }

    /// Drop all channels and zero all counters. An active capture is continued in a
    /// new file.
    pub fn reset(&self) {
        {
            let mut channels = lock(&self.channels);
            for channel in channels.values() {
                lock(channel).assembler.clear();
            }
            channels.clear();
        }
        *lock(&self.stats) = Stats::default();

        let mut capture = lock(&self.capture);
        if let Some(current) = capture.take() {
            let dir = current.dir.clone();
            current.close();
            match Capture::create(&dir) {
                Ok(next) => *capture = Some(next),
                Err(err) => error!(dir = ?dir, "failed to restart capture: {err}"),
            }
        }
        info!("demultiplexer reset");
    }

    /// Deliver products on all channels that have not seen a packet within the
    /// configured timeout.
    pub fn flush_expired(&self) -> Vec<Delivery> {
        let now = Instant::now();
        let mut all = Vec::default();
        for (_, channel) in self.channel_list() {
            let mut delta = Stats::default();
            {
                let mut channel = lock(&channel);
                let delivered = channel.assembler.flush_expired(now);
                count_products(&mut delta, &delivered);
                channel.stats.add(&delta);
                all.extend(delivered);
            }
            lock(&self.stats).add(&delta);
        }
        all
    }

    /// Start writing raw frames to a new `demuxdump-<millis>.bin` in `dir`. Does nothing
    /// if a capture is already active. Returns the active capture file.
    ///
    /// # Errors
    /// If the capture file cannot be created.
    pub fn start_capture<P: AsRef<Path>>(&self, dir: P) -> Result<PathBuf> {
        let mut capture = lock(&self.capture);
        if let Some(current) = capture.as_ref() {
            return Ok(current.path.clone());
        }
        let next = Capture::create(dir.as_ref())?;
        info!(path = ?next.path, "capture started");
        let path = next.path.clone();
        *capture = Some(next);
        Ok(path)
    }

    /// Stop capturing, returning the finished capture file. Does nothing if no capture
    /// is active.
    pub fn stop_capture(&self) -> Option<PathBuf> {
        let path = lock(&self.capture).take().map(Capture::close);
        if let Some(ref path) = path {
            info!(path = ?path, "capture stopped");
        }
        path
    }

    #[must_use]
    pub fn capture_path(&self) -> Option<PathBuf> {
        lock(&self.capture).as_ref().map(|c| c.path.clone())
    }

    fn capture_frame(&self, dat: &[u8]) {
        if let Some(capture) = lock(&self.capture).as_mut() {
            if let Err(err) = capture.writer.write_all(dat) {
                error!(path = ?capture.path, "failed to write capture: {err}");
            }
        }
    }
}

impl Drop for Demultiplexer {
    fn drop(&mut self) {
        self.stop_capture();
    }
}

fn count_products(stats: &mut Stats, delivered: &[Delivery]) {
    for delivery in delivered {
        if let Some(id) = delivery.product_id {
            *stats.products.entry(id).or_default() += 1;
        }
    }
}
