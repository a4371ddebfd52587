use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};
use xrit::framing::read_frames_threaded;
use xrit::{Demultiplexer, DemuxConfig, DirectoryRouter, Stats, Vcid};

use crate::render::{self, Format};

/// Frames buffered between the reader thread and the demultiplexer.
const READ_BUFFER: usize = 1024;

#[derive(Debug, Serialize)]
struct Summary {
    input: String,
    output: String,
    invalid_frames: u64,
    capture: Option<String>,
    stats: Stats,
    products_total: u64,
    channels: BTreeMap<Vcid, Stats>,
}

pub fn demux(
    input: &Path,
    output: &Path,
    temp: Option<&Path>,
    capture: Option<&Path>,
    count_jumps: bool,
    format: &Format,
) -> Result<()> {
    let temp = temp.map_or_else(|| output.join("tmp"), Path::to_path_buf);
    let demux = Demultiplexer::new(
        DemuxConfig::builder()
            .temp_dir(&temp)
            .ignore_counter_jump(!count_jumps)
            .router(Arc::new(DirectoryRouter::new(output)))
            .build(),
    );

    let capture = match capture {
        Some(dir) => {
            let path = demux
                .start_capture(dir)
                .with_context(|| format!("starting capture in {dir:?}"))?;
            info!("capturing frames to {path:?}");
            Some(path)
        }
        None => None,
    };

    let file = File::open(input).with_context(|| format!("opening input {input:?}"))?;
    info!("demultiplexing {input:?} to {output:?}");

    let mut invalid_frames = 0;
    for (idx, zult) in read_frames_threaded(file, READ_BUFFER).enumerate() {
        let processed = zult.and_then(|dat| demux.process_frame(&dat));
        if let Err(err) = processed {
            warn!("frame {idx}: {err}");
            invalid_frames += 1;
        }
    }
    demux.stop_capture();

    let stats = demux.stats();
    let channels = demux
        .vcids()
        .into_iter()
        .filter_map(|vcid| demux.channel_stats(vcid).map(|s| (vcid, s)))
        .collect();
    let summary = Summary {
        input: input.to_string_lossy().to_string(),
        output: output.to_string_lossy().to_string(),
        invalid_frames,
        capture: capture.map(|p| p.to_string_lossy().to_string()),
        products_total: stats.products_total(),
        stats,
        channels,
    };

    render::write(&summary, format, TEXT_TEMPLATE)
}

const TEXT_TEMPLATE: &str = r"{{ input }} -> {{ output }}
===============================================================================================
Frames:       {{ stats.frames }} ({{ stats.fill_frames }} fill, {{ invalid_frames }} invalid)
Replayed:     {{ stats.replayed }}
Duplicates:   {{ stats.duplicates }}
Frame loss:   {{ stats.frame_loss }} ({{ stats.frame_jumps }} jumps)
Packets:      {{ stats.packets }}
CRC fails:    {{ stats.crc_fails }}
Length fails: {{ stats.length_fails }}
Bugs:         {{ stats.bugs }}
Products:     {{ products_total }}
{{ #if capture }}Capture:      {{ capture }}
{{ /if }}-----------------------------------------------------------------------------------------------
VCID    Frames   Packets   CRC Fails   Length Fails   Frame Loss   Jumps
-----------------------------------------------------------------------------------------------
{{ #each channels }}{{ lpad 4 @key }}  {{ lpad 8 frames }}  {{ lpad 8 packets }}  {{ lpad 10 crc_fails }}  {{ lpad 13 length_fails }}  {{ lpad 11 frame_loss }}  {{ lpad 6 frame_jumps }}
{{ /each }}-----------------------------------------------------------------------------------------------
Product ID   Count
-----------------------------------------------------------------------------------------------
{{ #each stats.products }}{{ lpad 10 @key }}  {{ lpad 6 this }}
{{ /each }}";
