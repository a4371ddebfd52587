mod demux;
mod families;
mod organize;
mod render;

use std::io::stderr;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use render::Format;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Demultiplex a file of raw LRIT/HRIT transfer frames into product files.
    ///
    /// Finished products are filed into folders by kind under --output. Statistics
    /// for the whole input and for each virtual channel are printed when done.
    Demux {
        /// Input file of back to back 892 byte frames.
        input: PathBuf,

        /// Directory finished products are filed into.
        #[arg(short, long, default_value = "output", value_name = "path")]
        output: PathBuf,

        /// Directory for products still being assembled. Defaults to <output>/tmp.
        #[arg(short, long, value_name = "path")]
        temp: Option<PathBuf>,

        /// Also write all raw frames to a capture file in this directory.
        #[arg(short, long, value_name = "path")]
        capture: Option<PathBuf>,

        /// Count frames lost across backward counter jumps and counter wraps.
        #[arg(long, action)]
        count_jumps: bool,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: Format,
    },
    /// Group image segment files into multi-channel products.
    ///
    /// Runs a single scan of the folder and prints the groups found.
    Organize {
        /// Folder containing finished image segments.
        folder: PathBuf,

        /// Family table JSON merged with the built-in families.
        #[arg(long, value_name = "path")]
        families: Option<PathBuf>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: Format,
    },
    /// Show the satellite family table used to organize image segments.
    Families {
        /// Family table JSON merged with the built-in families.
        #[arg(long, value_name = "path")]
        families: Option<PathBuf>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: Format,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(stderr)
        .with_ansi(false)
        .without_time()
        .with_env_filter(
            EnvFilter::try_from_env("XRIT_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    debug!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    match &cli.command {
        Commands::Demux {
            input,
            output,
            temp,
            capture,
            count_jumps,
            format,
        } => demux::demux(
            input,
            output,
            temp.as_deref(),
            capture.as_deref(),
            *count_jumps,
            format,
        ),
        Commands::Organize {
            folder,
            families,
            format,
        } => organize::organize(folder, families.as_deref(), format),
        Commands::Families { families, format } => {
            families::families(families.as_deref(), format)
        }
    }
}
