mod extract;
mod hk;
mod info;

use std::io::stderr;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use pancam::framing::Transport;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone)]
enum TransportArg {
    RoverHa,
    LabView,
    Swis,
    SwisNsvf,
}

impl clap::ValueEnum for TransportArg {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::RoverHa, Self::LabView, Self::Swis, Self::SwisNsvf]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        match self {
            Self::RoverHa => Some(clap::builder::PossibleValue::new("rover-ha")),
            Self::LabView => Some(clap::builder::PossibleValue::new("labview")),
            Self::Swis => Some(clap::builder::PossibleValue::new("swis")),
            Self::SwisNsvf => Some(clap::builder::PossibleValue::new("swis-nsvf")),
        }
    }
}

impl TransportArg {
    fn transport(&self) -> Transport {
        match self {
            Self::RoverHa => Transport::RoverHa,
            Self::LabView => Transport::LabView,
            Self::Swis => Transport::Swis,
            Self::SwisNsvf => Transport::SwisNsvf,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Reassemble downlinked files from capture files.
    ///
    /// Captures are processed in the order given, which must be downlink
    /// order for transfers spanning captures to reconnect. Each reassembled
    /// file is written with a JSON sidecar describing the transfer;
    /// everything unusual about the run lands in anomalies.jsonl next to
    /// them. A malformed capture aborts that file only.
    Extract {
        /// Capture transport format.
        #[arg(short, long, default_value = "rover-ha")]
        transport: TransportArg,

        /// Directory for reassembled files, sidecars, and the anomaly
        /// ledger.
        #[arg(short, long, default_value = "extracted", value_name = "dir")]
        output: PathBuf,

        /// Cap on buffered out-of-order fragments per transfer unit.
        #[arg(long, default_value_t = 4096, value_name = "count")]
        max_buffered: usize,

        /// Input capture files, in downlink order.
        inputs: Vec<PathBuf>,
    },
    /// Decode housekeeping blocks to JSON records.
    ///
    /// The input is either a reassembled housekeeping file produced by
    /// extract, or a bench capture export with one block per frame. Records
    /// are emitted as JSON lines; structurally broken blocks are dropped
    /// with their raw bytes preserved in the anomaly ledger.
    Hk {
        /// What the input file holds.
        #[arg(short, long, default_value = "essential")]
        source: hk::Source,

        /// Records file (JSON lines). Defaults to stdout.
        #[arg(short, long, value_name = "path")]
        output: Option<PathBuf>,

        /// Write anomaly ledger entries to this file (JSON lines).
        #[arg(short, long, value_name = "path")]
        anomalies: Option<PathBuf>,

        /// Input file.
        input: PathBuf,
    },
    /// Show packet statistics for a capture file.
    Info {
        /// Capture transport format.
        #[arg(short, long, default_value = "rover-ha")]
        transport: TransportArg,

        /// Output format.
        #[arg(short, long, default_value = "text")]
        format: info::Format,

        /// Input capture file.
        input: PathBuf,
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
            EnvFilter::try_from_env("PANCAM_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    debug!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    match &cli.command {
        Commands::Extract {
            transport,
            output,
            max_buffered,
            inputs,
        } => extract::extract(inputs, transport.transport(), output, *max_buffered),
        Commands::Hk {
            source,
            output,
            anomalies,
            input,
        } => hk::decode(input, source, output.as_deref(), anomalies.as_deref()),
        Commands::Info {
            transport,
            format,
            input,
        } => info::info(input, format, transport.transport()),
    }
}
