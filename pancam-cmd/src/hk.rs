use std::fs::{self, File};
use std::io::{stdout, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use pancam::framing::{open_frames, Transport};
use pancam::hk::{HkDecoder, HousekeepingRecord};
use pancam::report::Report;
use tracing::{error, info};

#[derive(Debug, Clone)]
pub enum Source {
    /// Reassembled essential housekeeping file, 72-byte blocks.
    Essential,
    /// Reassembled non-essential housekeeping file, 88-byte blocks.
    NonEssential,
    Swis,
    SwisNsvf,
    LabView,
}

impl clap::ValueEnum for Source {
    fn value_variants<'a>() -> &'a [Self] {
        &[
            Self::Essential,
            Self::NonEssential,
            Self::Swis,
            Self::SwisNsvf,
            Self::LabView,
        ]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        match self {
            Self::Essential => Some(clap::builder::PossibleValue::new("essential")),
            Self::NonEssential => Some(clap::builder::PossibleValue::new("non-essential")),
            Self::Swis => Some(clap::builder::PossibleValue::new("swis")),
            Self::SwisNsvf => Some(clap::builder::PossibleValue::new("swis-nsvf")),
            Self::LabView => Some(clap::builder::PossibleValue::new("labview")),
        }
    }
}

/// Decode one block per captured frame.
fn from_capture(
    input: &Path,
    transport: Transport,
    decoder: &mut HkDecoder,
    report: &mut Report,
) -> Result<Vec<HousekeepingRecord>> {
    let mut records = Vec::new();
    for frame in open_frames(input, transport)? {
        match frame {
            Ok(packet) => {
                if let Some(record) = decoder.decode(&packet.data, report) {
                    records.push(record);
                }
            }
            Err(err) => {
                error!(%err, "malformed capture; skipping remainder");
                break;
            }
        }
    }
    Ok(records)
}

pub fn decode(
    input: &Path,
    source: &Source,
    output: Option<&Path>,
    anomalies: Option<&Path>,
) -> Result<()> {
    let mut decoder = HkDecoder::new();
    let mut report = Report::new();
    report.set_context(input.display().to_string());

    let records = match source {
        Source::Essential => {
            let blob = fs::read(input).with_context(|| format!("reading {input:?}"))?;
            decoder.decode_blob(&blob, true, &mut report)
        }
        Source::NonEssential => {
            let blob = fs::read(input).with_context(|| format!("reading {input:?}"))?;
            decoder.decode_blob(&blob, false, &mut report)
        }
        Source::Swis => from_capture(input, Transport::Swis, &mut decoder, &mut report)?,
        Source::SwisNsvf => from_capture(input, Transport::SwisNsvf, &mut decoder, &mut report)?,
        Source::LabView => from_capture(input, Transport::LabView, &mut decoder, &mut report)?,
    };

    let mut dest: Box<dyn Write> = match output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("creating {path:?}"))?,
        )),
        None => Box::new(stdout().lock()),
    };
    for record in &records {
        serde_json::to_writer(&mut dest, record)?;
        dest.write_all(b"\n")?;
    }
    dest.flush()?;

    if let Some(path) = anomalies {
        let mut ledger = BufWriter::new(
            File::create(path).with_context(|| format!("creating {path:?}"))?,
        );
        for entry in report.entries() {
            serde_json::to_writer(&mut ledger, entry)?;
            ledger.write_all(b"\n")?;
        }
        ledger.flush()?;
    }

    let summary = report.summary();
    info!(
        records = records.len(),
        anomalies = summary.total,
        "housekeeping decode finished"
    );
    Ok(())
}
