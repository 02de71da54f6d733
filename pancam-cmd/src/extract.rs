use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use pancam::framing::{open_frames, PacketRole, Transport};
use pancam::ldt::{FileSinkFactory, ReassemblyConfig, ReassemblyContext};
use tracing::{error, info};

pub fn extract(
    inputs: &[PathBuf],
    transport: Transport,
    output: &Path,
    max_buffered: usize,
) -> Result<()> {
    let config = ReassemblyConfig::builder()
        .max_buffered_fragments(max_buffered)
        .build();
    let mut ctx = ReassemblyContext::with_config(FileSinkFactory::new(output), config);

    let mut packets = 0usize;
    let mut failed = 0usize;
    for input in inputs {
        let name = input.display().to_string();
        ctx.set_context(name.clone());
        let frames = match open_frames(input, transport) {
            Ok(frames) => frames,
            Err(err) => {
                error!(capture = %name, %err, "cannot open capture");
                failed += 1;
                continue;
            }
        };
        for frame in frames {
            match frame {
                Ok(packet) => {
                    packets += 1;
                    if packet.role != PacketRole::Other {
                        ctx.ingest(&packet)
                            .with_context(|| format!("writing payload from {name}"))?;
                    }
                }
                Err(err) => {
                    // a broken capture loses the rest of that file only
                    error!(capture = %name, %err, "malformed capture; skipping remainder");
                    failed += 1;
                    break;
                }
            }
        }
    }

    let out = ctx.finalize().context("finalizing transfers")?;

    fs::create_dir_all(output)?;
    let mut ledger = BufWriter::new(File::create(output.join("anomalies.jsonl"))?);
    for entry in out.report.entries() {
        serde_json::to_writer(&mut ledger, entry)?;
        ledger.write_all(b"\n")?;
    }
    ledger.flush()?;

    let mut manifest = BufWriter::new(File::create(output.join("transfers.jsonl"))?);
    for transfer in &out.transfers {
        serde_json::to_writer(&mut manifest, transfer)?;
        manifest.write_all(b"\n")?;
    }
    manifest.flush()?;

    let complete = out
        .transfers
        .iter()
        .filter(|transfer| transfer.outcome.complete)
        .count();
    let summary = out.report.summary();
    info!(
        captures = inputs.len(),
        failed,
        packets,
        transfers = out.transfers.len(),
        complete,
        anomalies = summary.total,
        "extract finished"
    );
    for (category, count) in &summary.counts {
        info!("  {category}: {count}");
    }
    Ok(())
}
