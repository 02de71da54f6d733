use std::collections::BTreeMap;
use std::io::{stdout, Write};
use std::path::Path;

use anyhow::Result;
use pancam::framing::{open_frames, PacketRole, Transport, UnitId};
use serde::Serialize;

#[derive(Debug, Clone)]
pub enum Format {
    Json,
    Text,
}

impl clap::ValueEnum for Format {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Json, Self::Text]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        match self {
            Self::Json => Some(clap::builder::PossibleValue::new("json")),
            Self::Text => Some(clap::builder::PossibleValue::new("text")),
        }
    }
}

#[derive(Debug, Default, Clone, Serialize)]
struct RoleCounts {
    first: usize,
    middle: usize,
    end: usize,
    other: usize,
}

#[derive(Debug, Default, Clone, Serialize)]
struct UnitSummary {
    packets: usize,
    payload_bytes: u64,
    first_seen: bool,
    end_seen: bool,
}

#[derive(Debug, Serialize)]
struct Info {
    filename: String,
    packets: usize,
    roles: RoleCounts,
    units: BTreeMap<UnitId, UnitSummary>,
    /// Set when the capture broke mid-file; counts cover the clean prefix.
    framing_error: Option<String>,
}

fn summarize(input: &Path, transport: Transport) -> Result<Info> {
    let mut info = Info {
        filename: input.display().to_string(),
        packets: 0,
        roles: RoleCounts::default(),
        units: BTreeMap::new(),
        framing_error: None,
    };
    for frame in open_frames(input, transport)? {
        let packet = match frame {
            Ok(packet) => packet,
            Err(err) => {
                info.framing_error = Some(err.to_string());
                break;
            }
        };
        info.packets += 1;
        match packet.role {
            PacketRole::First => info.roles.first += 1,
            PacketRole::Middle => info.roles.middle += 1,
            PacketRole::End => info.roles.end += 1,
            PacketRole::Other => {
                info.roles.other += 1;
                continue;
            }
        }
        let unit = info.units.entry(packet.unit_id).or_default();
        unit.packets += 1;
        unit.payload_bytes += packet.data.len() as u64;
        match packet.role {
            PacketRole::First => unit.first_seen = true,
            PacketRole::End => unit.end_seen = true,
            _ => {}
        }
    }
    Ok(info)
}

fn render(info: &Info, out: &mut impl Write) -> Result<()> {
    writeln!(out, "{}", info.filename)?;
    writeln!(out, "  packets: {}", info.packets)?;
    writeln!(
        out,
        "  roles: first={} middle={} end={} other={}",
        info.roles.first, info.roles.middle, info.roles.end, info.roles.other
    )?;
    writeln!(out, "  units: {}", info.units.len())?;
    for (unit_id, unit) in &info.units {
        writeln!(
            out,
            "    {unit_id:5}  packets={:<6} bytes={:<10} first={} end={}",
            unit.packets, unit.payload_bytes, unit.first_seen, unit.end_seen
        )?;
    }
    if let Some(err) = &info.framing_error {
        writeln!(out, "  capture broke mid-file: {err}")?;
    }
    Ok(())
}

pub fn info(input: &Path, format: &Format, transport: Transport) -> Result<()> {
    let info = summarize(input, transport)?;
    let mut out = stdout().lock();
    match format {
        Format::Json => {
            serde_json::to_writer_pretty(&mut out, &info)?;
            writeln!(&mut out)?;
        }
        Format::Text => render(&info, &mut out)?,
    }
    Ok(())
}
