//! Transport framing.
//!
//! Each capture transport gets one adapter that slices its line/frame syntax
//! into the uniform [`Packet`] type. Adapters recognize syntax only; they
//! know nothing about reassembly or housekeeping semantics.
mod ha;
mod labview;
mod swis;

use std::fmt::Display;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::Serialize;

use crate::Result;

pub use ha::HaFrames;
pub use labview::LabViewFrames;
pub use swis::{SwisDialect, SwisFrames};

pub type UnitId = u16;

/// Where a capture came from. Affects framing syntax and is carried through
/// to decoded records and sidecar metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Rover `.ha` ASCII packet dump.
    RoverHa,
    /// LabView RMAP export (`time \t hex` lines).
    LabView,
    /// SWIS acquisition log export.
    Swis,
}

impl Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::RoverHa => write!(f, "rover_ha"),
            SourceKind::LabView => write!(f, "labview"),
            SourceKind::Swis => write!(f, "swis"),
        }
    }
}

/// Position of a packet within a fragmented transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketRole {
    /// Opens a transfer; payload begins with the transfer header.
    First,
    /// Intermediate fragment.
    Middle,
    /// Closes a transfer.
    End,
    /// Not part of a fragmented transfer; `unit_id`/`sequence` are
    /// meaningless.
    Other,
}

/// One transport frame in uniform shape.
///
/// For `First`/`Middle`/`End` packets `data` holds the bytes after the
/// 4-byte unit-id + sequence prefix with the 2-byte link CRC already
/// stripped; a `First` packet's data begins with the 9-byte transfer header.
/// For `Other` packets `data` is the whole decoded block.
#[derive(Debug, Clone, Serialize)]
pub struct Packet {
    pub unit_id: UnitId,
    pub sequence: u16,
    pub role: PacketRole,
    pub data: Vec<u8>,
    /// Opaque timestamp token copied from the origin log line, if any.
    pub timestamp: Option<String>,
    pub source: SourceKind,
}

impl Display for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Packet{{unit={}, seq={}, role={:?}, len={}}}",
            self.unit_id,
            self.sequence,
            self.role,
            self.data.len()
        )
    }
}

/// Capture transport selection for [`open_frames`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    RoverHa,
    LabView,
    Swis,
    SwisNsvf,
}

/// Open `path` with the adapter for `transport`.
///
/// The returned iterator is lazy and finite; dropping it and calling
/// [`open_frames`] again restarts from the top of the file.
///
/// # Errors
/// [`crate::Error::Io`] if the file cannot be opened.
pub fn open_frames(
    path: &Path,
    transport: Transport,
) -> Result<Box<dyn Iterator<Item = Result<Packet>>>> {
    let reader = BufReader::new(File::open(path)?);
    Ok(match transport {
        Transport::RoverHa => Box::new(HaFrames::new(reader)),
        Transport::LabView => Box::new(LabViewFrames::new(reader)),
        Transport::Swis => Box::new(SwisFrames::new(reader, SwisDialect::Standard)),
        Transport::SwisNsvf => Box::new(SwisFrames::new(reader, SwisDialect::Nsvf)),
    })
}
