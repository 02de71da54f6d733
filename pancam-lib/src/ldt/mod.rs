//! Large data transfer reassembly.
//!
//! Downlinked files arrive as `First`/`Middle`/`End` packet chains keyed by
//! a 16-bit unit id with a per-unit sequence counter. Chains interleave
//! across units and packets arrive out of order, so reassembly is a keyed
//! state machine: in-sequence payload goes straight to the unit's sink,
//! early fragments wait in a bounded per-unit buffer and are drained as the
//! expected sequence catches up.
mod sink;

use std::collections::{HashMap, VecDeque};
use std::io::Write;

use serde::Serialize;
use tracing::{debug, trace};
use typed_builder::TypedBuilder;

use crate::framing::{Packet, PacketRole, SourceKind, UnitId};
use crate::report::{Anomaly, Report};
use crate::{bits, Result};

pub use sink::{FileSinkFactory, MemSinkFactory, SinkFactory, TransferOutcome};

/// Byte count of one uncompressed full-frame image.
pub const IMAGE_SIZE: u64 = 1024 * 1024 * 2;

/// Instrument identifier carried in the file-id subfields.
const CAMERA_IDENTIFIER: u8 = 5;

/// Content family declared by a transfer's file-id subfields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    NonEssentialHk,
    EssentialHk,
    Science,
    /// Not a camera file id.
    Other,
}

/// Header at the front of every `First` packet payload.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TransferHeader {
    pub part_id: u8,
    pub file_id: u16,
    pub file_size: u32,
    pub file_type: u8,
    /// Instrument identifier subfield of `file_id`.
    pub identifier: u8,
    /// Content family subfield of `file_id`.
    pub data_type: u8,
    /// Temporary-file subfield of `file_id`.
    pub temp_flag: bool,
    /// Rolling per-family counter subfield of `file_id`.
    pub counter: u8,
}

impl TransferHeader {
    pub const LEN: usize = 9;

    /// Decode from the front of a `First` packet payload. `None` when the
    /// payload is too short to hold a header.
    #[must_use]
    pub fn decode(dat: &[u8]) -> Option<Self> {
        if dat.len() < Self::LEN {
            return None;
        }
        Some(TransferHeader {
            part_id: dat[0],
            file_id: u16::from_be_bytes([dat[1], dat[2]]),
            file_size: u32::from_be_bytes([dat[3], dat[4], dat[5], dat[6]]),
            file_type: dat[7],
            identifier: bits::unpack(dat, 1, 1, 4) as u8,
            data_type: bits::unpack(dat, 1, 5, 2) as u8,
            temp_flag: bits::unpack(dat, 1, 7, 1) == 1,
            counter: dat[2],
        })
    }

    #[must_use]
    pub fn kind(&self) -> FileKind {
        if self.identifier != CAMERA_IDENTIFIER {
            return FileKind::Other;
        }
        match self.data_type {
            0 => FileKind::NonEssentialHk,
            1 => FileKind::EssentialHk,
            _ => FileKind::Science,
        }
    }
}

/// Identity of one transfer occurrence. The occurrence counter
/// disambiguates re-use of a unit id within a run.
#[derive(Debug, Clone, Serialize)]
pub struct UnitMeta {
    pub unit_id: UnitId,
    pub occurrence: u16,
    pub source: SourceKind,
    pub header: TransferHeader,
}

/// Size-based verdict on a reassembled payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Exactly one uncompressed full frame.
    Image,
    /// A whole number of uncompressed full frames.
    MultipleImages,
    /// Science payload of any other size.
    LikelyCompressed,
    Housekeeping,
    Other,
}

/// Classify a reassembled payload from its declared kind and actual size.
#[must_use]
pub fn classify(kind: FileKind, bytes: u64) -> Classification {
    match kind {
        FileKind::NonEssentialHk | FileKind::EssentialHk => Classification::Housekeeping,
        FileKind::Other => Classification::Other,
        FileKind::Science => {
            if bytes == IMAGE_SIZE {
                Classification::Image
            } else if bytes > 0 && bytes % IMAGE_SIZE == 0 {
                Classification::MultipleImages
            } else {
                Classification::LikelyCompressed
            }
        }
    }
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct ReassemblyConfig {
    /// Cap on out-of-order fragments held per unit. When full, the oldest
    /// buffered fragment is evicted and reported.
    #[builder(default = 4096)]
    pub max_buffered_fragments: usize,
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        ReassemblyConfig::builder().build()
    }
}

/// One finished transfer, complete or not. Serialized as the per-run
/// transfer manifest.
#[derive(Debug, Clone, Serialize)]
pub struct TransferRecord {
    #[serde(flatten)]
    pub meta: UnitMeta,
    #[serde(flatten)]
    pub outcome: TransferOutcome,
}

/// Everything a run produced besides the payload bytes themselves.
#[derive(Debug)]
pub struct ReassemblyOutput {
    pub transfers: Vec<TransferRecord>,
    pub report: Report,
}

/// Bounded holding pen for out-of-order fragments of one unit.
struct FragmentBuffer {
    frags: VecDeque<(u16, Vec<u8>, PacketRole)>,
    cap: usize,
}

impl FragmentBuffer {
    fn new(cap: usize) -> Self {
        FragmentBuffer {
            frags: VecDeque::new(),
            cap,
        }
    }

    fn contains(&self, sequence: u16) -> bool {
        self.frags.iter().any(|(seq, _, _)| *seq == sequence)
    }

    /// Insert in arrival order, returning the evicted oldest fragment when
    /// the buffer is at capacity.
    fn insert(
        &mut self,
        sequence: u16,
        data: Vec<u8>,
        role: PacketRole,
    ) -> Option<(u16, Vec<u8>)> {
        let evicted = if self.frags.len() >= self.cap {
            self.frags.pop_front().map(|(seq, data, _)| (seq, data))
        } else {
            None
        };
        self.frags.push_back((sequence, data, role));
        evicted
    }

    fn take(&mut self, sequence: u16) -> Option<(Vec<u8>, PacketRole)> {
        let at = self.frags.iter().position(|(seq, _, _)| *seq == sequence)?;
        self.frags.remove(at).map(|(_, data, role)| (data, role))
    }

    fn is_empty(&self) -> bool {
        self.frags.is_empty()
    }
}

struct OpenUnit<S> {
    meta: UnitMeta,
    next_seq: u16,
    bytes_written: u64,
    sink: S,
}

/// The keyed reassembly state machine for one run.
///
/// Feed packets in capture order with [`ingest`](Self::ingest); call
/// [`finalize`](Self::finalize) once at the end to flush open units and
/// account for leftover fragments.
pub struct ReassemblyContext<F: SinkFactory> {
    factory: F,
    config: ReassemblyConfig,
    open: HashMap<UnitId, OpenUnit<F::Sink>>,
    pending: HashMap<UnitId, FragmentBuffer>,
    occurrences: HashMap<UnitId, u16>,
    transfers: Vec<TransferRecord>,
    report: Report,
}

impl<F: SinkFactory> ReassemblyContext<F> {
    pub fn new(factory: F) -> Self {
        Self::with_config(factory, ReassemblyConfig::default())
    }

    pub fn with_config(factory: F, config: ReassemblyConfig) -> Self {
        ReassemblyContext {
            factory,
            config,
            open: HashMap::new(),
            pending: HashMap::new(),
            occurrences: HashMap::new(),
            transfers: Vec::new(),
            report: Report::new(),
        }
    }

    /// Set the context label attached to subsequently recorded anomalies.
    pub fn set_context<S: Into<String>>(&mut self, context: S) {
        self.report.set_context(context);
    }

    /// Apply one packet. Packets with [`PacketRole::Other`] are ignored.
    ///
    /// # Errors
    /// [`crate::Error::Io`] when the unit's sink fails; anything protocol
    /// level is recorded in the report instead.
    pub fn ingest(&mut self, packet: &Packet) -> Result<()> {
        match packet.role {
            PacketRole::First => self.handle_first(packet),
            PacketRole::Middle | PacketRole::End => self.handle_part(packet),
            PacketRole::Other => Ok(()),
        }
    }

    fn handle_first(&mut self, packet: &Packet) -> Result<()> {
        let unit_id = packet.unit_id;
        if let Some(unit) = self.open.remove(&unit_id) {
            self.report.record(Anomaly::SupersededTransfer {
                unit_id,
                occurrence: unit.meta.occurrence,
            });
            self.close_unit(unit, false)?;
        }

        let Some(header) = TransferHeader::decode(&packet.data) else {
            self.report.record(Anomaly::LengthMismatch {
                unit_id,
                declared: TransferHeader::LEN as u64,
                actual: packet.data.len() as u64,
            });
            return Ok(());
        };

        let occurrence = {
            let count = self.occurrences.entry(unit_id).or_insert(0);
            *count += 1;
            *count
        };
        let meta = UnitMeta {
            unit_id,
            occurrence,
            source: packet.source,
            header,
        };
        debug!(unit_id, occurrence, file_id = header.file_id, "transfer opened");

        let mut sink = self.factory.create(&meta)?;
        let payload = &packet.data[TransferHeader::LEN..];
        sink.write_all(payload)?;
        self.open.insert(
            unit_id,
            OpenUnit {
                meta,
                next_seq: packet.sequence.wrapping_add(1),
                bytes_written: payload.len() as u64,
                sink,
            },
        );
        self.drain(unit_id)
    }

    fn handle_part(&mut self, packet: &Packet) -> Result<()> {
        let unit_id = packet.unit_id;
        let Some(next_seq) = self.open.get(&unit_id).map(|unit| unit.next_seq) else {
            trace!(unit_id, sequence = packet.sequence, "fragment before first");
            self.buffer(packet);
            return Ok(());
        };
        if packet.sequence == next_seq {
            if packet.role == PacketRole::End {
                if let Some(unit) = self.open.remove(&unit_id) {
                    self.close_unit(unit, true)?;
                }
            } else if let Some(unit) = self.open.get_mut(&unit_id) {
                unit.sink.write_all(&packet.data)?;
                unit.bytes_written += packet.data.len() as u64;
                unit.next_seq = unit.next_seq.wrapping_add(1);
            }
            self.drain(unit_id)
        } else if packet.sequence < next_seq {
            // already applied; idempotent
            self.report.record(Anomaly::DuplicateFragment {
                unit_id,
                sequence: packet.sequence,
            });
            Ok(())
        } else {
            self.report.record(Anomaly::SequenceAnomaly {
                unit_id,
                expected: next_seq,
                got: packet.sequence,
            });
            self.buffer(packet);
            Ok(())
        }
    }

    fn buffer(&mut self, packet: &Packet) {
        let cap = self.config.max_buffered_fragments;
        let buf = self
            .pending
            .entry(packet.unit_id)
            .or_insert_with(|| FragmentBuffer::new(cap));
        if buf.contains(packet.sequence) {
            self.report.record(Anomaly::DuplicateFragment {
                unit_id: packet.unit_id,
                sequence: packet.sequence,
            });
            return;
        }
        if let Some((sequence, data)) = buf.insert(packet.sequence, packet.data.clone(), packet.role)
        {
            self.report.record(Anomaly::EvictedFragment {
                unit_id: packet.unit_id,
                sequence,
                len: data.len(),
            });
        }
    }

    /// Apply buffered fragments that have become in-sequence.
    fn drain(&mut self, unit_id: UnitId) -> Result<()> {
        loop {
            let Some(next_seq) = self.open.get(&unit_id).map(|unit| unit.next_seq) else {
                break;
            };
            let Some((data, role)) = self
                .pending
                .get_mut(&unit_id)
                .and_then(|buf| buf.take(next_seq))
            else {
                break;
            };
            if role == PacketRole::End {
                if let Some(unit) = self.open.remove(&unit_id) {
                    self.close_unit(unit, true)?;
                }
            } else if let Some(unit) = self.open.get_mut(&unit_id) {
                unit.sink.write_all(&data)?;
                unit.bytes_written += data.len() as u64;
                unit.next_seq = unit.next_seq.wrapping_add(1);
            }
        }
        if self.pending.get(&unit_id).is_some_and(FragmentBuffer::is_empty) {
            self.pending.remove(&unit_id);
        }
        Ok(())
    }

    fn close_unit(&mut self, unit: OpenUnit<F::Sink>, complete: bool) -> Result<()> {
        if complete {
            let declared = u64::from(unit.meta.header.file_size);
            if declared != unit.bytes_written {
                self.report.record(Anomaly::LengthMismatch {
                    unit_id: unit.meta.unit_id,
                    declared,
                    actual: unit.bytes_written,
                });
            }
        } else {
            self.report.record(Anomaly::IncompleteTransfer {
                unit_id: unit.meta.unit_id,
                file_id: unit.meta.header.file_id,
                occurrence: unit.meta.occurrence,
                bytes_written: unit.bytes_written,
            });
        }
        let outcome = TransferOutcome {
            bytes_written: unit.bytes_written,
            final_sequence: unit.next_seq,
            classification: classify(unit.meta.header.kind(), unit.bytes_written),
            complete,
        };
        debug!(
            unit_id = unit.meta.unit_id,
            occurrence = unit.meta.occurrence,
            bytes = outcome.bytes_written,
            classification = ?outcome.classification,
            complete,
            "transfer closed"
        );
        self.factory.finish(&unit.meta, unit.sink, &outcome)?;
        self.transfers.push(TransferRecord {
            meta: unit.meta,
            outcome,
        });
        Ok(())
    }

    /// Flush open units as incomplete and account for stranded fragments.
    ///
    /// # Errors
    /// [`crate::Error::Io`] when flushing a sink fails.
    pub fn finalize(mut self) -> Result<ReassemblyOutput> {
        let unit_ids: Vec<UnitId> = self.open.keys().copied().collect();
        for unit_id in unit_ids {
            if let Some(unit) = self.open.remove(&unit_id) {
                self.close_unit(unit, false)?;
            }
        }
        for (unit_id, buf) in self.pending.drain().collect::<Vec<_>>() {
            let unit_seen = self.occurrences.contains_key(&unit_id);
            for (sequence, data, _) in buf.frags {
                self.report.record(Anomaly::OrphanFragment {
                    unit_id,
                    sequence,
                    len: data.len(),
                    unit_seen,
                });
            }
        }
        Ok(ReassemblyOutput {
            transfers: self.transfers,
            report: self.report,
        })
    }
}
