//! The anomaly ledger.
//!
//! Almost nothing in this pipeline is fatal. Out-of-order fragments,
//! checksum disagreements, reserved bits that are not zero: all of these are
//! captured here with enough context to reproduce the decision, then
//! processing continues. A [`Report`] belongs to one run and is consumed at
//! the end for the per-category summary.
use std::collections::BTreeMap;

use serde::Serialize;
use tracing::warn;

/// Reason a housekeeping block was dropped from the decoded output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Declared block type is not a telemetry block.
    WrongBlockType,
    /// Declared data length does not match the actual byte count.
    LengthMismatch,
    /// Block length is not one of the two known housekeeping lengths.
    UnknownLength,
    /// Declared length contradicts the essential/non-essential flag.
    TypeLengthMismatch,
}

/// One recoverable condition observed during a run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Anomaly {
    /// Fragment arrived out of order for an open transfer.
    SequenceAnomaly {
        unit_id: u16,
        expected: u16,
        got: u16,
    },
    /// Fragment for an already-applied `(unit, sequence)`; ignored.
    DuplicateFragment { unit_id: u16, sequence: u16 },
    /// A `First` packet arrived for a unit that was still open; the old
    /// transfer is kept as-is and reported incomplete at finalize.
    SupersededTransfer { unit_id: u16, occurrence: u16 },
    /// A transfer never saw its `End` packet.
    IncompleteTransfer {
        unit_id: u16,
        file_id: u16,
        occurrence: u16,
        bytes_written: u64,
    },
    /// A buffered fragment never found a home.
    OrphanFragment {
        unit_id: u16,
        sequence: u16,
        len: usize,
        unit_seen: bool,
    },
    /// A buffered fragment was evicted to honor the buffer bound. Lost data.
    EvictedFragment {
        unit_id: u16,
        sequence: u16,
        len: usize,
    },
    /// Declared and actual byte counts disagree at transfer closure.
    LengthMismatch {
        unit_id: u16,
        declared: u64,
        actual: u64,
    },
    /// A kept housekeeping record violated a field invariant.
    FieldInvariantViolation {
        index: usize,
        field: &'static str,
        value: u64,
    },
    /// WAC response checksum disagreement; record kept.
    ChecksumMismatch {
        index: usize,
        declared: u8,
        computed: u8,
    },
    /// Housekeeping block dropped; raw bytes preserved for forensics.
    StructuralReject {
        index: usize,
        reason: RejectReason,
        raw: String,
    },
    /// Inter-sample cadence outside the expected window. Quality signal.
    CadenceAnomaly {
        index: usize,
        essential: bool,
        delta_secs: f64,
    },
}

impl Anomaly {
    /// Category name used for summary counts.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Anomaly::SequenceAnomaly { .. } => "sequence_anomaly",
            Anomaly::DuplicateFragment { .. } => "duplicate_fragment",
            Anomaly::SupersededTransfer { .. } => "superseded_transfer",
            Anomaly::IncompleteTransfer { .. } => "incomplete_transfer",
            Anomaly::OrphanFragment { .. } => "orphan_fragment",
            Anomaly::EvictedFragment { .. } => "evicted_fragment",
            Anomaly::LengthMismatch { .. } => "length_mismatch",
            Anomaly::FieldInvariantViolation { .. } => "field_invariant_violation",
            Anomaly::ChecksumMismatch { .. } => "checksum_mismatch",
            Anomaly::StructuralReject { .. } => "structural_reject",
            Anomaly::CadenceAnomaly { .. } => "cadence_anomaly",
        }
    }
}

/// One ledger entry: the anomaly plus where it was observed.
#[derive(Debug, Clone, Serialize)]
pub struct Entry {
    /// Capture file or blob being processed when the anomaly was observed.
    pub context: Option<String>,
    #[serde(flatten)]
    pub anomaly: Anomaly,
}

/// Accumulates anomalies for one run.
#[derive(Debug, Default)]
pub struct Report {
    entries: Vec<Entry>,
    context: Option<String>,
}

impl Report {
    #[must_use]
    pub fn new() -> Self {
        Report::default()
    }

    /// Set the context attached to subsequently recorded anomalies,
    /// typically the capture file currently being read.
    pub fn set_context<S: Into<String>>(&mut self, context: S) {
        self.context = Some(context.into());
    }

    pub fn record(&mut self, anomaly: Anomaly) {
        warn!(category = anomaly.category(), ?anomaly, "anomaly");
        self.entries.push(Entry {
            context: self.context.clone(),
            anomaly,
        });
    }

    #[must_use]
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Per-category counts for the end-of-run summary.
    #[must_use]
    pub fn summary(&self) -> Summary {
        let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
        for entry in &self.entries {
            *counts.entry(entry.anomaly.category()).or_default() += 1;
        }
        Summary {
            total: self.entries.len(),
            counts,
        }
    }
}

/// Counts of anomalies per category for one run.
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub total: usize,
    pub counts: BTreeMap<&'static str, usize>,
}
