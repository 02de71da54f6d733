//! Destinations for reassembled transfer payloads.
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::rc::Rc;

use serde::Serialize;
use tracing::debug;

use super::{Classification, UnitMeta};
use crate::framing::SourceKind;

/// Where reassembled payload bytes go.
///
/// One sink is created per transfer unit when its first packet arrives and
/// finished when the unit completes or the run is finalized.
pub trait SinkFactory {
    type Sink: Write;

    fn create(&mut self, meta: &UnitMeta) -> io::Result<Self::Sink>;

    /// Called exactly once per created sink, complete or not.
    fn finish(&mut self, meta: &UnitMeta, sink: Self::Sink, outcome: &TransferOutcome)
        -> io::Result<()>;
}

/// Final disposition of one transfer unit.
#[derive(Debug, Clone, Serialize)]
pub struct TransferOutcome {
    pub bytes_written: u64,
    /// Sequence number the unit had reached when it was closed.
    pub final_sequence: u16,
    pub classification: Classification,
    pub complete: bool,
}

/// Sidecar metadata written next to each reassembled blob.
#[derive(Debug, Serialize)]
struct Sidecar<'a> {
    unit_id: u16,
    occurrence: u16,
    source: SourceKind,
    part_id: u8,
    file_id: u16,
    identifier: u8,
    data_type: u8,
    temp_flag: bool,
    counter: u8,
    declared_size: u32,
    file_type: u8,
    #[serde(flatten)]
    outcome: &'a TransferOutcome,
}

/// Writes each transfer to its own file under a directory, with a JSON
/// sidecar describing the unit. Files are kept with a `.partial` suffix
/// until the transfer completes.
pub struct FileSinkFactory {
    dir: PathBuf,
}

impl FileSinkFactory {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        FileSinkFactory { dir: dir.into() }
    }

    fn stem(&self, meta: &UnitMeta) -> PathBuf {
        self.dir.join(format!(
            "ldt_{:04x}_{:05}_{:02}",
            meta.unit_id, meta.header.file_id, meta.occurrence
        ))
    }

    fn partial_path(&self, meta: &UnitMeta) -> PathBuf {
        self.stem(meta).with_extension("partial")
    }
}

impl SinkFactory for FileSinkFactory {
    type Sink = BufWriter<File>;

    fn create(&mut self, meta: &UnitMeta) -> io::Result<Self::Sink> {
        fs::create_dir_all(&self.dir)?;
        let path = self.partial_path(meta);
        debug!(?path, "opening transfer sink");
        Ok(BufWriter::new(File::create(path)?))
    }

    fn finish(
        &mut self,
        meta: &UnitMeta,
        mut sink: Self::Sink,
        outcome: &TransferOutcome,
    ) -> io::Result<()> {
        sink.flush()?;
        drop(sink);

        let partial = self.partial_path(meta);
        let path = if outcome.complete {
            let ext = match outcome.classification {
                Classification::Image | Classification::MultipleImages => "img",
                Classification::Housekeeping => "hk",
                Classification::LikelyCompressed | Classification::Other => "bin",
            };
            let done = self.stem(meta).with_extension(ext);
            fs::rename(&partial, &done)?;
            done
        } else {
            partial
        };

        let sidecar = Sidecar {
            unit_id: meta.unit_id,
            occurrence: meta.occurrence,
            source: meta.source,
            part_id: meta.header.part_id,
            file_id: meta.header.file_id,
            identifier: meta.header.identifier,
            data_type: meta.header.data_type,
            temp_flag: meta.header.temp_flag,
            counter: meta.header.counter,
            declared_size: meta.header.file_size,
            file_type: meta.header.file_type,
            outcome,
        };
        let mut meta_file = File::create(path.with_extension("json"))?;
        serde_json::to_writer_pretty(&mut meta_file, &sidecar)?;
        meta_file.write_all(b"\n")?;
        Ok(())
    }
}

/// In-memory store of finished transfers, mostly useful in tests and tools
/// that post-process payloads without touching the filesystem.
#[derive(Default, Clone)]
pub struct MemSinkFactory {
    store: Rc<RefCell<HashMap<(u16, u16), (Vec<u8>, TransferOutcome)>>>,
}

impl MemSinkFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Payload and outcome for a unit occurrence, if it was finished.
    pub fn take(&self, unit_id: u16, occurrence: u16) -> Option<(Vec<u8>, TransferOutcome)> {
        self.store.borrow_mut().remove(&(unit_id, occurrence))
    }

    pub fn len(&self) -> usize {
        self.store.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.borrow().is_empty()
    }
}

impl SinkFactory for MemSinkFactory {
    type Sink = Vec<u8>;

    fn create(&mut self, _meta: &UnitMeta) -> io::Result<Self::Sink> {
        Ok(Vec::new())
    }

    fn finish(
        &mut self,
        meta: &UnitMeta,
        sink: Self::Sink,
        outcome: &TransferOutcome,
    ) -> io::Result<()> {
        self.store
            .borrow_mut()
            .insert((meta.unit_id, meta.occurrence), (sink, outcome.clone()));
        Ok(())
    }
}
