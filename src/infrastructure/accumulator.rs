//! Interrupt-safe result accumulator
//!
//! Holds the enriched records of one source run and rewrites the whole
//! output file on every flush. Writes go to a sibling temp file that is then
//! renamed over the target, so a crash mid-write never leaves a truncated
//! array behind. Dropping an accumulator with unflushed records flushes it.

use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

use crate::domain::{CollectionError, EnrichedRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulatorState {
    Empty,
    Accumulating,
    Flushed,
    FlushedOnInterrupt,
}

#[derive(Debug)]
pub struct ResultAccumulator {
    path: PathBuf,
    records: Vec<EnrichedRecord>,
    state: AccumulatorState,
    dirty: bool,
}

impl ResultAccumulator {
    /// Prepares the output location. Fails when the directory cannot be
    /// created or the file cannot be written.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, CollectionError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| output_error(&path, source))?;
        }

        let scratch = temp_path(&path);
        OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&scratch)
            .map_err(|source| output_error(&path, source))?;
        // Best effort; the next flush overwrites it anyway
        let _ = fs::remove_file(&scratch);

        debug!("Accumulator ready: {}", path.display());
        Ok(Self {
            path,
            records: Vec::new(),
            state: AccumulatorState::Empty,
            dirty: false,
        })
    }

    pub fn append(&mut self, record: EnrichedRecord) {
        self.records.push(record);
        self.state = AccumulatorState::Accumulating;
        self.dirty = true;
    }

    /// Overwrites the output file with the full in-memory snapshot
    pub fn flush(&mut self) -> Result<(), CollectionError> {
        write_snapshot(&self.path, &self.records)?;
        self.state = AccumulatorState::Flushed;
        self.dirty = false;
        debug!("Flushed {} records to {}", self.records.len(), self.path.display());
        Ok(())
    }

    /// Flush issued from the interrupt path
    pub fn flush_on_interrupt(&mut self) -> Result<(), CollectionError> {
        self.flush()?;
        self.state = AccumulatorState::FlushedOnInterrupt;
        info!(
            "Interrupted: saved {} records to {}",
            self.records.len(),
            self.path.display()
        );
        Ok(())
    }

    #[must_use]
    pub const fn state(&self) -> AccumulatorState {
        self.state
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn records(&self) -> &[EnrichedRecord] {
        &self.records
    }
}

impl Drop for ResultAccumulator {
    fn drop(&mut self) {
        if self.dirty {
            if let Err(e) = self.flush() {
                error!("Failed to flush {} records on drop: {}", self.records.len(), e);
            }
        }
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn output_error(path: &Path, source: std::io::Error) -> CollectionError {
    CollectionError::OutputUnavailable {
        path: path.to_path_buf(),
        source,
    }
}

fn write_snapshot(path: &Path, records: &[EnrichedRecord]) -> Result<(), CollectionError> {
    write_json_atomic(path, records)
}

/// Pretty-printed JSON written to a temp sibling and renamed into place
pub(crate) fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), CollectionError> {
    let tmp = temp_path(path);
    let write = || -> std::io::Result<()> {
        let file = File::create(&tmp)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, value)?;
        writer.write_all(b"\n")?;
        writer.into_inner().map_err(std::io::IntoInnerError::into_error)?.sync_all()?;
        fs::rename(&tmp, path)
    };
    write().map_err(|source| output_error(path, source))
}
