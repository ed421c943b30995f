//! Cross-run merge and deduplication
//!
//! Input files are read in parallel, then deduplicated in one sequential
//! pass in the given file order so that the first occurrence of an identity
//! key always wins and output order is stable.

use rayon::prelude::*;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::accumulator::write_json_atomic;
use crate::domain::record::fields;
use crate::domain::{CollectionError, Record};

/// Duplicate-detection key, in strict priority order:
/// `url:<url>`, then `id:<id>:<name>`, then `name:<name>`
#[must_use]
pub fn identity_key(record: &Record) -> String {
    if let Some(url) = record.product_url() {
        return format!("url:{url}");
    }
    let name = record.raw_text(fields::PRODUCT_NAME);
    match record.product_id() {
        Some(id) => format!("id:{id}:{name}"),
        None => format!("name:{name}"),
    }
}

/// Per-input counts
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileMergeCount {
    pub path: PathBuf,
    pub loaded: usize,
    pub kept: usize,
    pub duplicates: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MergeStatistics {
    pub files_processed: usize,
    pub total_processed: usize,
    pub unique_count: usize,
    pub duplicates_removed: usize,
    pub duplicate_percentage: f64,
    pub per_file: Vec<FileMergeCount>,
    pub skipped: Vec<SkippedFile>,
}

impl MergeStatistics {
    fn finalize(&mut self) {
        self.duplicate_percentage = if self.total_processed == 0 {
            0.0
        } else {
            #[allow(clippy::cast_precision_loss)]
            let ratio = self.duplicates_removed as f64 / self.total_processed as f64;
            ratio * 100.0
        };
    }
}

/// Deduplicated union of several result sets
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct MergedDataset {
    records: Vec<Record>,
}

impl MergedDataset {
    #[must_use]
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Writes the dataset as one JSON array, creating parent directories
    pub fn write_to(&self, path: &Path) -> Result<(), CollectionError> {
        ensure_parent(path)?;
        write_json_atomic(path, &self.records)
    }
}

/// Writes the statistics summary as JSON
pub fn write_statistics(stats: &MergeStatistics, path: &Path) -> Result<(), CollectionError> {
    ensure_parent(path)?;
    write_json_atomic(path, stats)
}

fn ensure_parent(path: &Path) -> Result<(), CollectionError> {
    match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => std::fs::create_dir_all(parent).map_err(|source| CollectionError::OutputUnavailable {
            path: path.to_path_buf(),
            source,
        }),
        None => Ok(()),
    }
}

/// Sequential first-seen-wins deduplication
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: HashSet<String>,
    dataset: MergedDataset,
    stats: MergeStatistics,
}

impl Deduplicator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one loaded file into the union
    pub fn absorb(&mut self, path: &Path, records: Vec<Record>) {
        let mut count = FileMergeCount {
            path: path.to_path_buf(),
            loaded: records.len(),
            kept: 0,
            duplicates: 0,
        };

        for record in records {
            if self.seen.insert(identity_key(&record)) {
                self.dataset.records.push(record);
                count.kept += 1;
            } else {
                debug!("Duplicate in {}: {}", path.display(), record.label());
                count.duplicates += 1;
            }
        }

        info!(
            "{}: loaded {} items, duplicates removed: {}",
            path.display(),
            count.loaded,
            count.duplicates
        );
        self.stats.files_processed += 1;
        self.stats.total_processed += count.loaded;
        self.stats.duplicates_removed += count.duplicates;
        self.stats.per_file.push(count);
    }

    pub fn skip(&mut self, path: &Path, reason: String) {
        warn!("Skipping {}: {}", path.display(), reason);
        self.stats.skipped.push(SkippedFile {
            path: path.to_path_buf(),
            reason,
        });
    }

    #[must_use]
    pub fn finish(mut self) -> (MergedDataset, MergeStatistics) {
        self.stats.unique_count = self.dataset.len();
        self.stats.finalize();
        (self.dataset, self.stats)
    }
}

/// Reads one result file: a JSON array of objects. Non-object entries are
/// dropped with a warning.
pub fn load_records(path: &Path) -> Result<Vec<Record>, CollectionError> {
    let text = std::fs::read_to_string(path).map_err(|e| CollectionError::input_unavailable(path, e.to_string()))?;
    let value: Value = serde_json::from_str(&text)
        .map_err(|e| CollectionError::input_unavailable(path, format!("invalid JSON: {e}")))?;
    let Value::Array(items) = value else {
        return Err(CollectionError::input_unavailable(path, "not a JSON array"));
    };

    let total = items.len();
    let records: Vec<Record> = items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(map) => Some(Record::from(map)),
            _ => None,
        })
        .collect();
    if records.len() < total {
        warn!(
            "{}: ignored {} entries that are not objects",
            path.display(),
            total - records.len()
        );
    }
    Ok(records)
}

/// Explicit inputs followed by `pattern` matches, with missing files dropped
/// and repeats removed. The first occurrence of a path fixes its position.
pub fn resolve_inputs(explicit: Vec<PathBuf>, pattern: Option<&str>) -> Result<Vec<PathBuf>, glob::PatternError> {
    let mut candidates = explicit;
    if let Some(pattern) = pattern {
        for entry in glob::glob(pattern)? {
            match entry {
                Ok(path) => candidates.push(path),
                Err(e) => warn!("Skipping unreadable match: {}", e),
            }
        }
    }

    let mut seen = HashSet::new();
    let mut files = Vec::with_capacity(candidates.len());
    for path in candidates {
        if !path.is_file() {
            warn!("Input file not found: {}", path.display());
            continue;
        }
        if seen.insert(path.clone()) {
            files.push(path);
        } else {
            debug!("Ignoring repeated input {}", path.display());
        }
    }
    Ok(files)
}

/// Merges `files` in the given order
#[must_use]
pub fn merge(files: &[PathBuf]) -> (MergedDataset, MergeStatistics) {
    let loaded: Vec<Result<Vec<Record>, CollectionError>> = files.par_iter().map(|path| load_records(path)).collect();

    let mut dedup = Deduplicator::new();
    for (path, result) in files.iter().zip(loaded) {
        match result {
            Ok(records) => dedup.absorb(path, records),
            Err(CollectionError::InputUnavailable { reason, .. }) => dedup.skip(path, reason),
            Err(e) => dedup.skip(path, e.to_string()),
        }
    }

    let (dataset, stats) = dedup.finish();
    info!(
        "Merged {} files: {} items processed, {} unique, {} duplicates removed ({:.2}%)",
        stats.files_processed,
        stats.total_processed,
        stats.unique_count,
        stats.duplicates_removed,
        stats.duplicate_percentage
    );
    (dataset, stats)
}
