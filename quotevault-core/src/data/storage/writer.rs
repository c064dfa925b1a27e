//! AtomicStorageWriter: crash-safe, idempotent series persistence.
//!
//! Save sequence, per target path and under that path's lock:
//! 1. reject an empty series
//! 2. merge against whatever is already stored at the target
//! 3. sort by timestamp
//! 4. re-validate the final data; fail if no row survives
//! 5. encode and write to a temp file in the target's directory
//! 6. re-read the temp file and verify rows, columns and checksum
//! 7. rename the temp file over the target
//! 8. write the metadata sidecar
//!
//! Step 7 is the only externally visible transition. A failure before it
//! drops the temp file and leaves the target untouched.

use super::metadata::{read_metadata, write_metadata, DownloadMetadata};
use super::{identify, PathLocks, SeriesFormat, StorageError};
use crate::data::dedup::Deduplicator;
use crate::data::validator::{Issue, Validator};
use crate::domain::{RecordSeries, COLUMNS};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Result of a successful `save()`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageReport {
    pub path: PathBuf,
    pub rows: usize,
    pub columns: usize,
    pub bytes: u64,
    pub first_timestamp: DateTime<Utc>,
    pub last_timestamp: DateTime<Utc>,
    pub checksum: String,
    pub elapsed: Duration,
    /// Rows of the merged series that re-validation kept out of the file.
    pub excluded_rows: usize,
    /// Everything re-validation found in the final data.
    pub revalidation_issues: Vec<Issue>,
}

#[derive(Debug, Clone)]
pub struct AtomicStorageWriter {
    validator: Validator,
    dedup: Deduplicator,
    locks: Arc<PathLocks>,
}

impl AtomicStorageWriter {
    pub fn new(validator: Validator, dedup: Deduplicator) -> Self {
        Self {
            validator,
            dedup,
            locks: Arc::new(PathLocks::new()),
        }
    }

    /// Share a lock registry with other writers over the same data root.
    pub fn with_locks(mut self, locks: Arc<PathLocks>) -> Self {
        self.locks = locks;
        self
    }

    pub fn locks(&self) -> &Arc<PathLocks> {
        &self.locks
    }

    /// Persist `merged` at `path`. Safe to retry: saving the same series
    /// twice produces the same file.
    pub fn save(&self, path: &Path, merged: &RecordSeries) -> Result<StorageReport, StorageError> {
        if merged.is_empty() {
            return Err(StorageError::EmptySeries {
                path: path.to_path_buf(),
            });
        }
        let format = SeriesFormat::from_path(path).ok_or_else(|| StorageError::UnsupportedFormat {
            path: path.to_path_buf(),
        })?;

        self.locks
            .with_lock(path, || self.save_locked(path, format, merged))
    }

    fn save_locked(
        &self,
        path: &Path,
        format: SeriesFormat,
        merged: &RecordSeries,
    ) -> Result<StorageReport, StorageError> {
        let started = Instant::now();

        // Another writer may have landed data since the caller merged
        let mut combined = match SeriesReader::load(path) {
            Ok(existing) => {
                let (combined, report) = self.dedup.merge(&existing, merged);
                debug!(
                    path = %path.display(),
                    existing = existing.len(),
                    duplicates = report.duplicate_count,
                    "merged against stored series"
                );
                combined
            }
            Err(StorageError::NotFound { .. }) => merged.clone(),
            Err(e) => return Err(e),
        };
        combined.sort();

        let outcome = self
            .validator
            .validate(&combined)
            .map_err(|source| StorageError::Revalidation {
                path: path.to_path_buf(),
                source,
            })?;
        let excluded_rows = combined.len() - outcome.accepted.len();
        if excluded_rows > 0 {
            warn!(
                path = %path.display(),
                excluded_rows,
                score = outcome.score.value,
                "re-validation excluded rows from the final series"
            );
        }
        let final_series = outcome.accepted;
        let (first_timestamp, last_timestamp) = final_series
            .span()
            .ok_or_else(|| StorageError::NoRowsSurvived {
                path: path.to_path_buf(),
            })?;

        let bytes = format
            .encode(&final_series.records)
            .map_err(|e| StorageError::codec(path, e))?;
        let checksum = blake3::hash(&bytes).to_hex().to_string();

        publish(path, format, &bytes, &checksum, final_series.len())?;

        let meta = DownloadMetadata {
            symbol: final_series.symbol.clone(),
            period: final_series.period,
            format,
            row_count: final_series.len(),
            columns: COLUMNS.iter().map(|c| c.to_string()).collect(),
            byte_size: bytes.len() as u64,
            checksum: checksum.clone(),
            first_timestamp,
            last_timestamp,
            last_write: Utc::now(),
        };
        write_metadata(path, &meta)?;

        let report = StorageReport {
            path: path.to_path_buf(),
            rows: final_series.len(),
            columns: COLUMNS.len(),
            bytes: bytes.len() as u64,
            first_timestamp,
            last_timestamp,
            checksum,
            elapsed: started.elapsed(),
            excluded_rows,
            revalidation_issues: outcome.issues,
        };
        info!(
            path = %path.display(),
            rows = report.rows,
            bytes = report.bytes,
            "series saved"
        );
        Ok(report)
    }
}

/// Steps 5 to 7: write `bytes` to a temp file beside `path`, verify it, then
/// rename it over `path`. On error the temp file is dropped and `path` is
/// untouched.
fn publish(
    path: &Path,
    format: SeriesFormat,
    bytes: &[u8],
    checksum: &str,
    rows: usize,
) -> Result<(), StorageError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|e| StorageError::io(dir, "create directory", e))?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("series");
    let mut tmp = tempfile::Builder::new()
        .prefix(&format!(".{file_name}."))
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| StorageError::io(path, "create temp file", e))?;
    tmp.write_all(bytes)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| StorageError::io(tmp.path(), "write temp file", e))?;
    debug!(tmp = %tmp.path().display(), bytes = bytes.len(), "temp file written");

    verify(tmp.path(), format, checksum, rows)?;

    tmp.persist(path)
        .map_err(|e| StorageError::io(path, "rename temp file", e.error))?;
    Ok(())
}

/// Re-read what was written and compare it with what was meant to be written.
fn verify(
    tmp_path: &Path,
    format: SeriesFormat,
    checksum: &str,
    rows: usize,
) -> Result<(), StorageError> {
    let fail = |reason: String| StorageError::VerifyFailed {
        path: tmp_path.to_path_buf(),
        reason,
    };

    let written = fs::read(tmp_path).map_err(|e| StorageError::io(tmp_path, "re-read temp file", e))?;
    let actual = blake3::hash(&written).to_hex().to_string();
    if actual != checksum {
        return Err(fail(format!("checksum {actual} != {checksum}")));
    }

    let decoded = format
        .decode(&written)
        .map_err(|e| StorageError::codec(tmp_path, e))?;
    if decoded.len() != rows {
        return Err(fail(format!("{} rows read back, {rows} written", decoded.len())));
    }
    Ok(())
}

/// Loads stored series.
pub struct SeriesReader;

impl SeriesReader {
    /// Load the series at `path`. Symbol and period come from the metadata
    /// sidecar, or from the `symbol=`/`{period}` layout when it is missing.
    /// `fetched_at` is the sidecar's last write time.
    pub fn load(path: &Path) -> Result<RecordSeries, StorageError> {
        let format = SeriesFormat::from_path(path).ok_or_else(|| StorageError::UnsupportedFormat {
            path: path.to_path_buf(),
        })?;
        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::NotFound {
                    path: path.to_path_buf(),
                })
            }
            Err(e) => return Err(StorageError::io(path, "read series", e)),
        };
        let records = format
            .decode(&bytes)
            .map_err(|e| StorageError::codec(path, e))?;

        let meta = read_metadata(path)?;
        let (symbol, period) = match &meta {
            Some(m) => (m.symbol.clone(), m.period),
            None => identify(path).ok_or_else(|| StorageError::Metadata {
                path: path.to_path_buf(),
                reason: "no sidecar and path is not symbol=<SYMBOL>/<period>.<ext>".into(),
            })?,
        };

        Ok(RecordSeries {
            symbol,
            period,
            records,
            fetched_at: meta.map(|m| m.last_write),
            timestamp_faults: Vec::new(),
        })
    }
}
