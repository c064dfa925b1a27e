//! `DownloadMetadata` sidecar and incremental-fetch planning.

use super::{SeriesFormat, StorageError};
use crate::domain::{DateRange, Period};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Written next to every series file on each successful save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadMetadata {
    pub symbol: String,
    pub period: Period,
    pub format: SeriesFormat,
    pub row_count: usize,
    pub columns: Vec<String>,
    pub byte_size: u64,
    /// BLAKE3 of the series file bytes.
    pub checksum: String,
    pub first_timestamp: DateTime<Utc>,
    pub last_timestamp: DateTime<Utc>,
    pub last_write: DateTime<Utc>,
}

impl DownloadMetadata {
    /// Calendar dates covered, inclusive.
    pub fn covered(&self) -> DateRange {
        DateRange::new(
            self.first_timestamp.date_naive(),
            self.last_timestamp.date_naive(),
        )
    }
}

/// `{series file}.meta.json`
pub fn metadata_path(series_path: &Path) -> PathBuf {
    let mut name = series_path.as_os_str().to_owned();
    name.push(".meta.json");
    PathBuf::from(name)
}

/// Read the sidecar for `series_path`. `Ok(None)` if there is none.
pub fn read_metadata(series_path: &Path) -> Result<Option<DownloadMetadata>, StorageError> {
    let path = metadata_path(series_path);
    let content = match fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StorageError::io(&path, "read metadata", e)),
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| StorageError::Metadata {
            path,
            reason: format!("parse: {e}"),
        })
}

/// Atomically replace the sidecar.
pub(crate) fn write_metadata(series_path: &Path, meta: &DownloadMetadata) -> Result<(), StorageError> {
    let path = metadata_path(series_path);
    let json = serde_json::to_vec_pretty(meta).map_err(|e| StorageError::Metadata {
        path: path.clone(),
        reason: format!("serialize: {e}"),
    })?;

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::Builder::new()
        .prefix(".meta.")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| StorageError::io(&path, "create metadata temp file", e))?;
    tmp.write_all(&json)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| StorageError::io(&path, "write metadata", e))?;
    tmp.persist(&path)
        .map_err(|e| StorageError::io(&path, "rename metadata", e.error))?;
    Ok(())
}

/// What the orchestration layer should fetch for a requested range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPlan {
    /// Nothing usable on disk, or the request starts before stored data.
    Full,
    /// Stored data covers the start; fetch from `from` (the last stored
    /// date, refetched so a partial final bar gets refreshed).
    Incremental { from: NaiveDate },
    UpToDate,
}

pub fn plan_fetch(meta: Option<&DownloadMetadata>, requested: &DateRange) -> FetchPlan {
    let Some(meta) = meta else {
        return FetchPlan::Full;
    };
    let covered = meta.covered();
    if requested.start < covered.start {
        FetchPlan::Full
    } else if requested.end <= covered.end {
        FetchPlan::UpToDate
    } else {
        FetchPlan::Incremental {
            from: covered.end.max(requested.start),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn meta() -> DownloadMetadata {
        DownloadMetadata {
            symbol: "AAPL".into(),
            period: Period::Daily,
            format: SeriesFormat::Csv,
            row_count: 3,
            columns: vec!["timestamp".into()],
            byte_size: 10,
            checksum: "abc".into(),
            first_timestamp: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            last_timestamp: Utc.with_ymd_and_hms(2024, 3, 28, 0, 0, 0).unwrap(),
            last_write: Utc.with_ymd_and_hms(2024, 3, 29, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn plan_without_metadata_is_full() {
        let range = DateRange::new(date(2024, 1, 1), date(2024, 2, 1));
        assert_eq!(plan_fetch(None, &range), FetchPlan::Full);
    }

    #[test]
    fn plan_inside_coverage_is_up_to_date() {
        let range = DateRange::new(date(2024, 1, 2), date(2024, 3, 1));
        assert_eq!(plan_fetch(Some(&meta()), &range), FetchPlan::UpToDate);
    }

    #[test]
    fn plan_past_coverage_is_incremental_from_last_date() {
        let range = DateRange::new(date(2024, 2, 1), date(2024, 6, 30));
        assert_eq!(
            plan_fetch(Some(&meta()), &range),
            FetchPlan::Incremental {
                from: date(2024, 3, 28)
            }
        );
    }

    #[test]
    fn plan_before_coverage_is_full() {
        let range = DateRange::new(date(2023, 12, 1), date(2024, 2, 1));
        assert_eq!(plan_fetch(Some(&meta()), &range), FetchPlan::Full);
    }

    #[test]
    fn metadata_roundtrip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let series = dir.path().join("1d.csv");
        assert!(read_metadata(&series).unwrap().is_none());

        write_metadata(&series, &meta()).unwrap();
        assert!(dir.path().join("1d.csv.meta.json").exists());
        assert_eq!(read_metadata(&series).unwrap(), Some(meta()));
    }

    #[test]
    fn corrupt_metadata_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let series = dir.path().join("1d.csv");
        fs::write(metadata_path(&series), "{not json").unwrap();
        assert!(matches!(
            read_metadata(&series),
            Err(StorageError::Metadata { .. })
        ));
    }
}
