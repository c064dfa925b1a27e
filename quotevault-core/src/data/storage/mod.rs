//! Durable series storage.
//!
//! Layout: `{root}/symbol={SYMBOL}/{period}.{csv|parquet}` with a
//! `{file}.meta.json` sidecar next to each series file.

pub mod format;
pub mod lock;
pub mod metadata;
pub mod writer;

pub use format::{CodecError, SeriesFormat};
pub use lock::PathLocks;
pub use metadata::{plan_fetch, read_metadata, DownloadMetadata, FetchPlan};
pub use writer::{AtomicStorageWriter, SeriesReader, StorageReport};

use super::validator::ValidationError;
use crate::domain::Period;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Storage failures. Every variant names the file involved; none of them
/// leaves a partially written series visible at the target path.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("refusing to save an empty series to {}", .path.display())]
    EmptySeries { path: PathBuf },

    #[error("unsupported series format for {} (expected .csv or .parquet)", .path.display())]
    UnsupportedFormat { path: PathBuf },

    #[error("no stored series at {}", .path.display())]
    NotFound { path: PathBuf },

    #[error("I/O error during {stage} on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        stage: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("codec error on {}: {source}", .path.display())]
    Codec {
        path: PathBuf,
        #[source]
        source: CodecError,
    },

    #[error("verification of {} failed: {reason}", .path.display())]
    VerifyFailed { path: PathBuf, reason: String },

    #[error("final data for {} failed re-validation: {source}", .path.display())]
    Revalidation {
        path: PathBuf,
        #[source]
        source: ValidationError,
    },

    #[error("no rows of {} survived re-validation", .path.display())]
    NoRowsSurvived { path: PathBuf },

    #[error("metadata for {}: {reason}", .path.display())]
    Metadata { path: PathBuf, reason: String },
}

impl StorageError {
    pub(crate) fn io(path: &Path, stage: &'static str, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.to_path_buf(),
            stage,
            source,
        }
    }

    pub(crate) fn codec(path: &Path, source: CodecError) -> Self {
        StorageError::Codec {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Directory for a symbol: `{root}/symbol={SYMBOL}/`
pub fn symbol_dir(root: &Path, symbol: &str) -> PathBuf {
    root.join(format!("symbol={symbol}"))
}

/// Series file path: `{root}/symbol={SYMBOL}/{period}.{ext}`
pub fn series_path(root: &Path, symbol: &str, period: Period, format: SeriesFormat) -> PathBuf {
    symbol_dir(root, symbol).join(format!("{}.{}", period.as_str(), format.extension()))
}

/// Inverse of `series_path`: symbol from the `symbol=` directory, period
/// from the file stem.
pub fn identify(path: &Path) -> Option<(String, Period)> {
    let symbol = path
        .parent()?
        .file_name()?
        .to_str()?
        .strip_prefix("symbol=")?
        .to_string();
    let period = path.file_stem()?.to_str()?.parse().ok()?;
    Some((symbol, period))
}
