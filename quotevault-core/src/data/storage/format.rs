//! CSV and Parquet codecs for `CanonicalRecord` rows.
//!
//! Both codecs work on in-memory byte buffers so the writer can hash exactly
//! what it puts on disk. Timestamps are RFC 3339 UTC in CSV and microsecond
//! `Datetime` in Parquet; both round-trip to identical records.

use crate::domain::{CanonicalRecord, COLUMNS};
use chrono::{DateTime, SecondsFormat, Utc};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("csv: {0}")]
    Csv(String),

    #[error("parquet: {0}")]
    Parquet(String),

    #[error("row {row}: {reason}")]
    BadRow { row: usize, reason: String },

    #[error("unexpected columns {found:?}")]
    Columns { found: Vec<String> },
}

impl From<csv::Error> for CodecError {
    fn from(e: csv::Error) -> Self {
        CodecError::Csv(e.to_string())
    }
}

impl From<PolarsError> for CodecError {
    fn from(e: PolarsError) -> Self {
        CodecError::Parquet(e.to_string())
    }
}

/// On-disk encoding, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeriesFormat {
    #[default]
    Csv,
    Parquet,
}

impl SeriesFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            SeriesFormat::Csv => "csv",
            SeriesFormat::Parquet => "parquet",
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "csv" => Some(SeriesFormat::Csv),
            "parquet" => Some(SeriesFormat::Parquet),
            _ => None,
        }
    }

    pub fn encode(&self, records: &[CanonicalRecord]) -> Result<Vec<u8>, CodecError> {
        match self {
            SeriesFormat::Csv => encode_csv(records),
            SeriesFormat::Parquet => encode_parquet(records),
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Vec<CanonicalRecord>, CodecError> {
        match self {
            SeriesFormat::Csv => decode_csv(bytes),
            SeriesFormat::Parquet => decode_parquet(bytes),
        }
    }
}

impl std::str::FromStr for SeriesFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(SeriesFormat::Csv),
            "parquet" => Ok(SeriesFormat::Parquet),
            other => Err(format!("unknown format '{other}' (expected csv or parquet)")),
        }
    }
}

impl std::fmt::Display for SeriesFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

// ── CSV ─────────────────────────────────────────────────────────────

/// Header row plus one line per record. Floats use Rust's shortest
/// round-trip formatting.
fn encode_csv(records: &[CanonicalRecord]) -> Result<Vec<u8>, CodecError> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(vec![]);
    wtr.write_record(COLUMNS)?;

    for r in records {
        wtr.write_record([
            &r.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            &r.open.to_string(),
            &r.high.to_string(),
            &r.low.to_string(),
            &r.close.to_string(),
            &r.volume.to_string(),
            &r.symbol,
            &r.provider,
        ])?;
    }

    wtr.into_inner()
        .map_err(|e| CodecError::Csv(format!("flush: {e}")))
}

fn decode_csv(bytes: &[u8]) -> Result<Vec<CanonicalRecord>, CodecError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(bytes);

    let headers = rdr.headers()?;
    if headers.iter().ne(COLUMNS.iter().copied()) {
        return Err(CodecError::Columns {
            found: headers.iter().map(String::from).collect(),
        });
    }

    let mut records = Vec::new();
    for (row, result) in rdr.records().enumerate() {
        let rec = result?;
        let field = |i: usize| rec.get(i).unwrap_or_default();
        let float = |i: usize| -> Result<f64, CodecError> {
            field(i).parse().map_err(|_| CodecError::BadRow {
                row,
                reason: format!("{} '{}' is not a number", COLUMNS[i], field(i)),
            })
        };

        let timestamp = DateTime::parse_from_rfc3339(field(0))
            .map_err(|e| CodecError::BadRow {
                row,
                reason: format!("timestamp '{}': {e}", field(0)),
            })?
            .with_timezone(&Utc);
        let volume = field(5).parse().map_err(|_| CodecError::BadRow {
            row,
            reason: format!("volume '{}' is not an integer", field(5)),
        })?;

        records.push(CanonicalRecord {
            timestamp,
            open: float(1)?,
            high: float(2)?,
            low: float(3)?,
            close: float(4)?,
            volume,
            symbol: field(6).to_string(),
            provider: field(7).to_string(),
        });
    }
    Ok(records)
}

// ── Parquet ─────────────────────────────────────────────────────────

/// The timestamp column is microsecond `Datetime`. Finer precision is lost
/// here but kept by CSV, so records reach storage already truncated to whole
/// microseconds.
fn records_to_dataframe(records: &[CanonicalRecord]) -> Result<DataFrame, CodecError> {
    let timestamps: Vec<i64> = records.iter().map(|r| r.timestamp.timestamp_micros()).collect();
    let opens: Vec<f64> = records.iter().map(|r| r.open).collect();
    let highs: Vec<f64> = records.iter().map(|r| r.high).collect();
    let lows: Vec<f64> = records.iter().map(|r| r.low).collect();
    let closes: Vec<f64> = records.iter().map(|r| r.close).collect();
    let volumes: Vec<i64> = records.iter().map(|r| r.volume).collect();
    let symbols: Vec<&str> = records.iter().map(|r| r.symbol.as_str()).collect();
    let providers: Vec<&str> = records.iter().map(|r| r.provider.as_str()).collect();

    let df = DataFrame::new(vec![
        Column::new("timestamp".into(), timestamps)
            .cast(&DataType::Datetime(TimeUnit::Microseconds, None))?,
        Column::new("open".into(), opens),
        Column::new("high".into(), highs),
        Column::new("low".into(), lows),
        Column::new("close".into(), closes),
        Column::new("volume".into(), volumes),
        Column::new("symbol".into(), symbols),
        Column::new("provider".into(), providers),
    ])?;
    Ok(df)
}

fn encode_parquet(records: &[CanonicalRecord]) -> Result<Vec<u8>, CodecError> {
    let mut df = records_to_dataframe(records)?;
    let mut buf = Vec::new();
    ParquetWriter::new(&mut buf).finish(&mut df)?;
    Ok(buf)
}

fn decode_parquet(bytes: &[u8]) -> Result<Vec<CanonicalRecord>, CodecError> {
    let df = ParquetReader::new(Cursor::new(bytes)).finish()?;

    let names: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|n| n.to_string())
        .collect();
    if names.iter().map(String::as_str).ne(COLUMNS.iter().copied()) {
        return Err(CodecError::Columns { found: names });
    }

    let timestamps = df.column("timestamp")?.cast(&DataType::Int64)?;
    let ts_ca = timestamps.i64()?;
    let open_ca = df.column("open")?.f64()?;
    let high_ca = df.column("high")?.f64()?;
    let low_ca = df.column("low")?.f64()?;
    let close_ca = df.column("close")?.f64()?;
    let vol_ca = df.column("volume")?.i64()?;
    let sym_ca = df.column("symbol")?.str()?;
    let prov_ca = df.column("provider")?.str()?;

    let mut records = Vec::with_capacity(df.height());
    for row in 0..df.height() {
        let micros = ts_ca.get(row).ok_or_else(|| CodecError::BadRow {
            row,
            reason: "null timestamp".into(),
        })?;
        let timestamp = DateTime::from_timestamp_micros(micros).ok_or_else(|| CodecError::BadRow {
            row,
            reason: format!("timestamp {micros}us out of range"),
        })?;

        records.push(CanonicalRecord {
            timestamp,
            open: open_ca.get(row).unwrap_or(f64::NAN),
            high: high_ca.get(row).unwrap_or(f64::NAN),
            low: low_ca.get(row).unwrap_or(f64::NAN),
            close: close_ca.get(row).unwrap_or(f64::NAN),
            volume: vol_ca.get(row).unwrap_or(0),
            symbol: sym_ca.get(row).unwrap_or_default().to_string(),
            provider: prov_ca.get(row).unwrap_or_default().to_string(),
        });
    }
    Ok(records)
}
