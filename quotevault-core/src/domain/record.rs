//! CanonicalRecord and RecordSeries: the one schema every provider is normalized into.

use super::request::Period;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Column order shared by the CSV and Parquet codecs.
pub const COLUMNS: [&str; 8] = [
    "timestamp",
    "open",
    "high",
    "low",
    "close",
    "volume",
    "symbol",
    "provider",
];

/// One OHLCV bar in UTC.
///
/// `volume` is signed so that a negative value coming from a provider can be
/// carried through to the Validator and rejected there instead of being
/// silently clamped during coercion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    pub symbol: String,
    pub provider: String,
}

impl CanonicalRecord {
    /// True if any price field is NaN or infinite.
    pub fn has_non_finite_price(&self) -> bool {
        !(self.open.is_finite()
            && self.high.is_finite()
            && self.low.is_finite()
            && self.close.is_finite())
    }

    /// `high >= max(open, close)`.
    pub fn high_is_consistent(&self) -> bool {
        self.high >= self.open.max(self.close)
    }

    /// `low <= min(open, close)`.
    pub fn low_is_consistent(&self) -> bool {
        self.low <= self.open.min(self.close)
    }

    /// Full OHLCV invariant: finite, non-negative prices, consistent
    /// high/low envelope and non-negative volume.
    pub fn is_sane(&self) -> bool {
        !self.has_non_finite_price()
            && self.open >= 0.0
            && self.high >= 0.0
            && self.low >= 0.0
            && self.close >= 0.0
            && self.high_is_consistent()
            && self.low_is_consistent()
            && self.volume >= 0
    }
}

/// A source row that could not be placed in time. `raw` is `None` when the
/// timestamp was null, otherwise the value that failed to parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampFault {
    pub row: usize,
    pub raw: Option<String>,
}

impl TimestampFault {
    pub fn is_missing(&self) -> bool {
        self.raw.is_none()
    }
}

/// Ordered bars for one (symbol, period) pair.
///
/// After a merge the records are strictly increasing by timestamp. Before
/// validation (straight out of the Transformer) duplicates may still exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSeries {
    pub symbol: String,
    pub period: Period,
    pub records: Vec<CanonicalRecord>,
    /// When this batch was processed. Used by the `latest_timestamp`
    /// conflict rule; `None` means unknown.
    pub fetched_at: Option<DateTime<Utc>>,
    /// Source rows the Transformer dropped for lack of a usable timestamp.
    /// Scored by the Validator; never stored.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub timestamp_faults: Vec<TimestampFault>,
}

impl RecordSeries {
    pub fn new(symbol: impl Into<String>, period: Period, records: Vec<CanonicalRecord>) -> Self {
        Self {
            symbol: symbol.into(),
            period,
            records,
            fetched_at: None,
            timestamp_faults: Vec::new(),
        }
    }

    pub fn empty(symbol: impl Into<String>, period: Period) -> Self {
        Self::new(symbol, period, Vec::new())
    }

    pub fn with_fetched_at(mut self, fetched_at: DateTime<Utc>) -> Self {
        self.fetched_at = Some(fetched_at);
        self
    }

    pub fn with_timestamp_faults(mut self, faults: Vec<TimestampFault>) -> Self {
        self.timestamp_faults = faults;
        self
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// First and last timestamps, if any.
    pub fn span(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        match (self.records.first(), self.records.last()) {
            (Some(first), Some(last)) => Some((first.timestamp, last.timestamp)),
            _ => None,
        }
    }

    /// Stable sort by timestamp ascending.
    pub fn sort(&mut self) {
        self.records.sort_by_key(|r| r.timestamp);
    }

    /// Strictly increasing timestamps (no duplicates, no reordering needed).
    pub fn is_strictly_increasing(&self) -> bool {
        self.records
            .windows(2)
            .all(|w| w[0].timestamp < w[1].timestamp)
    }
}
