//! Provider mapping table.
//!
//! Each provider ships OHLCV in its own shape. The table below says where the
//! bars live in the JSON payload, what each field is called, and how the
//! timestamp is encoded. The Transformer is driven entirely by this data.
//!
//! Field names and timezones follow the public payloads as observed; they are
//! configuration, so a deployment that sees a different shape can register
//! its own `ProviderMapping` on the Transformer instead of touching code.

use crate::domain::Provider;
use chrono_tz::Tz;

/// How the payload lays out its bars.
#[derive(Debug, Clone, PartialEq)]
pub enum Layout {
    /// Parallel arrays: one timestamp array plus one array per value field,
    /// all found inside the object at `values`.
    Columnar { timestamps: String, values: String },
    /// An array of objects, one per bar.
    Rows { rows: String },
}

/// How the source encodes time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeRule {
    EpochSeconds,
    EpochMillis,
    /// Naive wall-clock strings in the given zone (RFC 3339 strings with an
    /// explicit offset are honored as-is).
    WallClock(Tz),
}

/// Source field names for the canonical columns.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldNames {
    pub timestamp: String,
    pub open: String,
    pub high: String,
    pub low: String,
    pub close: String,
    pub volume: String,
}

impl FieldNames {
    fn new(timestamp: &str, open: &str, high: &str, low: &str, close: &str, volume: &str) -> Self {
        Self {
            timestamp: timestamp.into(),
            open: open.into(),
            high: high.into(),
            low: low.into(),
            close: close.into(),
            volume: volume.into(),
        }
    }
}

/// One row of the mapping table.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderMapping {
    pub provider: Provider,
    pub layout: Layout,
    pub fields: FieldNames,
    pub time: TimeRule,
    /// JSON pointer to a provider-reported error object, if the provider has one.
    pub error_pointer: Option<String>,
}

impl ProviderMapping {
    /// Built-in mapping for a provider.
    pub fn builtin(provider: Provider) -> Self {
        match provider {
            // v8 chart API: {"chart":{"result":[{"timestamp":[..],"indicators":{"quote":[{..}]}}],"error":null}}
            Provider::Yahoo => Self {
                provider,
                layout: Layout::Columnar {
                    timestamps: "/chart/result/0/timestamp".into(),
                    values: "/chart/result/0/indicators/quote/0".into(),
                },
                fields: FieldNames::new("timestamp", "open", "high", "low", "close", "volume"),
                time: TimeRule::EpochSeconds,
                error_pointer: Some("/chart/error".into()),
            },
            // getHistory: {"results":[{"timestamp":"2024-01-02 09:30:00","open":..,..}]}
            Provider::Barchart => Self {
                provider,
                layout: Layout::Rows {
                    rows: "/results".into(),
                },
                fields: FieldNames::new("timestamp", "open", "high", "low", "close", "volume"),
                time: TimeRule::WallClock(chrono_tz::America::New_York),
                error_pointer: Some("/error".into()),
            },
            // Client Portal history: {"data":[{"t":1704205800000,"o":..,"h":..,"l":..,"c":..,"v":..}]}
            Provider::Ibkr => Self {
                provider,
                layout: Layout::Rows {
                    rows: "/data".into(),
                },
                fields: FieldNames::new("t", "o", "h", "l", "c", "v"),
                time: TimeRule::EpochMillis,
                error_pointer: Some("/error".into()),
            },
        }
    }
}
