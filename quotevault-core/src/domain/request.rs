//! FetchRequest and the small value types it is built from.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseTagError {
    #[error("unknown provider tag '{0}' (expected yahoo, barchart or ibkr)")]
    Provider(String),

    #[error("unknown period '{0}' (expected one of 1m 5m 15m 30m 1h 1d 1wk 1mo)")]
    Period(String),

    #[error("invalid symbol '{0}' (must be non-empty, without path separators or '..')")]
    Symbol(String),
}

/// A symbol becomes a directory name under the data root, so it must not
/// be able to leave it.
pub fn check_symbol(symbol: &str) -> Result<(), ParseTagError> {
    let bad = symbol.trim().is_empty()
        || symbol.contains(['/', '\\', '\0'])
        || symbol.contains("..")
        || symbol == ".";
    if bad {
        return Err(ParseTagError::Symbol(symbol.to_string()));
    }
    Ok(())
}

/// Data origin. The tag string is what ends up in the `provider` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Yahoo,
    Barchart,
    Ibkr,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::Yahoo, Provider::Barchart, Provider::Ibkr];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Yahoo => "yahoo",
            Provider::Barchart => "barchart",
            Provider::Ibkr => "ibkr",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "yahoo" => Ok(Provider::Yahoo),
            "barchart" => Ok(Provider::Barchart),
            "ibkr" => Ok(Provider::Ibkr),
            _ => Err(ParseTagError::Provider(s.to_string())),
        }
    }
}

/// Sampling interval of a bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Period {
    #[serde(rename = "1m")]
    Minute1,
    #[serde(rename = "5m")]
    Minute5,
    #[serde(rename = "15m")]
    Minute15,
    #[serde(rename = "30m")]
    Minute30,
    #[serde(rename = "1h")]
    Hour1,
    #[serde(rename = "1d")]
    Daily,
    #[serde(rename = "1wk")]
    Weekly,
    #[serde(rename = "1mo")]
    Monthly,
}

impl Period {
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Minute1 => "1m",
            Period::Minute5 => "5m",
            Period::Minute15 => "15m",
            Period::Minute30 => "30m",
            Period::Hour1 => "1h",
            Period::Daily => "1d",
            Period::Weekly => "1wk",
            Period::Monthly => "1mo",
        }
    }

    pub fn is_intraday(&self) -> bool {
        matches!(
            self,
            Period::Minute1 | Period::Minute5 | Period::Minute15 | Period::Minute30 | Period::Hour1
        )
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Period::Minute1),
            "5m" => Ok(Period::Minute5),
            "15m" => Ok(Period::Minute15),
            "30m" => Ok(Period::Minute30),
            "1h" => Ok(Period::Hour1),
            "1d" => Ok(Period::Daily),
            "1wk" => Ok(Period::Weekly),
            "1mo" => Ok(Period::Monthly),
            _ => Err(ParseTagError::Period(s.to_string())),
        }
    }
}

/// Inclusive calendar date range (UTC dates).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        let day = timestamp.date_naive();
        day >= self.start && day <= self.end
    }

    /// Stable BLAKE3 fingerprint, used in cache keys.
    pub fn fingerprint(&self) -> String {
        let canonical = format!("{}..{}", self.start, self.end);
        let hex = blake3::hash(canonical.as_bytes()).to_hex();
        hex.as_str()[..16].to_string()
    }
}

/// What the orchestration layer asks the core to ingest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    pub symbol: String,
    pub period: Period,
    pub range: DateRange,
    pub provider: Provider,
}

impl FetchRequest {
    pub fn new(
        symbol: impl Into<String>,
        period: Period,
        range: DateRange,
        provider: Provider,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            period,
            range,
            provider,
        }
    }

    /// Reject requests whose symbol cannot be stored safely.
    pub fn check(&self) -> Result<(), ParseTagError> {
        check_symbol(&self.symbol)
    }
}
