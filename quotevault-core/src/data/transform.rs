//! Transformer: maps a provider payload into canonical records.
//!
//! Pure: no I/O, no clock. A missing required source field rejects the whole
//! batch with `SchemaMismatch`; nothing is partially transformed. A row whose
//! timestamp is null or unparseable is set aside as a `TimestampFault` on the
//! returned series for the Validator to score.
//!
//! Timestamps are truncated to whole microseconds, the resolution both
//! storage formats share.

use super::mapping::{FieldNames, Layout, ProviderMapping, TimeRule};
use crate::domain::{CanonicalRecord, FetchRequest, Provider, RecordSeries, TimestampFault};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransformError {
    #[error("{provider}: required field '{field}' is absent{}", row_suffix(.row))]
    SchemaMismatch {
        provider: Provider,
        field: String,
        row: Option<usize>,
    },

    #[error("{provider} reported an error: {code}: {description}")]
    ProviderReported {
        provider: Provider,
        code: String,
        description: String,
    },

    #[error("{provider}: malformed payload: {reason}")]
    MalformedPayload { provider: Provider, reason: String },
}

fn row_suffix(row: &Option<usize>) -> String {
    row.map(|r| format!(" (row {r})")).unwrap_or_default()
}

/// Borrowed view of one source row before coercion.
struct SourceRow<'a> {
    timestamp: &'a Value,
    open: Option<&'a Value>,
    high: Option<&'a Value>,
    low: Option<&'a Value>,
    close: Option<&'a Value>,
    volume: Option<&'a Value>,
}

impl SourceRow<'_> {
    /// Holidays in the Yahoo feed come through as all-null rows.
    fn is_blank(&self) -> bool {
        [self.open, self.high, self.low, self.close]
            .iter()
            .all(|v| v.map_or(true, Value::is_null))
    }
}

/// Normalizes raw payloads using the provider mapping table.
#[derive(Debug, Clone, Default)]
pub struct Transformer {
    overrides: HashMap<Provider, ProviderMapping>,
}

impl Transformer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the built-in mapping for `mapping.provider`.
    pub fn with_mapping(mut self, mapping: ProviderMapping) -> Self {
        self.overrides.insert(mapping.provider, mapping);
        self
    }

    pub fn mapping(&self, provider: Provider) -> ProviderMapping {
        self.overrides
            .get(&provider)
            .cloned()
            .unwrap_or_else(|| ProviderMapping::builtin(provider))
    }

    /// Normalize `payload` for `request.symbol` from `request.provider`.
    ///
    /// Records are tagged with the symbol and provider tag and returned sorted
    /// ascending by timestamp. Duplicates and OHLC violations are left in
    /// place for the Validator to judge.
    pub fn normalize(
        &self,
        payload: &Value,
        request: &FetchRequest,
    ) -> Result<RecordSeries, TransformError> {
        let mapping = self.mapping(request.provider);
        let provider = mapping.provider;

        if !payload.is_object() {
            return Err(TransformError::MalformedPayload {
                provider,
                reason: "payload is not a JSON object".into(),
            });
        }
        check_reported_error(payload, &mapping)?;

        let rows = match &mapping.layout {
            Layout::Columnar { timestamps, values } => {
                columnar_rows(payload, provider, &mapping.fields, timestamps, values)?
            }
            Layout::Rows { rows } => object_rows(payload, provider, &mapping.fields, rows)?,
        };

        let mut records = Vec::with_capacity(rows.len());
        let mut faults = Vec::new();
        for (i, row) in rows.iter().enumerate() {
            if row.is_blank() {
                continue;
            }
            let Some(timestamp) = parse_timestamp(row.timestamp, mapping.time) else {
                faults.push(TimestampFault {
                    row: i,
                    raw: (!row.timestamp.is_null()).then(|| display_value(row.timestamp)),
                });
                continue;
            };
            records.push(CanonicalRecord {
                timestamp,
                open: coerce_price(row.open),
                high: coerce_price(row.high),
                low: coerce_price(row.low),
                close: coerce_price(row.close),
                volume: coerce_volume(row.volume),
                symbol: request.symbol.clone(),
                provider: provider.as_str().to_string(),
            });
        }

        records.sort_by_key(|r| r.timestamp);
        Ok(
            RecordSeries::new(request.symbol.clone(), request.period, records)
                .with_timestamp_faults(faults),
        )
    }
}

fn check_reported_error(payload: &Value, mapping: &ProviderMapping) -> Result<(), TransformError> {
    let Some(pointer) = &mapping.error_pointer else {
        return Ok(());
    };
    match payload.pointer(pointer) {
        None | Some(Value::Null) => Ok(()),
        Some(Value::Object(err)) => Err(TransformError::ProviderReported {
            provider: mapping.provider,
            code: err
                .get("code")
                .map(display_value)
                .unwrap_or_else(|| "unknown".into()),
            description: err
                .get("description")
                .or_else(|| err.get("message"))
                .map(display_value)
                .unwrap_or_default(),
        }),
        Some(other) => Err(TransformError::ProviderReported {
            provider: mapping.provider,
            code: "error".into(),
            description: display_value(other),
        }),
    }
}

fn columnar_rows<'a>(
    payload: &'a Value,
    provider: Provider,
    fields: &FieldNames,
    timestamps_ptr: &str,
    values_ptr: &str,
) -> Result<Vec<SourceRow<'a>>, TransformError> {
    let missing = |field: &str| TransformError::SchemaMismatch {
        provider,
        field: field.to_string(),
        row: None,
    };

    let timestamps = payload
        .pointer(timestamps_ptr)
        .and_then(Value::as_array)
        .ok_or_else(|| missing(&fields.timestamp))?;
    let values = payload
        .pointer(values_ptr)
        .and_then(Value::as_object)
        .ok_or_else(|| missing(values_ptr))?;

    let column = |name: &str| -> Result<&'a Vec<Value>, TransformError> {
        values
            .get(name)
            .and_then(Value::as_array)
            .ok_or_else(|| missing(name))
    };
    let open = column(&fields.open)?;
    let high = column(&fields.high)?;
    let low = column(&fields.low)?;
    let close = column(&fields.close)?;
    let volume = values.get(&fields.volume).and_then(Value::as_array);

    Ok(timestamps
        .iter()
        .enumerate()
        .map(|(i, ts)| SourceRow {
            timestamp: ts,
            open: open.get(i),
            high: high.get(i),
            low: low.get(i),
            close: close.get(i),
            volume: volume.and_then(|v| v.get(i)),
        })
        .collect())
}

fn object_rows<'a>(
    payload: &'a Value,
    provider: Provider,
    fields: &FieldNames,
    rows_ptr: &str,
) -> Result<Vec<SourceRow<'a>>, TransformError> {
    let rows = payload
        .pointer(rows_ptr)
        .and_then(Value::as_array)
        .ok_or_else(|| TransformError::SchemaMismatch {
            provider,
            field: rows_ptr.to_string(),
            row: None,
        })?;

    rows.iter()
        .enumerate()
        .map(|(i, row)| {
            let obj = row
                .as_object()
                .ok_or_else(|| TransformError::MalformedPayload {
                    provider,
                    reason: format!("row {i} is not an object"),
                })?;
            let required = |name: &str| -> Result<&'a Value, TransformError> {
                obj.get(name).ok_or_else(|| TransformError::SchemaMismatch {
                    provider,
                    field: name.to_string(),
                    row: Some(i),
                })
            };
            Ok(SourceRow {
                timestamp: required(&fields.timestamp)?,
                open: Some(required(&fields.open)?),
                high: Some(required(&fields.high)?),
                low: Some(required(&fields.low)?),
                close: Some(required(&fields.close)?),
                volume: obj.get(&fields.volume),
            })
        })
        .collect()
}

fn parse_timestamp(value: &Value, rule: TimeRule) -> Option<DateTime<Utc>> {
    let parsed = match rule {
        TimeRule::EpochSeconds => DateTime::from_timestamp(as_epoch(value)?, 0),
        TimeRule::EpochMillis => DateTime::from_timestamp_millis(as_epoch(value)?),
        TimeRule::WallClock(tz) => parse_wall_clock(value.as_str()?, tz),
    }?;
    parsed.with_nanosecond(parsed.nanosecond() / 1_000 * 1_000)
}

fn as_epoch(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

const WALL_CLOCK_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

fn parse_wall_clock(raw: &str, tz: Tz) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = WALL_CLOCK_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;
    localize(naive, tz)
}

/// Ambiguous wall-clock times (DST fall-back) take the earlier instant;
/// non-existent ones (spring-forward gap) shift forward by the gap.
fn localize(naive: NaiveDateTime, tz: Tz) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| {
            tz.from_local_datetime(&(naive + chrono::Duration::hours(1)))
                .earliest()
        })
        .map(|dt| dt.with_timezone(&Utc))
}

fn coerce_price(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(f64::NAN),
        Some(Value::String(s)) => s.trim().replace(',', "").parse().unwrap_or(f64::NAN),
        _ => f64::NAN,
    }
}

fn coerce_volume(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_u64().map(|u| i64::try_from(u).unwrap_or(i64::MAX)))
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Some(Value::String(s)) => {
            let s = s.trim().replace(',', "");
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
                .unwrap_or(0)
        }
        _ => 0,
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
