//! Batch validation and quality scoring.
//!
//! Four ordered passes, each emitting typed issues:
//! - Schema: usable timestamps, finite and non-negative prices
//! - Business rules: OHLC envelope, non-negative volume, 5% single-bar gap warning
//! - Statistical: IQR outlier band over close-to-close returns
//! - Temporal: duplicate timestamps, out-of-order input
//!
//! Errors exclude the offending record from the accepted set; warnings keep it.

use crate::domain::{CanonicalRecord, RecordSeries, TimestampFault};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

const ERROR_PENALTY: f64 = 0.2;
const WARNING_PENALTY: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Pass {
    Schema,
    BusinessRule,
    Statistical,
    Temporal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueKind {
    NonFinitePrice,
    NegativePrice,
    MissingTimestamp,
    UnparseableTimestamp,
    BeforeMinTimestamp,
    FutureTimestamp,
    HighBelowBody,
    LowAboveBody,
    NegativeVolume,
    PriceGap,
    ReturnOutlier,
    DuplicateTimestamp,
    OutOfOrder,
}

impl IssueKind {
    pub fn severity(&self) -> Severity {
        match self {
            IssueKind::FutureTimestamp
            | IssueKind::UnparseableTimestamp
            | IssueKind::PriceGap
            | IssueKind::ReturnOutlier
            | IssueKind::OutOfOrder => Severity::Warning,
            _ => Severity::Error,
        }
    }

    pub fn pass(&self) -> Pass {
        match self {
            IssueKind::NonFinitePrice
            | IssueKind::NegativePrice
            | IssueKind::MissingTimestamp
            | IssueKind::UnparseableTimestamp
            | IssueKind::BeforeMinTimestamp
            | IssueKind::FutureTimestamp => Pass::Schema,
            IssueKind::HighBelowBody
            | IssueKind::LowAboveBody
            | IssueKind::NegativeVolume
            | IssueKind::PriceGap => Pass::BusinessRule,
            IssueKind::ReturnOutlier => Pass::Statistical,
            IssueKind::DuplicateTimestamp | IssueKind::OutOfOrder => Pass::Temporal,
        }
    }
}

/// One finding, located by its row in the incoming batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: Severity,
    pub pass: Pass,
    pub kind: IssueKind,
    pub row: Option<usize>,
    pub timestamp: Option<DateTime<Utc>>,
    pub message: String,
}

impl Issue {
    fn at(kind: IssueKind, row: usize, record: &CanonicalRecord, message: String) -> Self {
        Self {
            severity: kind.severity(),
            pass: kind.pass(),
            kind,
            row: Some(row),
            timestamp: Some(record.timestamp),
            message,
        }
    }

    /// A source row the Transformer could not place in time. Located by
    /// its row in the provider payload.
    fn fault(fault: &TimestampFault) -> Self {
        let (kind, message) = match &fault.raw {
            None => (
                IssueKind::MissingTimestamp,
                format!("source row {} has no timestamp", fault.row),
            ),
            Some(raw) => (
                IssueKind::UnparseableTimestamp,
                format!("source row {} has an unparseable timestamp '{raw}'", fault.row),
            ),
        };
        Self {
            severity: kind.severity(),
            pass: kind.pass(),
            kind,
            row: Some(fault.row),
            timestamp: None,
            message,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{:?}", self.severity, self.kind)?;
        if let Some(row) = self.row {
            write!(f, " row {row}")?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Confidence in a batch, in [0, 1]. Not persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    /// Final score: `base * accepted / total`, clamped.
    pub value: f64,
    /// `1 - (0.2·errors + 0.05·warnings) / total`, clamped.
    pub base: f64,
    pub errors: usize,
    pub warnings: usize,
    pub accepted: usize,
    pub total: usize,
}

impl QualityScore {
    pub fn compute(errors: usize, warnings: usize, accepted: usize, total: usize) -> Self {
        if total == 0 {
            return Self {
                value: 0.0,
                base: 0.0,
                errors,
                warnings,
                accepted,
                total,
            };
        }
        let n = total as f64;
        let penalty = (ERROR_PENALTY * errors as f64 + WARNING_PENALTY * warnings as f64) / n;
        let base = (1.0 - penalty).clamp(0.0, 1.0);
        let completeness = accepted as f64 / n;
        Self {
            value: (base * completeness).clamp(0.0, 1.0),
            base,
            errors,
            warnings,
            accepted,
            total,
        }
    }
}

impl fmt::Display for QualityScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.3} ({} errors, {} warnings, {}/{} accepted)",
            self.value, self.errors, self.warnings, self.accepted, self.total
        )
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("empty batch for {symbol}")]
    EmptyBatch { symbol: String },

    #[error("quality too low for {symbol}: {score} < threshold {threshold}")]
    QualityTooLow {
        symbol: String,
        score: QualityScore,
        threshold: f64,
        issues: Vec<Issue>,
    },
}

/// Validator thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Minimum acceptable score.
    pub min_quality: f64,
    /// Relative close-to-close move that triggers a gap warning.
    pub gap_threshold: f64,
    /// Width of the outlier band in interquartile ranges.
    pub iqr_multiplier: f64,
    /// Fewer returns than this and the statistical pass is skipped.
    pub min_outlier_sample: usize,
    /// How far past "now" a timestamp may be before it is flagged.
    pub future_tolerance_secs: i64,
    /// Bars before this instant are rejected. No floor by default.
    pub min_timestamp: Option<DateTime<Utc>>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            min_quality: 0.5,
            gap_threshold: 0.05,
            iqr_multiplier: 1.5,
            min_outlier_sample: 5,
            future_tolerance_secs: 86_400,
            min_timestamp: None,
        }
    }
}

/// Output of a successful validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationOutcome {
    pub accepted: RecordSeries,
    pub score: QualityScore,
    pub issues: Vec<Issue>,
}

#[derive(Debug, Clone, Default)]
pub struct Validator {
    config: ValidatorConfig,
}

impl Validator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    pub fn validate(&self, series: &RecordSeries) -> Result<ValidationOutcome, ValidationError> {
        self.validate_at(series, Utc::now())
    }

    /// Validate with an explicit "now" for the future-timestamp check.
    ///
    /// Timestamp faults carried on `series` count towards the batch size:
    /// a row without a usable timestamp is never accepted.
    pub fn validate_at(
        &self,
        series: &RecordSeries,
        now: DateTime<Utc>,
    ) -> Result<ValidationOutcome, ValidationError> {
        if series.is_empty() && series.timestamp_faults.is_empty() {
            return Err(ValidationError::EmptyBatch {
                symbol: series.symbol.clone(),
            });
        }

        let records = &series.records;
        let mut excluded = vec![false; records.len()];
        let mut issues: Vec<Issue> = series.timestamp_faults.iter().map(Issue::fault).collect();

        self.schema_pass(records, now, &mut excluded, &mut issues);
        self.business_pass(records, &mut excluded, &mut issues);
        self.statistical_pass(records, &excluded, &mut issues);
        temporal_pass(records, &mut excluded, &mut issues);

        let mut accepted: Vec<CanonicalRecord> = records
            .iter()
            .zip(&excluded)
            .filter(|(_, &dropped)| !dropped)
            .map(|(r, _)| r.clone())
            .collect();
        accepted.sort_by_key(|r| r.timestamp);

        let errors = issues.iter().filter(|i| i.is_error()).count();
        let warnings = issues.len() - errors;
        let total = records.len() + series.timestamp_faults.len();
        let score = QualityScore::compute(errors, warnings, accepted.len(), total);

        if warnings > 0 {
            debug!(symbol = %series.symbol, warnings, "validation warnings");
        }

        if score.value < self.config.min_quality {
            warn!(symbol = %series.symbol, %score, threshold = self.config.min_quality, "batch rejected");
            return Err(ValidationError::QualityTooLow {
                symbol: series.symbol.clone(),
                score,
                threshold: self.config.min_quality,
                issues,
            });
        }

        Ok(ValidationOutcome {
            accepted: RecordSeries {
                symbol: series.symbol.clone(),
                period: series.period,
                records: accepted,
                fetched_at: series.fetched_at,
                timestamp_faults: Vec::new(),
            },
            score,
            issues,
        })
    }

    fn schema_pass(
        &self,
        records: &[CanonicalRecord],
        now: DateTime<Utc>,
        excluded: &mut [bool],
        issues: &mut Vec<Issue>,
    ) {
        let horizon = now + chrono::Duration::seconds(self.config.future_tolerance_secs);
        for (i, r) in records.iter().enumerate() {
            if self.config.min_timestamp.is_some_and(|floor| r.timestamp < floor) {
                issues.push(Issue::at(
                    IssueKind::BeforeMinTimestamp,
                    i,
                    r,
                    format!("timestamp {} is before the configured floor", r.timestamp),
                ));
                excluded[i] = true;
            } else if r.timestamp > horizon {
                issues.push(Issue::at(
                    IssueKind::FutureTimestamp,
                    i,
                    r,
                    format!("timestamp {} is in the future", r.timestamp),
                ));
            }

            if r.has_non_finite_price() {
                issues.push(Issue::at(
                    IssueKind::NonFinitePrice,
                    i,
                    r,
                    "price field is not a finite number".into(),
                ));
                excluded[i] = true;
            } else if r.open < 0.0 || r.high < 0.0 || r.low < 0.0 || r.close < 0.0 {
                issues.push(Issue::at(
                    IssueKind::NegativePrice,
                    i,
                    r,
                    "negative price".into(),
                ));
                excluded[i] = true;
            }
        }
    }

    fn business_pass(
        &self,
        records: &[CanonicalRecord],
        excluded: &mut [bool],
        issues: &mut Vec<Issue>,
    ) {
        for (i, r) in records.iter().enumerate() {
            if excluded[i] {
                continue;
            }
            if !r.high_is_consistent() {
                issues.push(Issue::at(
                    IssueKind::HighBelowBody,
                    i,
                    r,
                    format!(
                        "high {} < max(open {}, close {})",
                        r.high, r.open, r.close
                    ),
                ));
                excluded[i] = true;
            }
            if !r.low_is_consistent() {
                issues.push(Issue::at(
                    IssueKind::LowAboveBody,
                    i,
                    r,
                    format!("low {} > min(open {}, close {})", r.low, r.open, r.close),
                ));
                excluded[i] = true;
            }
            if r.volume < 0 {
                issues.push(Issue::at(
                    IssueKind::NegativeVolume,
                    i,
                    r,
                    format!("volume {} is negative", r.volume),
                ));
                excluded[i] = true;
            }
        }

        let order = chronological(records, excluded);
        for pair in order.windows(2) {
            let (prev, cur) = (&records[pair[0]], &records[pair[1]]);
            if prev.close <= 0.0 {
                continue;
            }
            let gap = (cur.close - prev.close).abs() / prev.close;
            if gap > self.config.gap_threshold {
                issues.push(Issue::at(
                    IssueKind::PriceGap,
                    pair[1],
                    cur,
                    format!("{:.1}% move from previous close {}", gap * 100.0, prev.close),
                ));
            }
        }
    }

    fn statistical_pass(
        &self,
        records: &[CanonicalRecord],
        excluded: &[bool],
        issues: &mut Vec<Issue>,
    ) {
        let order = chronological(records, excluded);
        let returns: Vec<(usize, f64)> = order
            .windows(2)
            .filter(|pair| records[pair[0]].close > 0.0)
            .map(|pair| {
                let (prev, cur) = (&records[pair[0]], &records[pair[1]]);
                (pair[1], cur.close / prev.close - 1.0)
            })
            .collect();

        if returns.len() < self.config.min_outlier_sample {
            return;
        }

        let mut sorted: Vec<f64> = returns.iter().map(|&(_, r)| r).collect();
        sorted.sort_by(f64::total_cmp);
        let q1 = quantile(&sorted, 0.25);
        let q3 = quantile(&sorted, 0.75);
        let iqr = q3 - q1;
        let lower = q1 - self.config.iqr_multiplier * iqr;
        let upper = q3 + self.config.iqr_multiplier * iqr;

        for (row, ret) in returns {
            if ret < lower || ret > upper {
                issues.push(Issue::at(
                    IssueKind::ReturnOutlier,
                    row,
                    &records[row],
                    format!(
                        "return {:.4} outside [{lower:.4}, {upper:.4}]",
                        ret
                    ),
                ));
            }
        }
    }
}

/// Duplicates: first surviving occurrence wins. Out-of-order input is a
/// single warning; the accepted set is re-sorted by the caller.
fn temporal_pass(records: &[CanonicalRecord], excluded: &mut [bool], issues: &mut Vec<Issue>) {
    let mut seen = HashSet::with_capacity(records.len());
    for (i, r) in records.iter().enumerate() {
        if excluded[i] {
            continue;
        }
        if !seen.insert(r.timestamp) {
            issues.push(Issue::at(
                IssueKind::DuplicateTimestamp,
                i,
                r,
                format!("duplicate timestamp {}", r.timestamp),
            ));
            excluded[i] = true;
        }
    }

    if let Some(i) = (1..records.len()).find(|&i| records[i].timestamp < records[i - 1].timestamp) {
        issues.push(Issue::at(
            IssueKind::OutOfOrder,
            i,
            &records[i],
            "batch is not in timestamp order; re-sorted".into(),
        ));
    }
}

/// Indices of surviving records, stable-sorted by timestamp.
fn chronological(records: &[CanonicalRecord], excluded: &[bool]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..records.len()).filter(|&i| !excluded[i]).collect();
    order.sort_by_key(|&i| records[i].timestamp);
    order
}

/// Linear-interpolated quantile of a sorted, non-empty slice.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Period;
    use chrono::TimeZone;

    fn bar(day: u32, open: f64, high: f64, low: f64, close: f64) -> CanonicalRecord {
        CanonicalRecord {
            timestamp: Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
            open,
            high,
            low,
            close,
            volume: 1_000,
            symbol: "AAPL".into(),
            provider: "yahoo".into(),
        }
    }

    fn clean(day: u32, close: f64) -> CanonicalRecord {
        bar(day, close, close + 1.0, close - 1.0, close)
    }

    fn series(records: Vec<CanonicalRecord>) -> RecordSeries {
        RecordSeries::new("AAPL", Period::Daily, records)
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn clean_batch_scores_one() {
        let v = Validator::default();
        let out = v
            .validate_at(&series((2..7).map(|d| clean(d, 100.0)).collect()), now())
            .unwrap();
        assert_eq!(out.accepted.len(), 5);
        assert!(out.issues.is_empty());
        assert_eq!(out.score.value, 1.0);
    }

    #[test]
    fn high_below_open_close_is_rejected() {
        let v = Validator::default();
        let mut records: Vec<_> = (2..7).map(|d| clean(d, 100.0)).collect();
        records[2] = bar(4, 100.0, 99.0, 100.0, 101.0);

        let out = v.validate_at(&series(records), now()).unwrap();
        assert_eq!(out.accepted.len(), 4);
        let rejected = Utc.with_ymd_and_hms(2024, 1, 4, 0, 0, 0).unwrap();
        assert!(out.accepted.records.iter().all(|r| r.timestamp != rejected));
        let issue = out
            .issues
            .iter()
            .find(|i| i.kind == IssueKind::HighBelowBody)
            .unwrap();
        assert_eq!(issue.severity, Severity::Error);
        assert_eq!(issue.pass, Pass::BusinessRule);
        assert_eq!(issue.row, Some(2));
    }

    #[test]
    fn gap_over_five_percent_is_warning_only() {
        let v = Validator::default();
        let records = vec![clean(2, 100.0), clean(3, 100.0), clean(4, 110.0)];
        let out = v.validate_at(&series(records), now()).unwrap();
        assert_eq!(out.accepted.len(), 3);
        let gaps: Vec<_> = out
            .issues
            .iter()
            .filter(|i| i.kind == IssueKind::PriceGap)
            .collect();
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].severity, Severity::Warning);
        assert_eq!(gaps[0].row, Some(2));
    }

    #[test]
    fn duplicate_timestamp_keeps_first_occurrence() {
        let v = Validator::default();
        let mut dup = clean(3, 101.0);
        dup.volume = 5;
        let records = vec![clean(2, 100.0), clean(3, 100.5), dup, clean(4, 101.0)];
        let out = v.validate_at(&series(records), now()).unwrap();

        assert_eq!(out.accepted.len(), 3);
        assert_eq!(out.accepted.records[1].close, 100.5);
        let dups: Vec<_> = out
            .issues
            .iter()
            .filter(|i| i.kind == IssueKind::DuplicateTimestamp)
            .collect();
        assert_eq!(dups.len(), 1);
        assert_eq!(dups[0].row, Some(2));
        assert_eq!(dups[0].pass, Pass::Temporal);
    }

    #[test]
    fn unordered_input_is_resorted_with_warning() {
        let v = Validator::default();
        let records = vec![clean(4, 100.0), clean(2, 100.0), clean(3, 100.0)];
        let out = v.validate_at(&series(records), now()).unwrap();
        assert!(out.accepted.is_strictly_increasing());
        assert!(out
            .issues
            .iter()
            .any(|i| i.kind == IssueKind::OutOfOrder && i.severity == Severity::Warning));
    }

    #[test]
    fn iqr_outlier_is_flagged_and_retained() {
        let v = Validator::new(ValidatorConfig {
            gap_threshold: 1.0,
            ..ValidatorConfig::default()
        });
        let closes = [100.0, 100.5, 101.0, 100.8, 101.2, 101.0, 130.0, 130.2, 130.5];
        let records: Vec<_> = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| clean(i as u32 + 2, c))
            .collect();
        let out = v.validate_at(&series(records), now()).unwrap();
        assert_eq!(out.accepted.len(), closes.len());
        let outliers: Vec<_> = out
            .issues
            .iter()
            .filter(|i| i.kind == IssueKind::ReturnOutlier)
            .collect();
        assert_eq!(outliers.len(), 1);
        assert_eq!(outliers[0].row, Some(6));
        assert_eq!(outliers[0].pass, Pass::Statistical);
    }

    #[test]
    fn statistical_pass_skips_small_samples() {
        let v = Validator::new(ValidatorConfig {
            gap_threshold: 1.0,
            ..ValidatorConfig::default()
        });
        let records = vec![clean(2, 100.0), clean(3, 100.0), clean(4, 150.0)];
        let out = v.validate_at(&series(records), now()).unwrap();
        assert!(out.issues.is_empty());
    }

    #[test]
    fn non_finite_price_is_schema_error() {
        let v = Validator::default();
        let records = vec![
            bar(3, f64::NAN, 101.0, 99.0, 100.0),
            clean(4, 100.0),
            clean(5, 100.0),
            clean(6, 100.0),
            clean(7, 100.0),
        ];
        let out = v.validate_at(&series(records), now()).unwrap();
        let kinds: Vec<_> = out.issues.iter().map(|i| i.kind).collect();
        assert_eq!(kinds, vec![IssueKind::NonFinitePrice]);
        assert_eq!(out.accepted.len(), 4);
    }

    #[test]
    fn bars_before_1970_are_valid() {
        let v = Validator::default();
        let records: Vec<_> = (4..=8)
            .map(|day| {
                let mut r = clean(2, 60.0);
                r.timestamp = Utc.with_ymd_and_hms(1960, 1, day, 0, 0, 0).unwrap();
                r.symbol = "^GSPC".into();
                r
            })
            .collect();
        let mut epoch = clean(2, 60.0);
        epoch.timestamp = DateTime::from_timestamp(0, 0).unwrap();

        let mut all = records;
        all.push(epoch);
        let out = v
            .validate_at(&RecordSeries::new("^GSPC", Period::Daily, all), now())
            .unwrap();
        assert!(out.issues.is_empty(), "{:?}", out.issues);
        assert_eq!(out.accepted.len(), 6);
        assert_eq!(out.score.value, 1.0);
    }

    #[test]
    fn configured_floor_rejects_older_bars() {
        let v = Validator::new(ValidatorConfig {
            min_timestamp: Some(Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap()),
            ..ValidatorConfig::default()
        });
        let records = vec![clean(2, 100.0), clean(3, 100.0), clean(4, 100.0), clean(5, 100.0)];
        let out = v.validate_at(&series(records), now()).unwrap();
        assert_eq!(out.issues.len(), 1);
        assert_eq!(out.issues[0].kind, IssueKind::BeforeMinTimestamp);
        assert_eq!(out.issues[0].severity, Severity::Error);
        assert_eq!(out.accepted.len(), 3);
    }

    #[test]
    fn timestamp_faults_are_scored() {
        let v = Validator::default();
        let records = vec![clean(2, 100.0), clean(3, 100.0), clean(4, 100.0), clean(5, 100.0)];
        let faulty = series(records).with_timestamp_faults(vec![
            TimestampFault { row: 1, raw: None },
            TimestampFault {
                row: 4,
                raw: Some("2024-13-45".into()),
            },
        ]);

        let out = v.validate_at(&faulty, now()).unwrap();
        let missing = out
            .issues
            .iter()
            .find(|i| i.kind == IssueKind::MissingTimestamp)
            .unwrap();
        assert_eq!(missing.severity, Severity::Error);
        assert_eq!(missing.row, Some(1));
        assert!(missing.timestamp.is_none());
        let unparseable = out
            .issues
            .iter()
            .find(|i| i.kind == IssueKind::UnparseableTimestamp)
            .unwrap();
        assert_eq!(unparseable.severity, Severity::Warning);
        assert_eq!(unparseable.row, Some(4));

        // 1 error + 1 warning over 6 rows, 4 accepted
        assert_eq!(out.score.total, 6);
        assert_eq!(out.score.accepted, 4);
        let expected = (1.0 - 0.25 / 6.0) * 4.0 / 6.0;
        assert!((out.score.value - expected).abs() < 1e-9);
        assert!(out.accepted.timestamp_faults.is_empty());
    }

    #[test]
    fn batch_of_only_faults_is_too_low_not_empty() {
        let v = Validator::default();
        let faulty = series(vec![]).with_timestamp_faults(vec![TimestampFault { row: 0, raw: None }]);
        assert!(matches!(
            v.validate_at(&faulty, now()),
            Err(ValidationError::QualityTooLow { .. })
        ));
    }

    #[test]
    fn future_timestamp_is_warning() {
        let v = Validator::default();
        let far = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let mut r = clean(2, 100.0);
        r.timestamp = far;
        let out = v.validate_at(&series(vec![clean(2, 100.0), r]), now()).unwrap();
        assert!(out
            .issues
            .iter()
            .any(|i| i.kind == IssueKind::FutureTimestamp && i.severity == Severity::Warning));
        assert_eq!(out.accepted.len(), 2);
    }

    #[test]
    fn mostly_broken_batch_is_quality_too_low() {
        let v = Validator::default();
        let records = vec![
            bar(2, 100.0, 99.0, 100.0, 101.0),
            bar(3, 100.0, 99.0, 100.0, 101.0),
            clean(4, 100.0),
        ];
        match v.validate_at(&series(records), now()) {
            Err(ValidationError::QualityTooLow { score, issues, .. }) => {
                assert!(score.value < 0.5);
                assert_eq!(issues.len(), 2);
            }
            other => panic!("expected QualityTooLow, got {other:?}"),
        }
    }

    #[test]
    fn empty_batch_is_an_error() {
        let v = Validator::default();
        assert!(matches!(
            v.validate_at(&series(vec![]), now()),
            Err(ValidationError::EmptyBatch { .. })
        ));
    }

    #[test]
    fn score_formula() {
        // 2 errors over 5 rows, 3 accepted
        let s = QualityScore::compute(2, 0, 3, 5);
        assert!((s.base - 0.92).abs() < 1e-9);
        assert!((s.value - 0.552).abs() < 1e-9);

        let clamped = QualityScore::compute(10, 10, 0, 1);
        assert_eq!(clamped.value, 0.0);
        assert_eq!(clamped.base, 0.0);
    }

    #[test]
    fn quantile_interpolates() {
        let v = [1.0, 2.0, 3.0, 4.0];
        assert!((quantile(&v, 0.25) - 1.75).abs() < 1e-12);
        assert!((quantile(&v, 0.75) - 3.25).abs() < 1e-12);
    }
}
