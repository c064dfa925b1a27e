//! One ingestion cycle: admit → normalize → validate → merge → save → cache.
//!
//! The pipeline owns no network I/O. The caller asks `admit()` for a rate
//! limit slot, obtains the raw payload from a `PayloadSource`, then hands it
//! to `process()`.

use super::cache::{CacheKey, SeriesCache};
use super::dedup::{DedupReport, Deduplicator};
use super::provider::{PayloadSource, SourceError};
use super::rate_limiter::{Outcome, RateLimiter, WindowKind};
use super::storage::{
    plan_fetch, read_metadata, series_path, AtomicStorageWriter, FetchPlan, PathLocks,
    SeriesFormat, SeriesReader, StorageError, StorageReport,
};
use super::transform::{TransformError, Transformer};
use super::validator::{Issue, QualityScore, ValidationError, Validator};
use crate::config::PipelineConfig;
use crate::domain::{FetchRequest, ParseTagError, Period, RecordSeries};
use chrono::Utc;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Everything that can end an ingestion cycle. Each wraps the component
/// error with its full context.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    InvalidRequest(#[from] ParseTagError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("{symbol}: {window:?} rate limit would need {}s more than the {}s allowed", .wait.as_secs(), .max_wait.as_secs())]
    RateLimitWaitExceeded {
        symbol: String,
        window: WindowKind,
        wait: Duration,
        max_wait: Duration,
    },

    #[error("{symbol}: ingestion job panicked: {message}")]
    Panicked { symbol: String, message: String },
}

/// Outcome of a successful cycle.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub request: FetchRequest,
    pub storage: StorageReport,
    pub dedup: DedupReport,
    pub quality: QualityScore,
    pub issues: Vec<Issue>,
}

pub struct IngestPipeline {
    limiter: Arc<RateLimiter>,
    cache: Arc<SeriesCache>,
    transformer: Transformer,
    validator: Validator,
    dedup: Deduplicator,
    writer: AtomicStorageWriter,
    root: PathBuf,
    format: SeriesFormat,
}

impl IngestPipeline {
    pub fn new(config: &PipelineConfig, root: impl Into<PathBuf>, format: SeriesFormat) -> Self {
        let validator = Validator::new(config.validation.clone());
        let dedup = Deduplicator::new(config.dedup.clone());
        Self {
            limiter: Arc::new(RateLimiter::new(&config.rate_limits)),
            cache: Arc::new(SeriesCache::new(config.cache.clone())),
            transformer: Transformer::new(),
            writer: AtomicStorageWriter::new(validator.clone(), dedup.clone()),
            validator,
            dedup,
            root: root.into(),
            format,
        }
    }

    /// Share a limiter with other pipelines hitting the same providers.
    pub fn with_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_cache(mut self, cache: Arc<SeriesCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_transformer(mut self, transformer: Transformer) -> Self {
        self.transformer = transformer;
        self
    }

    pub fn with_locks(mut self, locks: Arc<PathLocks>) -> Self {
        self.writer = self.writer.with_locks(locks);
        self
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn cache(&self) -> &Arc<SeriesCache> {
        &self.cache
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn format(&self) -> SeriesFormat {
        self.format
    }

    pub fn series_path(&self, symbol: &str, period: Period) -> PathBuf {
        series_path(&self.root, symbol, period, self.format)
    }

    /// Ask the shared limiter for a slot. Never sleeps.
    pub fn admit(&self, request: &FetchRequest) -> Outcome {
        let outcome = self.limiter.acquire();
        if let Outcome::Denied { wait, window } = outcome {
            debug!(symbol = %request.symbol, ?window, wait_ms = wait.as_millis() as u64, "admission denied");
        }
        outcome
    }

    /// Decide how much of `request.range` still needs fetching.
    pub fn plan(&self, request: &FetchRequest) -> Result<FetchPlan, StorageError> {
        let meta = read_metadata(&self.series_path(&request.symbol, request.period))?;
        Ok(plan_fetch(meta.as_ref(), &request.range))
    }

    /// The stored series, through the cache. Empty if nothing is stored yet.
    pub fn load_existing(&self, symbol: &str, period: Period) -> Result<RecordSeries, StorageError> {
        let key = CacheKey::stored(symbol, period);
        if let Some(series) = self.cache.get(&key) {
            return Ok(series);
        }
        match SeriesReader::load(&self.series_path(symbol, period)) {
            Ok(series) => {
                self.cache.put(key, series.clone());
                Ok(series)
            }
            Err(StorageError::NotFound { .. }) => Ok(RecordSeries::empty(symbol, period)),
            Err(e) => Err(e),
        }
    }

    /// Run one cycle on an already-fetched payload.
    pub fn process(&self, request: &FetchRequest, payload: &Value) -> Result<FetchResult, IngestError> {
        request.check()?;
        let incoming = self
            .transformer
            .normalize(payload, request)?
            .with_fetched_at(Utc::now());
        debug!(
            symbol = %request.symbol,
            provider = %request.provider,
            rows = incoming.len(),
            timestamp_faults = incoming.timestamp_faults.len(),
            "payload normalized"
        );

        let outcome = self.validator.validate(&incoming)?;
        if !outcome.issues.is_empty() {
            info!(
                symbol = %request.symbol,
                score = outcome.score.value,
                issues = outcome.issues.len(),
                "batch validated with issues"
            );
        }

        let existing = self.load_existing(&request.symbol, request.period)?;
        let (merged, dedup) = self.dedup.merge(&existing, &outcome.accepted);

        let path = self.series_path(&request.symbol, request.period);
        let storage = self.writer.save(&path, &merged)?;
        self.refresh_cache(&request.symbol, request.period, &path);

        Ok(FetchResult {
            request: request.clone(),
            storage,
            dedup,
            quality: outcome.score,
            issues: outcome.issues,
        })
    }

    /// Fetch from `source` and process. Admission is the caller's job.
    pub fn ingest(
        &self,
        source: &dyn PayloadSource,
        request: &FetchRequest,
    ) -> Result<FetchResult, IngestError> {
        let payload = source.fetch(request)?;
        self.process(request, &payload)
    }

    fn refresh_cache(&self, symbol: &str, period: Period, path: &Path) {
        self.cache.invalidate_series(symbol, period);
        match SeriesReader::load(path) {
            Ok(series) => self.cache.put(CacheKey::stored(symbol, period), series),
            Err(e) => warn!(%symbol, error = %e, "saved series could not be re-read for the cache"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DateRange, Provider};
    use chrono::NaiveDate;
    use serde_json::json;

    fn request() -> FetchRequest {
        FetchRequest::new(
            "AAPL",
            Period::Daily,
            DateRange::new(
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            ),
            Provider::Yahoo,
        )
    }

    fn payload(days: &[i64], close: f64) -> Value {
        let ts: Vec<i64> = days.iter().map(|d| 1_704_153_600 + d * 86_400).collect();
        let n = days.len();
        json!({
            "chart": {
                "result": [{
                    "timestamp": ts,
                    "indicators": { "quote": [{
                        "open": vec![close; n],
                        "high": vec![close + 1.0; n],
                        "low": vec![close - 1.0; n],
                        "close": vec![close; n],
                        "volume": vec![1000; n],
                    }]}
                }],
                "error": null
            }
        })
    }

    #[test]
    fn process_saves_and_populates_cache() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = IngestPipeline::new(&PipelineConfig::default(), dir.path(), SeriesFormat::Csv);

        let result = pipeline.process(&request(), &payload(&[0, 1, 2], 100.0)).unwrap();
        assert_eq!(result.storage.rows, 3);
        assert_eq!(result.quality.value, 1.0);
        assert_eq!(result.dedup.duplicate_count, 0);

        assert!(pipeline.series_path("AAPL", Period::Daily).exists());
        let cached = pipeline.cache().get(&CacheKey::stored("AAPL", Period::Daily));
        assert_eq!(cached.map(|s| s.len()), Some(3));
    }

    #[test]
    fn second_cycle_merges_with_stored_data() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = IngestPipeline::new(&PipelineConfig::default(), dir.path(), SeriesFormat::Csv);

        pipeline.process(&request(), &payload(&[0, 1, 2], 100.0)).unwrap();
        let second = pipeline.process(&request(), &payload(&[2, 3], 101.0)).unwrap();

        assert_eq!(second.dedup.duplicate_count, 1);
        assert_eq!(second.storage.rows, 4);
        // Newer batch wins the tie on provider
        let stored = pipeline.load_existing("AAPL", Period::Daily).unwrap();
        assert_eq!(stored.records[2].close, 101.0);
    }

    #[test]
    fn plan_reflects_stored_coverage() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = IngestPipeline::new(&PipelineConfig::default(), dir.path(), SeriesFormat::Csv);
        assert_eq!(pipeline.plan(&request()).unwrap(), FetchPlan::Full);

        pipeline.process(&request(), &payload(&[0, 1, 2], 100.0)).unwrap();
        assert!(matches!(
            pipeline.plan(&request()).unwrap(),
            FetchPlan::Incremental { .. }
        ));
    }

    #[test]
    fn schema_mismatch_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = IngestPipeline::new(&PipelineConfig::default(), dir.path(), SeriesFormat::Csv);
        let err = pipeline
            .process(&request(), &json!({"chart": {"result": [{}], "error": null}}))
            .unwrap_err();
        assert!(matches!(err, IngestError::Transform(TransformError::SchemaMismatch { .. })));
        assert!(!pipeline.series_path("AAPL", Period::Daily).exists());
    }

    #[test]
    fn symbol_outside_data_root_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("data");
        let pipeline = IngestPipeline::new(&PipelineConfig::default(), &root, SeriesFormat::Csv);
        let mut escaping = request();
        escaping.symbol = "../../escaped".into();

        let err = pipeline
            .process(&escaping, &payload(&[0, 1, 2], 100.0))
            .unwrap_err();
        assert!(matches!(err, IngestError::InvalidRequest(ParseTagError::Symbol(_))));
        assert!(!root.exists());
        assert!(!dir.path().join("escaped").exists());
    }

    #[test]
    fn null_timestamp_drops_only_that_row() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = IngestPipeline::new(&PipelineConfig::default(), dir.path(), SeriesFormat::Csv);
        let payload = json!({
            "chart": {
                "result": [{
                    "timestamp": [1_704_153_600_i64, null, 1_704_326_400_i64],
                    "indicators": { "quote": [{
                        "open": [100.0, 100.0, 100.0],
                        "high": [101.0, 101.0, 101.0],
                        "low": [99.0, 99.0, 99.0],
                        "close": [100.0, 100.0, 100.0],
                        "volume": [1000, 1000, 1000]
                    }]}
                }],
                "error": null
            }
        });

        let result = pipeline.process(&request(), &payload).unwrap();
        assert_eq!(result.storage.rows, 2);
        assert_eq!(result.quality.total, 3);
        assert_eq!(result.quality.accepted, 2);
        assert!(result
            .issues
            .iter()
            .any(|i| i.kind == crate::data::IssueKind::MissingTimestamp && i.row == Some(1)));
    }

    #[test]
    fn admit_uses_shared_limiter() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PipelineConfig::default();
        config.rate_limits.burst = 1;
        let pipeline = IngestPipeline::new(&config, dir.path(), SeriesFormat::Csv);
        assert!(pipeline.admit(&request()).is_allowed());
        assert!(!pipeline.admit(&request()).is_allowed());
    }
}
