//! Ingestion pipeline components and the orchestration around them.

pub mod batch;
pub mod cache;
pub mod circuit_breaker;
pub mod dedup;
pub mod mapping;
pub mod pipeline;
pub mod provider;
pub mod rate_limiter;
pub mod storage;
pub mod transform;
pub mod validator;

pub use batch::{run_batch, BatchOutcome};
pub use cache::{CacheConfig, CacheKey, CacheStats, SeriesCache};
pub use circuit_breaker::{BreakerConfig, CircuitBreaker};
pub use dedup::{ConflictRule, DedupConfig, DedupReport, DedupStrategy, Deduplicator};
pub use mapping::{ProviderMapping, TimeRule};
pub use pipeline::{FetchResult, IngestError, IngestPipeline};
pub use provider::{GuardedSource, PayloadSource, SourceError, StaticSource};
pub use rate_limiter::{Outcome, RateLimitConfig, RateLimiter, WindowKind};
pub use storage::{
    plan_fetch, read_metadata, series_path, AtomicStorageWriter, DownloadMetadata, FetchPlan,
    PathLocks, SeriesFormat, SeriesReader, StorageError, StorageReport,
};
pub use transform::{TransformError, Transformer};
pub use validator::{
    Issue, IssueKind, Pass, QualityScore, Severity, ValidationError, ValidationOutcome, Validator,
    ValidatorConfig,
};
