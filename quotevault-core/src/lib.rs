//! QuoteVault Core: OHLCV ingestion: rate limiting, normalization,
//! validation, deduplication, atomic storage and caching.
//!
//! One ingestion cycle runs:
//! - `RateLimiter::acquire` (caller sleeps through denials)
//! - `Transformer::normalize` on the provider payload
//! - `Validator::validate` (quality score, typed issues)
//! - `Deduplicator::merge` against the stored series, read through `SeriesCache`
//! - `AtomicStorageWriter::save`, then a cache refresh
//!
//! `IngestPipeline` wires the cycle; `run_batch` runs many in parallel.

pub mod config;
pub mod data;
pub mod domain;

pub use config::{ConfigError, PipelineConfig};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: everything shared across batch workers is Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        // Domain types
        require_send::<domain::CanonicalRecord>();
        require_sync::<domain::CanonicalRecord>();
        require_send::<domain::RecordSeries>();
        require_sync::<domain::RecordSeries>();
        require_send::<domain::FetchRequest>();
        require_sync::<domain::FetchRequest>();

        // Shared-state components
        require_send::<data::RateLimiter>();
        require_sync::<data::RateLimiter>();
        require_send::<data::SeriesCache>();
        require_sync::<data::SeriesCache>();
        require_send::<data::PathLocks>();
        require_sync::<data::PathLocks>();
        require_send::<data::CircuitBreaker>();
        require_sync::<data::CircuitBreaker>();

        // Stateless components
        require_send::<data::Transformer>();
        require_sync::<data::Transformer>();
        require_send::<data::Validator>();
        require_sync::<data::Validator>();
        require_send::<data::Deduplicator>();
        require_sync::<data::Deduplicator>();
        require_send::<data::AtomicStorageWriter>();
        require_sync::<data::AtomicStorageWriter>();

        // Orchestration
        require_send::<data::IngestPipeline>();
        require_sync::<data::IngestPipeline>();
        require_send::<data::FetchResult>();
        require_send::<data::IngestError>();
        require_sync::<data::GuardedSource<data::StaticSource>>();
    }

    /// Pure components take no shared state: a Transformer, Validator and
    /// Deduplicator can run on any thread without locking.
    #[test]
    fn pure_components_run_in_parallel() {
        use rayon::prelude::*;

        let validator = data::Validator::default();
        let dedup = data::Deduplicator::default();
        let totals: Vec<usize> = (0..8)
            .into_par_iter()
            .map(|_| {
                let series = domain::RecordSeries::empty("AAPL", domain::Period::Daily);
                let (merged, _) = dedup.merge(&series, &series);
                assert!(validator.validate(&merged).is_err());
                merged.len()
            })
            .collect();
        assert_eq!(totals, vec![0; 8]);
    }
}
