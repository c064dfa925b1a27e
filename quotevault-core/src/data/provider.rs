//! Payload sources: the seam between the core and whatever talks to providers.
//!
//! The core never performs network I/O. A `PayloadSource` hands it a raw JSON
//! payload for a `FetchRequest`; authentication, sessions and transport retry
//! live in the implementation. `GuardedSource` layers a circuit breaker on
//! top of any source as middleware.

use super::circuit_breaker::{BreakerConfig, CircuitBreaker};
use crate::domain::{FetchRequest, Provider};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("{provider} has no payload for {symbol}")]
    NoPayload { provider: Provider, symbol: String },

    #[error("{provider} unavailable: {reason}")]
    Unavailable { provider: Provider, reason: String },

    #[error("{provider} circuit open, retry in {}s", .retry_after.as_secs())]
    CircuitOpen {
        provider: Provider,
        retry_after: Duration,
    },

    #[error("failed to read payload {}: {reason}", .path.display())]
    Unreadable { path: PathBuf, reason: String },
}

impl SourceError {
    /// Whether this failure says something about the provider's health.
    fn counts_against_provider(&self) -> bool {
        matches!(self, SourceError::Unavailable { .. })
    }
}

/// Supplies raw payloads.
pub trait PayloadSource: Send + Sync {
    fn name(&self) -> &str;

    fn fetch(&self, request: &FetchRequest) -> Result<Value, SourceError>;
}

/// Pre-loaded payloads keyed by (provider, symbol). Used by the CLI for
/// payload files and by tests as a fixture source.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    payloads: HashMap<(Provider, String), Value>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, provider: Provider, symbol: impl Into<String>, payload: Value) {
        self.payloads.insert((provider, symbol.into()), payload);
    }

    pub fn with(mut self, provider: Provider, symbol: impl Into<String>, payload: Value) -> Self {
        self.insert(provider, symbol, payload);
        self
    }

    /// Load a JSON payload file for (provider, symbol).
    pub fn load_file(
        &mut self,
        provider: Provider,
        symbol: impl Into<String>,
        path: &Path,
    ) -> Result<(), SourceError> {
        let unreadable = |reason: String| SourceError::Unreadable {
            path: path.to_path_buf(),
            reason,
        };
        let content = fs::read_to_string(path).map_err(|e| unreadable(e.to_string()))?;
        let payload = serde_json::from_str(&content).map_err(|e| unreadable(e.to_string()))?;
        self.insert(provider, symbol, payload);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }
}

impl PayloadSource for StaticSource {
    fn name(&self) -> &str {
        "static"
    }

    fn fetch(&self, request: &FetchRequest) -> Result<Value, SourceError> {
        self.payloads
            .get(&(request.provider, request.symbol.clone()))
            .cloned()
            .ok_or_else(|| SourceError::NoPayload {
                provider: request.provider,
                symbol: request.symbol.clone(),
            })
    }
}

/// Wraps a source with one circuit breaker per provider.
#[derive(Debug)]
pub struct GuardedSource<S> {
    inner: S,
    breakers: HashMap<Provider, CircuitBreaker>,
}

impl<S: PayloadSource> GuardedSource<S> {
    pub fn new(inner: S, config: &BreakerConfig) -> Self {
        let breakers = Provider::ALL
            .iter()
            .map(|&p| (p, CircuitBreaker::new(config)))
            .collect();
        Self { inner, breakers }
    }

    pub fn breaker(&self, provider: Provider) -> Option<&CircuitBreaker> {
        self.breakers.get(&provider)
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: PayloadSource> PayloadSource for GuardedSource<S> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn fetch(&self, request: &FetchRequest) -> Result<Value, SourceError> {
        let Some(breaker) = self.breakers.get(&request.provider) else {
            return self.inner.fetch(request);
        };

        breaker
            .check()
            .map_err(|retry_after| SourceError::CircuitOpen {
                provider: request.provider,
                retry_after,
            })?;

        match self.inner.fetch(request) {
            Ok(payload) => {
                breaker.record_success();
                Ok(payload)
            }
            Err(e) => {
                if e.counts_against_provider() {
                    debug!(provider = %request.provider, error = %e, "source failure recorded");
                    breaker.record_failure();
                }
                Err(e)
            }
        }
    }
}
