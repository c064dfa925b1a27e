//! Parallel batch of ingestion cycles.
//!
//! Each request is an independent job on the rayon pool. Jobs share the
//! pipeline's limiter and cache; a failure (or panic) in one job is reported
//! in its own slot and never aborts its siblings.

use super::pipeline::{FetchResult, IngestError, IngestPipeline};
use super::provider::PayloadSource;
use super::rate_limiter::Outcome;
use crate::domain::FetchRequest;
use rayon::prelude::*;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;
use tracing::{info, warn};

/// Per-request outcome, in request order.
pub type BatchOutcome = Vec<(FetchRequest, Result<FetchResult, IngestError>)>;

/// Run every request through `pipeline`, sleeping through rate-limit denials
/// for at most `max_wait` per job.
pub fn run_batch<S>(
    pipeline: &IngestPipeline,
    source: &S,
    requests: Vec<FetchRequest>,
    max_wait: Duration,
) -> BatchOutcome
where
    S: PayloadSource + ?Sized,
{
    let total = requests.len();
    let results: BatchOutcome = requests
        .into_par_iter()
        .map(|request| {
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                run_one(pipeline, source, &request, max_wait)
            }))
            .unwrap_or_else(|payload| {
                Err(IngestError::Panicked {
                    symbol: request.symbol.clone(),
                    message: panic_message(payload.as_ref()),
                })
            });
            (request, result)
        })
        .collect();

    let failed = results.iter().filter(|(_, r)| r.is_err()).count();
    info!(total, succeeded = total - failed, failed, "batch complete");
    results
}

fn run_one<S>(
    pipeline: &IngestPipeline,
    source: &S,
    request: &FetchRequest,
    max_wait: Duration,
) -> Result<FetchResult, IngestError>
where
    S: PayloadSource + ?Sized,
{
    let mut waited = Duration::ZERO;
    loop {
        match pipeline.admit(request) {
            Outcome::Allowed => break,
            Outcome::Denied { wait, window } => {
                if waited + wait > max_wait {
                    return Err(IngestError::RateLimitWaitExceeded {
                        symbol: request.symbol.clone(),
                        window,
                        wait,
                        max_wait,
                    });
                }
                std::thread::sleep(wait);
                waited += wait;
            }
        }
    }

    let payload = source.fetch(request)?;
    let result = pipeline.process(request, &payload);
    if let Err(e) = &result {
        warn!(symbol = %request.symbol, provider = %request.provider, error = %e, "ingestion failed");
    }
    result
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}
