//! Sliding-window rate limiter for outbound provider requests.
//!
//! Four independent windows (burst 10s, minute 60s, hourly 3600s, daily
//! 86400s) each hold the instants of admitted requests. A request is admitted
//! only if every window has room; the timestamp is then recorded into all of
//! them under the same lock, so check-then-record cannot race.
//!
//! The limiter never sleeps. A `Denied` outcome carries the wait the caller
//! should honor before retrying.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// One of the four quota horizons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    Burst,
    Minute,
    Hourly,
    Daily,
}

impl WindowKind {
    pub const ALL: [WindowKind; 4] = [
        WindowKind::Burst,
        WindowKind::Minute,
        WindowKind::Hourly,
        WindowKind::Daily,
    ];

    pub fn horizon(&self) -> Duration {
        match self {
            WindowKind::Burst => Duration::from_secs(10),
            WindowKind::Minute => Duration::from_secs(60),
            WindowKind::Hourly => Duration::from_secs(3_600),
            WindowKind::Daily => Duration::from_secs(86_400),
        }
    }
}

/// Per-window capacities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub burst: u32,
    pub per_minute: u32,
    pub per_hour: u32,
    pub per_day: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            burst: 10,
            per_minute: 60,
            per_hour: 1_500,
            per_day: 20_000,
        }
    }
}

impl RateLimitConfig {
    fn capacity(&self, kind: WindowKind) -> u32 {
        match kind {
            WindowKind::Burst => self.burst,
            WindowKind::Minute => self.per_minute,
            WindowKind::Hourly => self.per_hour,
            WindowKind::Daily => self.per_day,
        }
    }
}

/// Result of `acquire()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Allowed,
    /// `window` is the exhausted window with the longest wait.
    Denied { wait: Duration, window: WindowKind },
}

impl Outcome {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Outcome::Allowed)
    }
}

/// Request timestamps inside one horizon.
#[derive(Debug)]
pub struct RateWindow {
    kind: WindowKind,
    capacity: u32,
    hits: VecDeque<Instant>,
}

impl RateWindow {
    fn new(kind: WindowKind, capacity: u32) -> Self {
        Self {
            kind,
            capacity,
            hits: VecDeque::with_capacity(capacity.min(1_024) as usize),
        }
    }

    /// Drop entries that have aged out of the horizon.
    fn purge(&mut self, now: Instant) {
        let horizon = self.kind.horizon();
        while let Some(&oldest) = self.hits.front() {
            if now.saturating_duration_since(oldest) >= horizon {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }

    fn has_room(&self) -> bool {
        (self.hits.len() as u64) < self.capacity as u64
    }

    /// `horizon - (now - oldest)`. A zero-capacity window waits a full horizon.
    fn wait(&self, now: Instant) -> Duration {
        match self.hits.front() {
            Some(&oldest) => self
                .kind
                .horizon()
                .saturating_sub(now.saturating_duration_since(oldest)),
            None => self.kind.horizon(),
        }
    }

    pub fn kind(&self) -> WindowKind {
        self.kind
    }

    pub fn used(&self) -> usize {
        self.hits.len()
    }
}

/// Remaining quota for one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowUsage {
    pub kind: WindowKind,
    pub used: u32,
    pub capacity: u32,
}

/// Thread-safe four-window limiter. Share it behind an `Arc`.
#[derive(Debug)]
pub struct RateLimiter {
    windows: Mutex<[RateWindow; 4]>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let windows = WindowKind::ALL.map(|kind| RateWindow::new(kind, config.capacity(kind)));
        Self {
            windows: Mutex::new(windows),
        }
    }

    fn lock(&self) -> MutexGuard<'_, [RateWindow; 4]> {
        self.windows.lock().unwrap_or_else(|poisoned| {
            warn!("rate limiter mutex was poisoned, recovering");
            PoisonError::into_inner(poisoned)
        })
    }

    /// Try to admit one request now.
    pub fn acquire(&self) -> Outcome {
        self.acquire_at(Instant::now())
    }

    /// Try to admit one request at `now`.
    pub fn acquire_at(&self, now: Instant) -> Outcome {
        let mut windows = self.lock();

        let mut denied: Option<(Duration, WindowKind)> = None;
        for window in windows.iter_mut() {
            window.purge(now);
            if !window.has_room() {
                let wait = window.wait(now);
                if denied.map_or(true, |(longest, _)| wait > longest) {
                    denied = Some((wait, window.kind));
                }
            }
        }

        if let Some((wait, window)) = denied {
            debug!(?window, wait_ms = wait.as_millis() as u64, "rate limit denied");
            return Outcome::Denied { wait, window };
        }

        for window in windows.iter_mut() {
            window.hits.push_back(now);
        }
        Outcome::Allowed
    }

    /// Current usage per window (purges expired entries first).
    pub fn usage(&self) -> Vec<WindowUsage> {
        self.usage_at(Instant::now())
    }

    pub fn usage_at(&self, now: Instant) -> Vec<WindowUsage> {
        let mut windows = self.lock();
        windows
            .iter_mut()
            .map(|w| {
                w.purge(now);
                WindowUsage {
                    kind: w.kind,
                    used: w.used() as u32,
                    capacity: w.capacity,
                }
            })
            .collect()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(&RateLimitConfig::default())
    }
}
