//! Bounded in-memory series cache: LRU by access plus per-entry TTL.
//!
//! The cache never touches storage. Call sites populate it after a load or a
//! `save()` and invalidate it when they know a series changed.

use crate::domain::{DateRange, Period, RecordSeries};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Identifies a cached series: (symbol, period, date-range fingerprint).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub symbol: String,
    pub period: Period,
    pub range_fingerprint: String,
}

impl CacheKey {
    pub fn new(symbol: impl Into<String>, period: Period, range: &DateRange) -> Self {
        Self {
            symbol: symbol.into(),
            period,
            range_fingerprint: range.fingerprint(),
        }
    }

    /// Key for the whole series as stored on disk.
    pub fn stored(symbol: impl Into<String>, period: Period) -> Self {
        Self {
            symbol: symbol.into(),
            period,
            range_fingerprint: "stored".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Default time-to-live, in seconds.
    pub ttl_secs: u64,
    /// Memory budget in bytes.
    pub max_bytes: u64,
    /// Estimated footprint of one record.
    pub row_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3_600,
            max_bytes: 512 * 1024 * 1024,
            row_bytes: 96,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Counters for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub entries: usize,
    pub bytes: u64,
}

#[derive(Debug)]
struct CacheEntry {
    series: RecordSeries,
    inserted_at: Instant,
    ttl: Duration,
    bytes: u64,
    /// Position in the recency index.
    recency: (u64, u64),
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) >= self.ttl
    }
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<CacheKey, CacheEntry>,
    /// (last access tick, insertion seq) → key; first entry is the LRU victim.
    recency: BTreeMap<(u64, u64), CacheKey>,
    tick: u64,
    seq: u64,
    bytes: u64,
    stats: CacheStats,
}

impl CacheState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn remove(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.recency);
        self.bytes = self.bytes.saturating_sub(entry.bytes);
        Some(entry)
    }

    fn evict_lru(&mut self) -> bool {
        let Some((_, key)) = self.recency.pop_first() else {
            return false;
        };
        if let Some(entry) = self.entries.remove(&key) {
            self.bytes = self.bytes.saturating_sub(entry.bytes);
            self.stats.evictions += 1;
            debug!(symbol = %key.symbol, period = %key.period, bytes = entry.bytes, "cache eviction");
        }
        true
    }
}

/// Thread-safe cache. All state sits behind one mutex so LRU order and byte
/// accounting are updated together.
#[derive(Debug)]
pub struct SeriesCache {
    config: CacheConfig,
    state: Mutex<CacheState>,
}

impl SeriesCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("series cache mutex was poisoned, recovering");
            PoisonError::into_inner(poisoned)
        })
    }

    /// Footprint estimate: rows × per-row bytes.
    pub fn estimate(&self, series: &RecordSeries) -> u64 {
        series.len() as u64 * self.config.row_bytes
    }

    pub fn get(&self, key: &CacheKey) -> Option<RecordSeries> {
        self.get_at(key, Instant::now())
    }

    pub fn get_at(&self, key: &CacheKey, now: Instant) -> Option<RecordSeries> {
        let mut state = self.lock();

        let expired = match state.entries.get(key) {
            None => {
                state.stats.misses += 1;
                return None;
            }
            Some(entry) => entry.is_expired(now),
        };

        if expired {
            state.remove(key);
            state.stats.expirations += 1;
            state.stats.misses += 1;
            return None;
        }

        let tick = state.next_tick();
        let state = &mut *state;
        let entry = state.entries.get_mut(key)?;
        let old = entry.recency;
        entry.recency = (tick, old.1);
        let series = entry.series.clone();
        state.recency.remove(&old);
        state.recency.insert(entry.recency, key.clone());
        state.stats.hits += 1;
        Some(series)
    }

    /// Insert with the configured default TTL.
    pub fn put(&self, key: CacheKey, series: RecordSeries) {
        self.put_with_ttl(key, series, self.config.ttl());
    }

    pub fn put_with_ttl(&self, key: CacheKey, series: RecordSeries, ttl: Duration) {
        self.put_at(key, series, ttl, Instant::now());
    }

    pub fn put_at(&self, key: CacheKey, series: RecordSeries, ttl: Duration, now: Instant) {
        let bytes = self.estimate(&series);
        let mut state = self.lock();

        // Replacing an entry frees its bytes first
        state.remove(&key);

        if bytes > self.config.max_bytes {
            debug!(symbol = %key.symbol, bytes, budget = self.config.max_bytes, "entry exceeds cache budget, not cached");
            return;
        }

        while state.bytes + bytes > self.config.max_bytes {
            if !state.evict_lru() {
                break;
            }
        }

        let tick = state.next_tick();
        state.seq += 1;
        let recency = (tick, state.seq);
        state.recency.insert(recency, key.clone());
        state.bytes += bytes;
        state.entries.insert(
            key,
            CacheEntry {
                series,
                inserted_at: now,
                ttl,
                bytes,
                recency,
            },
        );
    }

    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.lock().remove(key).is_some()
    }

    /// Drop every entry for `symbol`/`period`, whatever its range.
    pub fn invalidate_series(&self, symbol: &str, period: Period) -> usize {
        let mut state = self.lock();
        let keys: Vec<CacheKey> = state
            .entries
            .keys()
            .filter(|k| k.symbol == symbol && k.period == period)
            .cloned()
            .collect();
        for key in &keys {
            state.remove(key);
        }
        keys.len()
    }

    /// Remove all TTL-expired entries. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    pub fn purge_expired_at(&self, now: Instant) -> usize {
        let mut state = self.lock();
        let expired: Vec<CacheKey> = state
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            state.remove(key);
        }
        state.stats.expirations += expired.len() as u64;
        expired.len()
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            entries: state.entries.len(),
            bytes: state.bytes,
            ..state.stats
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SeriesCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CanonicalRecord;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    fn series(symbol: &str, rows: usize) -> RecordSeries {
        let records = (0..rows)
            .map(|i| CanonicalRecord {
                timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                    + chrono::Duration::days(i as i64),
                open: 1.0,
                high: 1.0,
                low: 1.0,
                close: 1.0,
                volume: 1,
                symbol: symbol.into(),
                provider: "yahoo".into(),
            })
            .collect();
        RecordSeries::new(symbol, Period::Daily, records)
    }

    fn key(symbol: &str) -> CacheKey {
        CacheKey::stored(symbol, Period::Daily)
    }

    /// Budget of `rows` rows at 1 byte each.
    fn cache_of(rows: u64) -> SeriesCache {
        SeriesCache::new(CacheConfig {
            ttl_secs: 60,
            max_bytes: rows,
            row_bytes: 1,
        })
    }

    #[test]
    fn put_then_get_hits() {
        let cache = cache_of(100);
        cache.put(key("AAPL"), series("AAPL", 3));
        let got = cache.get(&key("AAPL")).unwrap();
        assert_eq!(got.len(), 3);
        assert!(cache.get(&key("MSFT")).is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.bytes, 3);
    }

    #[test]
    fn expired_entry_is_a_miss_and_removed() {
        let cache = cache_of(100);
        let t0 = Instant::now();
        cache.put_at(key("AAPL"), series("AAPL", 3), Duration::from_secs(10), t0);

        assert!(cache.get_at(&key("AAPL"), t0 + Duration::from_secs(9)).is_some());
        assert!(cache.get_at(&key("AAPL"), t0 + Duration::from_secs(10)).is_none());
        assert!(cache.is_empty());
        assert_eq!(cache.stats().expirations, 1);
    }

    #[test]
    fn evicts_least_recently_used_first() {
        let cache = cache_of(10);
        cache.put(key("A"), series("A", 4));
        cache.put(key("B"), series("B", 4));

        // Touch A so B becomes the LRU entry
        assert!(cache.get(&key("A")).is_some());
        cache.put(key("C"), series("C", 4));

        assert!(cache.get(&key("A")).is_some());
        assert!(cache.get(&key("B")).is_none());
        assert!(cache.get(&key("C")).is_some());
        assert_eq!(cache.stats().evictions, 1);
        assert!(cache.stats().bytes <= 10);
    }

    #[test]
    fn eviction_continues_until_entry_fits() {
        let cache = cache_of(10);
        cache.put(key("A"), series("A", 3));
        cache.put(key("B"), series("B", 3));
        cache.put(key("C"), series("C", 3));
        cache.put(key("D"), series("D", 9));

        assert_eq!(cache.len(), 1);
        assert!(cache.get(&key("D")).is_some());
        assert_eq!(cache.stats().evictions, 3);
    }

    #[test]
    fn oversized_entry_is_not_cached() {
        let cache = cache_of(10);
        cache.put(key("A"), series("A", 3));
        cache.put(key("BIG"), series("BIG", 11));
        assert!(cache.get(&key("BIG")).is_none());
        assert!(cache.get(&key("A")).is_some());
    }

    #[test]
    fn replacing_a_key_updates_accounting() {
        let cache = cache_of(100);
        cache.put(key("A"), series("A", 5));
        cache.put(key("A"), series("A", 2));
        assert_eq!(cache.stats().bytes, 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn invalidate_and_invalidate_series() {
        let cache = cache_of(100);
        let range = DateRange::new(
            chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            chrono::NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
        );
        cache.put(key("A"), series("A", 1));
        cache.put(CacheKey::new("A", Period::Daily, &range), series("A", 1));
        cache.put(key("B"), series("B", 1));

        assert!(cache.invalidate(&key("B")));
        assert!(!cache.invalidate(&key("B")));
        assert_eq!(cache.invalidate_series("A", Period::Daily), 2);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().bytes, 0);
    }

    #[test]
    fn purge_expired_drops_only_stale_entries() {
        let cache = cache_of(100);
        let t0 = Instant::now();
        cache.put_at(key("A"), series("A", 1), Duration::from_secs(5), t0);
        cache.put_at(key("B"), series("B", 1), Duration::from_secs(50), t0);
        assert_eq!(cache.purge_expired_at(t0 + Duration::from_secs(6)), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn concurrent_puts_respect_budget() {
        let cache = Arc::new(cache_of(50));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..20 {
                        let sym = format!("S{t}_{i}");
                        cache.put(key(&sym), series(&sym, 3));
                        let _ = cache.get(&key(&sym));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let stats = cache.stats();
        assert!(stats.bytes <= 50);
        assert_eq!(stats.bytes, stats.entries as u64 * 3);
    }
}
