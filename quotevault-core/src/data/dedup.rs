//! Deduplicator: merges an incoming batch into an existing series.
//!
//! Records from both sides are concatenated (existing first), grouped by the
//! strategy's duplicate key, and each multi-member group is narrowed through
//! the configured conflict rules in order. Whatever survives all rules is
//! settled by last occurrence in concatenation order.

use crate::domain::{CanonicalRecord, RecordSeries};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Which fields make two records "the same bar".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupStrategy {
    #[default]
    TimestampAndSymbol,
    TimestampOnly,
    AllColumns,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictRule {
    /// Highest-ranked provider in `DedupConfig::provider_ranking`.
    ProviderPreference,
    /// Most recently processed batch (`RecordSeries::fetched_at`).
    LatestTimestamp,
    /// Largest volume.
    HighestVolume,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub strategy: DedupStrategy,
    /// Applied in order until one member remains.
    pub rules: Vec<ConflictRule>,
    /// Provider tags, best first. Unlisted providers rank last.
    pub provider_ranking: Vec<String>,
    /// Duplicate percentage above which the report carries a warning.
    pub warn_pct: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            strategy: DedupStrategy::TimestampAndSymbol,
            rules: vec![
                ConflictRule::ProviderPreference,
                ConflictRule::LatestTimestamp,
                ConflictRule::HighestVolume,
            ],
            provider_ranking: vec!["ibkr".into(), "barchart".into(), "yahoo".into()],
            warn_pct: 10.0,
        }
    }
}

/// How many groups each rule settled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionCounts {
    pub provider_preference: usize,
    pub latest_timestamp: usize,
    pub highest_volume: usize,
    pub last_occurrence: usize,
}

impl ResolutionCounts {
    fn credit(&mut self, rule: Option<ConflictRule>) {
        match rule {
            Some(ConflictRule::ProviderPreference) => self.provider_preference += 1,
            Some(ConflictRule::LatestTimestamp) => self.latest_timestamp += 1,
            Some(ConflictRule::HighestVolume) => self.highest_volume += 1,
            None => self.last_occurrence += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.provider_preference + self.latest_timestamp + self.highest_volume + self.last_occurrence
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupReport {
    /// Records considered (existing + incoming).
    pub total: usize,
    /// Keys that had more than one member.
    pub duplicate_count: usize,
    /// `duplicate_count / total * 100`.
    pub duplicate_pct: f64,
    /// Records discarded while collapsing groups.
    pub rows_dropped: usize,
    pub resolutions: ResolutionCounts,
    pub warning: Option<String>,
}

#[derive(Debug, PartialEq, Eq, Hash)]
enum DedupKey<'a> {
    Timestamp(DateTime<Utc>),
    TimestampSymbol(DateTime<Utc>, &'a str),
    Row(DateTime<Utc>, [u64; 4], i64, &'a str, &'a str),
}

impl DedupStrategy {
    fn key<'a>(&self, r: &'a CanonicalRecord) -> DedupKey<'a> {
        match self {
            DedupStrategy::TimestampOnly => DedupKey::Timestamp(r.timestamp),
            DedupStrategy::TimestampAndSymbol => DedupKey::TimestampSymbol(r.timestamp, &r.symbol),
            DedupStrategy::AllColumns => DedupKey::Row(
                r.timestamp,
                [
                    r.open.to_bits(),
                    r.high.to_bits(),
                    r.low.to_bits(),
                    r.close.to_bits(),
                ],
                r.volume,
                &r.symbol,
                &r.provider,
            ),
        }
    }
}

/// One record in the concatenated input.
struct Member<'a> {
    record: &'a CanonicalRecord,
    fetched_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct Deduplicator {
    config: DedupConfig,
}

impl Deduplicator {
    pub fn new(config: DedupConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DedupConfig {
        &self.config
    }

    /// Merge `incoming` into `existing`. The result is sorted by timestamp
    /// and has no duplicate keys under the configured strategy.
    pub fn merge(&self, existing: &RecordSeries, incoming: &RecordSeries) -> (RecordSeries, DedupReport) {
        let members: Vec<Member<'_>> = existing
            .records
            .iter()
            .map(|record| Member {
                record,
                fetched_at: existing.fetched_at,
            })
            .chain(incoming.records.iter().map(|record| Member {
                record,
                fetched_at: incoming.fetched_at,
            }))
            .collect();
        let total = members.len();

        // Groups in first-seen order
        let mut index: HashMap<DedupKey<'_>, usize> = HashMap::with_capacity(total);
        let mut groups: Vec<Vec<usize>> = Vec::with_capacity(total);
        for (i, m) in members.iter().enumerate() {
            let key = self.config.strategy.key(m.record);
            match index.get(&key) {
                Some(&g) => groups[g].push(i),
                None => {
                    index.insert(key, groups.len());
                    groups.push(vec![i]);
                }
            }
        }

        let mut resolutions = ResolutionCounts::default();
        let mut duplicate_count = 0;
        let mut records = Vec::with_capacity(groups.len());
        for group in &groups {
            let winner = if group.len() == 1 {
                group[0]
            } else {
                duplicate_count += 1;
                let (winner, rule) = self.resolve(&members, group);
                resolutions.credit(rule);
                winner
            };
            records.push(members[winner].record.clone());
        }
        records.sort_by_key(|r| r.timestamp);

        let duplicate_pct = if total == 0 {
            0.0
        } else {
            duplicate_count as f64 / total as f64 * 100.0
        };
        let warning = (duplicate_pct > self.config.warn_pct).then(|| {
            format!(
                "{duplicate_pct:.1}% of records were duplicates (threshold {:.1}%)",
                self.config.warn_pct
            )
        });

        let symbol = if incoming.symbol.is_empty() {
            existing.symbol.clone()
        } else {
            incoming.symbol.clone()
        };
        if duplicate_count > 0 {
            debug!(
                %symbol,
                duplicate_count,
                by_provider = resolutions.provider_preference,
                by_latest = resolutions.latest_timestamp,
                by_volume = resolutions.highest_volume,
                by_last = resolutions.last_occurrence,
                "dedup conflicts resolved"
            );
        }
        if let Some(w) = &warning {
            warn!(%symbol, "{w}");
        }

        let report = DedupReport {
            total,
            duplicate_count,
            duplicate_pct,
            rows_dropped: total - records.len(),
            resolutions,
            warning,
        };
        let merged = RecordSeries {
            symbol,
            period: incoming.period,
            records,
            fetched_at: existing.fetched_at.max(incoming.fetched_at),
            timestamp_faults: Vec::new(),
        };
        (merged, report)
    }

    /// Narrow `group` through the rules. Returns the winner and the rule
    /// that settled it (`None` = last occurrence).
    fn resolve(&self, members: &[Member<'_>], group: &[usize]) -> (usize, Option<ConflictRule>) {
        let mut candidates = group.to_vec();
        for &rule in &self.config.rules {
            let narrowed = self.apply(rule, members, &candidates);
            if !narrowed.is_empty() {
                candidates = narrowed;
            }
            if candidates.len() == 1 {
                return (candidates[0], Some(rule));
            }
        }
        // Indices are in concatenation order
        let last = candidates.last().copied().unwrap_or(group[group.len() - 1]);
        (last, None)
    }

    fn apply(&self, rule: ConflictRule, members: &[Member<'_>], candidates: &[usize]) -> Vec<usize> {
        match rule {
            ConflictRule::ProviderPreference => {
                let rank = |i: usize| self.provider_rank(&members[i].record.provider);
                let best = candidates.iter().map(|&i| rank(i)).min();
                candidates
                    .iter()
                    .copied()
                    .filter(|&i| Some(rank(i)) == best)
                    .collect()
            }
            ConflictRule::LatestTimestamp => {
                match candidates.iter().filter_map(|&i| members[i].fetched_at).max() {
                    // Unknown everywhere: rule cannot decide
                    None => candidates.to_vec(),
                    Some(latest) => candidates
                        .iter()
                        .copied()
                        .filter(|&i| members[i].fetched_at == Some(latest))
                        .collect(),
                }
            }
            ConflictRule::HighestVolume => {
                let best = candidates.iter().map(|&i| members[i].record.volume).max();
                candidates
                    .iter()
                    .copied()
                    .filter(|&i| Some(members[i].record.volume) == best)
                    .collect()
            }
        }
    }

    fn provider_rank(&self, provider: &str) -> usize {
        self.config
            .provider_ranking
            .iter()
            .position(|p| p.eq_ignore_ascii_case(provider))
            .unwrap_or(self.config.provider_ranking.len())
    }
}
