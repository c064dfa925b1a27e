//! Pipeline configuration.
//!
//! Every section has defaults, so an empty TOML file is a valid config:
//!
//! ```toml
//! [rate_limits]
//! burst = 10
//! per_minute = 60
//!
//! [validation]
//! min_quality = 0.5
//! # optional floor, RFC 3339 string
//! min_timestamp = "1990-01-01T00:00:00Z"
//!
//! [dedup]
//! strategy = "timestamp_and_symbol"
//! rules = ["provider_preference", "latest_timestamp", "highest_volume"]
//! provider_ranking = ["ibkr", "barchart", "yahoo"]
//!
//! [cache]
//! ttl_secs = 3600
//! max_bytes = 536870912
//! ```

use crate::data::cache::CacheConfig;
use crate::data::circuit_breaker::BreakerConfig;
use crate::data::dedup::DedupConfig;
use crate::data::rate_limiter::RateLimitConfig;
use crate::data::validator::ValidatorConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub rate_limits: RateLimitConfig,
    pub validation: ValidatorConfig,
    pub dedup: DedupConfig,
    pub cache: CacheConfig,
    pub breaker: BreakerConfig,
}

impl PipelineConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<(), ConfigError> {
        let q = self.validation.min_quality;
        if !(0.0..=1.0).contains(&q) {
            return Err(ConfigError::Invalid(format!(
                "validation.min_quality must be within [0, 1], got {q}"
            )));
        }
        if self.validation.gap_threshold <= 0.0 {
            return Err(ConfigError::Invalid(
                "validation.gap_threshold must be positive".into(),
            ));
        }
        if self.cache.row_bytes == 0 {
            return Err(ConfigError::Invalid("cache.row_bytes must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dedup::{ConflictRule, DedupStrategy};

    #[test]
    fn empty_toml_gives_defaults() {
        let config = PipelineConfig::from_toml("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.rate_limits.burst, 10);
        assert_eq!(config.rate_limits.per_day, 20_000);
        assert_eq!(config.validation.min_quality, 0.5);
        assert_eq!(config.cache.ttl_secs, 3_600);
        assert_eq!(config.cache.max_bytes, 512 * 1024 * 1024);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = PipelineConfig::from_toml(
            r#"
            [rate_limits]
            per_minute = 5

            [dedup]
            strategy = "all_columns"
            rules = ["highest_volume"]
            "#,
        )
        .unwrap();
        assert_eq!(config.rate_limits.per_minute, 5);
        assert_eq!(config.rate_limits.burst, 10);
        assert_eq!(config.dedup.strategy, DedupStrategy::AllColumns);
        assert_eq!(config.dedup.rules, vec![ConflictRule::HighestVolume]);
        assert_eq!(config.dedup.provider_ranking.len(), 3);
    }

    #[test]
    fn timestamp_floor_is_optional() {
        assert_eq!(PipelineConfig::default().validation.min_timestamp, None);
        let config = PipelineConfig::from_toml(
            "[validation]\nmin_timestamp = \"1990-01-01T00:00:00Z\"\n",
        )
        .unwrap();
        assert_eq!(
            config.validation.min_timestamp.map(|t| t.timestamp()),
            Some(631_152_000)
        );
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let err = PipelineConfig::from_toml("[validation]\nmin_quality = 1.5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn unknown_strategy_is_a_parse_error() {
        let err = PipelineConfig::from_toml("[dedup]\nstrategy = \"fuzzy\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = PipelineConfig::from_file(Path::new("/nonexistent/quotevault.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
