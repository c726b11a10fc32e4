//! Engine configuration that downstream crates can serialize/deserialize.
//!
//! Durations are carried as milliseconds so configs round-trip through JSON
//! unchanged; each crate converts to `Duration` at its own boundary.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub loader: LoaderConfig,
    pub filter: FilterConfig,
    pub aggregation: AggregationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Ceiling on the summed approximate size of cached values (bytes).
    pub cache_max_bytes: usize,

    /// Default time-to-live for admitted entries.
    pub cache_ttl_ms: u64,

    /// Deadline for a single fetch attempt.
    pub timeout_ms: u64,

    /// Total fetch attempts before a load fails with `RetryExhausted`.
    pub max_retries: u32,

    /// Backoff base; attempt `n` waits `retry_base_delay_ms * 2^n` after failing.
    pub retry_base_delay_ms: u64,

    /// Maximum time a per-key lock may be held before waiters take over.
    pub lock_timeout_ms: u64,

    /// Buffered lifecycle events per subscriber before lagging ones drop.
    pub event_capacity: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            cache_max_bytes: 50 * 1024 * 1024, // 50 MiB
            cache_ttl_ms: 5 * 60 * 1000,
            timeout_ms: 30_000,
            max_retries: 3,
            retry_base_delay_ms: 1_000,
            lock_timeout_ms: 60_000,
            event_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Default cap on returned records.
    pub max_results: usize,

    /// Stop scanning once `max_results` matches are found.
    pub early_termination: bool,

    /// How long a cached result set stays valid.
    pub result_cache_ttl_ms: u64,

    /// Number of cached result sets kept; oldest go first.
    pub result_cache_capacity: usize,

    /// Index rebuilds for the same record set are skipped inside this window.
    pub min_rebuild_interval_ms: u64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            max_results: 1_000,
            early_termination: true,
            result_cache_ttl_ms: 60_000,
            result_cache_capacity: 100,
            min_rebuild_interval_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Samples smaller than this yield a null, zero-confidence result.
    pub min_data_points: usize,

    /// One of 0.90, 0.95, 0.99.
    pub confidence_level: f64,

    /// Apply the IQR outlier rule to samples of four or more points.
    pub remove_outliers: bool,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            min_data_points: 1,
            confidence_level: 0.95,
            remove_outliers: true,
        }
    }
}

impl EngineConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `TALLY_CACHE_MAX_BYTES`, `TALLY_CACHE_TTL_MS`
    /// - `TALLY_LOAD_TIMEOUT_MS`, `TALLY_MAX_RETRIES`, `TALLY_RETRY_BASE_MS`
    /// - `TALLY_LOCK_TIMEOUT_MS`, `TALLY_EVENT_CAPACITY`
    /// - `TALLY_FILTER_MAX_RESULTS`, `TALLY_FILTER_EARLY_TERMINATION`
    /// - `TALLY_FILTER_CACHE_TTL_MS`, `TALLY_FILTER_CACHE_CAPACITY`
    /// - `TALLY_INDEX_REBUILD_INTERVAL_MS`
    /// - `TALLY_MIN_DATA_POINTS`, `TALLY_CONFIDENCE_LEVEL`, `TALLY_REMOVE_OUTLIERS`
    ///
    /// Unparseable values are ignored.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        let l = &mut cfg.loader;
        env_override("TALLY_CACHE_MAX_BYTES", &mut l.cache_max_bytes);
        env_override("TALLY_CACHE_TTL_MS", &mut l.cache_ttl_ms);
        env_override("TALLY_LOAD_TIMEOUT_MS", &mut l.timeout_ms);
        env_override("TALLY_MAX_RETRIES", &mut l.max_retries);
        env_override("TALLY_RETRY_BASE_MS", &mut l.retry_base_delay_ms);
        env_override("TALLY_LOCK_TIMEOUT_MS", &mut l.lock_timeout_ms);
        env_override("TALLY_EVENT_CAPACITY", &mut l.event_capacity);

        let f = &mut cfg.filter;
        env_override("TALLY_FILTER_MAX_RESULTS", &mut f.max_results);
        env_override("TALLY_FILTER_EARLY_TERMINATION", &mut f.early_termination);
        env_override("TALLY_FILTER_CACHE_TTL_MS", &mut f.result_cache_ttl_ms);
        env_override("TALLY_FILTER_CACHE_CAPACITY", &mut f.result_cache_capacity);
        env_override("TALLY_INDEX_REBUILD_INTERVAL_MS", &mut f.min_rebuild_interval_ms);

        let a = &mut cfg.aggregation;
        env_override("TALLY_MIN_DATA_POINTS", &mut a.min_data_points);
        env_override("TALLY_CONFIDENCE_LEVEL", &mut a.confidence_level);
        env_override("TALLY_REMOVE_OUTLIERS", &mut a.remove_outliers);

        cfg
    }

    /// Reject settings the engines cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.loader.event_capacity == 0 {
            return Err(Error::Config("event_capacity must be at least 1".into()));
        }
        if self.filter.result_cache_capacity == 0 {
            return Err(Error::Config(
                "result_cache_capacity must be at least 1".into(),
            ));
        }
        let level = self.aggregation.confidence_level;
        if ![0.90, 0.95, 0.99].iter().any(|l| (l - level).abs() < 1e-9) {
            return Err(Error::Config(format!(
                "confidence_level must be 0.90, 0.95 or 0.99 (got {level})"
            )));
        }
        Ok(())
    }
}

fn env_override<T: FromStr>(name: &str, slot: &mut T) {
    if let Ok(s) = std::env::var(name) {
        if let Ok(v) = s.trim().parse::<T>() {
            *slot = v;
        }
    }
}
