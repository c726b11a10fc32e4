//! Per-call load options.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tally_core::config::LoaderConfig;
use tokio_util::sync::CancellationToken;

/// Progress callback; receives a monotonic estimate in `0..=100`.
pub type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

#[derive(Clone)]
pub struct LoadOptions {
    /// Deadline for each fetch attempt.
    pub timeout: Duration,
    /// Total attempts (at least one is always made).
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub cache_ttl: Duration,
    /// Bypass the cache read; the fresh result still refreshes the cache.
    pub skip_cache: bool,
    pub on_progress: Option<ProgressFn>,
    pub cancellation: Option<CancellationToken>,
}

impl LoadOptions {
    pub fn from_config(cfg: &LoaderConfig) -> Self {
        Self {
            timeout: Duration::from_millis(cfg.timeout_ms),
            max_retries: cfg.max_retries,
            retry_base_delay: Duration::from_millis(cfg.retry_base_delay_ms),
            cache_ttl: Duration::from_millis(cfg.cache_ttl_ms),
            skip_cache: false,
            on_progress: None,
            cancellation: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_base_delay = base_delay;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn skip_cache(mut self) -> Self {
        self.skip_cache = true;
        self
    }

    pub fn with_progress(mut self, f: impl Fn(u8) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(f));
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Delay after failed attempt `attempt` (0-based): `base * 2^attempt`.
    pub(crate) fn backoff(&self, attempt: u32) -> Duration {
        self.retry_base_delay
            .saturating_mul(1u32 << attempt.min(16))
    }

    pub(crate) fn report(&self, percent: u8) {
        if let Some(f) = &self.on_progress {
            f(percent);
        }
    }
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self::from_config(&LoaderConfig::default())
    }
}

impl fmt::Debug for LoadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadOptions")
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("retry_base_delay", &self.retry_base_delay)
            .field("cache_ttl", &self.cache_ttl)
            .field("skip_cache", &self.skip_cache)
            .field("on_progress", &self.on_progress.is_some())
            .field("cancellable", &self.cancellation.is_some())
            .finish()
    }
}

/// Progress before attempt `attempt` of `attempts`: 10..90, strictly rising.
pub(crate) fn attempt_progress(attempt: u32, attempts: u32) -> u8 {
    let attempts = attempts.max(1);
    (10 + (80 * attempt.min(attempts)) / attempts) as u8
}
