//! The deduplicating loader.
//!
//! `load` resolves in this order:
//! 1. live cache entry → returned immediately;
//! 2. key locked by another load → wait for that load and return its outcome;
//! 3. otherwise take the lock, re-check the cache (another caller may have
//!    filled it while we queued), then fetch under timeout + retry.
//!
//! A `Loader` is a cheap handle; clones share cache, locks, and counters.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use tally_core::config::LoaderConfig;

use crate::cache::{EntryInfo, Lookup, RecordCache};
use crate::error::{LoadError, Result};
use crate::events::{EventBus, EvictionReason, LoaderEvent};
use crate::lock::{Acquired, KeyLocks, Outcome, Wait};
use crate::metrics::{LoaderCounters, MetricsSnapshot};
use crate::options::{attempt_progress, LoadOptions};

/// Progress of one outstanding key. Removed once the load settles.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadingState {
    pub in_progress: bool,
    pub progress_percent: u8,
    /// Last attempt's error while retries are still pending.
    pub error: Option<String>,
    pub started_at: Instant,
}

pub struct Loader<T> {
    inner: Arc<LoaderInner<T>>,
}

impl<T> Clone for Loader<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct LoaderInner<T> {
    config: LoaderConfig,
    cache: Mutex<RecordCache<T>>,
    locks: KeyLocks<T>,
    states: Mutex<HashMap<String, LoadingState>>,
    counters: LoaderCounters,
    events: EventBus,
}

fn relock<X>(m: &Mutex<X>) -> MutexGuard<'_, X> {
    // Nothing in this crate panics while holding these mutexes mid-update.
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(t) => t.cancelled().await,
        None => std::future::pending().await,
    }
}

impl<T> Loader<T>
where
    T: Serialize + Send + Sync + 'static,
{
    pub fn new(config: LoaderConfig) -> Self {
        let inner = LoaderInner {
            cache: Mutex::new(RecordCache::new(config.cache_max_bytes)),
            locks: KeyLocks::new(Duration::from_millis(config.lock_timeout_ms)),
            states: Mutex::new(HashMap::new()),
            counters: LoaderCounters::default(),
            events: EventBus::new(config.event_capacity),
            config,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.inner.config
    }

    /// Default per-call options derived from this loader's config.
    pub fn options(&self) -> LoadOptions {
        LoadOptions::from_config(&self.inner.config)
    }

    /// Receive lifecycle events emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<LoaderEvent> {
        self.inner.events.subscribe()
    }

    /// Load `key`, invoking `fetch` only if no cached value and no in-flight
    /// load exists for it. Every caller joined onto one fetch observes the
    /// same outcome, success or failure.
    pub async fn load<F, Fut, E>(&self, key: &str, fetch: F, options: LoadOptions) -> Result<Arc<T>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: fmt::Display,
    {
        let inner = &*self.inner;
        inner.counters.request();

        if !options.skip_cache {
            if let Some(hit) = inner.cached(key) {
                return Ok(hit);
            }
        }

        let mut joined = false;
        loop {
            let (acquired, took_over) = inner.locks.acquire(key);
            if took_over {
                inner.events.emit(LoaderEvent::LockExpired {
                    key: key.to_string(),
                });
            }

            match acquired {
                Acquired::Waiter(waiter) => {
                    if !joined {
                        joined = true;
                        inner.counters.dedup_hit();
                        inner.events.emit(LoaderEvent::DedupHit {
                            key: key.to_string(),
                        });
                    }
                    let wait = tokio::select! {
                        biased;
                        _ = cancelled(options.cancellation.as_ref()) => {
                            return Err(LoadError::Cancelled { key: key.to_string() });
                        }
                        w = waiter.wait() => w,
                    };
                    match wait {
                        Wait::Settled(outcome) => return outcome,
                        // Owner vanished or overstayed: re-check, then contend again.
                        Wait::Abandoned | Wait::Expired => {
                            if !options.skip_cache {
                                if let Some(hit) = inner.cached(key) {
                                    return Ok(hit);
                                }
                            }
                        }
                    }
                }
                Acquired::Owner(guard) => {
                    if !options.skip_cache {
                        if let Some(hit) = inner.cached(key) {
                            guard.release(Ok(Arc::clone(&hit)));
                            return Ok(hit);
                        }
                    }
                    let outcome = inner.run(key, &fetch, &options).await;
                    guard.release(outcome.clone());
                    return outcome;
                }
            }
        }
    }

    /// Warm `key` in a background task sharing the same dedup path.
    pub fn prefetch<F, Fut, E>(
        &self,
        key: impl Into<String>,
        fetch: F,
        options: LoadOptions,
    ) -> tokio::task::JoinHandle<Result<Arc<T>>>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let loader = self.clone();
        let key = key.into();
        tokio::spawn(async move { loader.load(&key, fetch, options).await })
    }

    /// Admit a value directly, bypassing any fetch.
    pub fn put(&self, key: &str, value: T, ttl: Duration) -> Arc<T> {
        let value = Arc::new(value);
        self.inner.admit(key, Arc::clone(&value), ttl);
        value
    }

    /// Cached value without counting a request.
    pub fn peek(&self, key: &str) -> Option<Arc<T>> {
        self.inner.lookup(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        relock(&self.inner.cache).contains(key, Instant::now())
    }

    pub fn entry_info(&self, key: &str) -> Option<EntryInfo> {
        relock(&self.inner.cache).info(key)
    }

    pub fn invalidate(&self, key: &str) -> bool {
        let removed = relock(&self.inner.cache).remove(key);
        if removed {
            self.inner
                .evicted(vec![(key.to_string(), EvictionReason::Invalidated)]);
        }
        removed
    }

    /// Invalidate every key starting with `prefix`; returns how many went.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let keys = relock(&self.inner.cache).remove_prefix(prefix);
        let n = keys.len();
        self.inner.evicted(
            keys.into_iter()
                .map(|k| (k, EvictionReason::Invalidated))
                .collect(),
        );
        n
    }

    pub fn purge_expired(&self) -> usize {
        let keys = relock(&self.inner.cache).purge_expired(Instant::now());
        let n = keys.len();
        self.inner.evicted(
            keys.into_iter()
                .map(|k| (k, EvictionReason::Expired))
                .collect(),
        );
        n
    }

    pub fn clear(&self) -> usize {
        let keys = relock(&self.inner.cache).clear();
        let n = keys.len();
        self.inner.evicted(
            keys.into_iter()
                .map(|k| (k, EvictionReason::Invalidated))
                .collect(),
        );
        n
    }

    pub fn loading_state(&self, key: &str) -> Option<LoadingState> {
        relock(&self.inner.states).get(key).cloned()
    }

    pub fn is_loading(&self, key: &str) -> bool {
        self.inner.locks.is_locked(key)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        let (used, peak, entries) = {
            let cache = relock(&self.inner.cache);
            (cache.used_bytes(), cache.peak_bytes(), cache.len())
        };
        self.inner.counters.snapshot(used, peak, entries)
    }

    pub fn reset_metrics(&self) {
        self.inner.counters.reset();
    }
}

impl<T> Default for Loader<T>
where
    T: Serialize + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(LoaderConfig::default())
    }
}

impl<T> LoaderInner<T>
where
    T: Serialize + Send + Sync + 'static,
{
    /// Live value for `key`; an entry found expired counts as an eviction.
    fn lookup(&self, key: &str) -> Option<Arc<T>> {
        let found = relock(&self.cache).get(key, Instant::now());
        match found {
            Lookup::Hit(value) => Some(value),
            Lookup::Miss => None,
            Lookup::Expired => {
                self.evicted(vec![(key.to_string(), EvictionReason::Expired)]);
                None
            }
        }
    }

    fn cached(&self, key: &str) -> Option<Arc<T>> {
        let hit = self.lookup(key)?;
        self.counters.cache_hit();
        self.events.emit(LoaderEvent::CacheHit {
            key: key.to_string(),
        });
        Some(hit)
    }

    fn admit(&self, key: &str, value: Arc<T>, ttl: Duration) {
        let admission = relock(&self.cache).insert(key, value, ttl, Instant::now());
        self.evicted(admission.evicted);
    }

    fn evicted(&self, keys: Vec<(String, EvictionReason)>) {
        self.counters.evicted(keys.len());
        for (key, reason) in keys {
            self.events.emit(LoaderEvent::Eviction { key, reason });
        }
    }

    fn set_state(&self, key: &str, options: &LoadOptions, percent: u8, error: Option<String>) {
        if let Some(state) = relock(&self.states).get_mut(key) {
            state.progress_percent = state.progress_percent.max(percent);
            state.error = error;
        }
        options.report(percent);
    }

    /// Owner path: fetch, admit, account, announce.
    async fn run<F, Fut, E>(&self, key: &str, fetch: &F, options: &LoadOptions) -> Outcome<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: fmt::Display,
    {
        self.counters.cache_miss();
        let _flight = InFlight::begin(self, key);
        let started = Instant::now();

        let result = self.fetch_with_retry(key, fetch, options).await;
        let elapsed = started.elapsed();

        match result {
            Ok((value, attempts)) => {
                let value = Arc::new(value);
                self.admit(key, Arc::clone(&value), options.cache_ttl);
                self.counters.completed(true, elapsed);
                self.set_state(key, options, 100, None);
                self.events.emit(LoaderEvent::LoadSuccess {
                    key: key.to_string(),
                    attempts,
                    elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                });
                Ok(value)
            }
            Err(err) => {
                self.counters.completed(false, elapsed);
                self.events.emit(LoaderEvent::LoadFailure {
                    key: key.to_string(),
                    kind: err.kind(),
                    message: err.to_string(),
                });
                Err(err)
            }
        }
    }

    async fn fetch_with_retry<F, Fut, E>(
        &self,
        key: &str,
        fetch: &F,
        options: &LoadOptions,
    ) -> std::result::Result<(T, u32), LoadError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: fmt::Display,
    {
        let attempts = options.attempts();
        let token = options.cancellation.as_ref();
        let mut last_error = String::new();

        for attempt in 0..attempts {
            let progress = attempt_progress(attempt, attempts);
            let error = (attempt > 0).then(|| last_error.clone());
            self.set_state(key, options, progress, error);

            let result = tokio::select! {
                biased;
                _ = cancelled(token) => {
                    return Err(LoadError::Cancelled { key: key.to_string() });
                }
                r = tokio::time::timeout(options.timeout, fetch()) => r,
            };

            match result {
                Err(_elapsed) => {
                    return Err(LoadError::Timeout {
                        key: key.to_string(),
                        timeout_ms: u64::try_from(options.timeout.as_millis()).unwrap_or(u64::MAX),
                    });
                }
                Ok(Ok(value)) => return Ok((value, attempt + 1)),
                Ok(Err(e)) => {
                    last_error = e.to_string();
                    #[cfg(feature = "tracing")]
                    tracing::debug!(key, attempt, error = %last_error, "fetch attempt failed");
                    if attempt + 1 < attempts {
                        tokio::select! {
                            biased;
                            _ = cancelled(token) => {
                                return Err(LoadError::Cancelled { key: key.to_string() });
                            }
                            _ = tokio::time::sleep(options.backoff(attempt)) => {}
                        }
                    }
                }
            }
        }

        Err(LoadError::RetryExhausted {
            key: key.to_string(),
            attempts,
            last_error,
        })
    }
}

/// Marks a key as actively fetching; undone on drop, including when the
/// owning future is dropped mid-fetch.
struct InFlight<'a, T> {
    inner: &'a LoaderInner<T>,
    key: &'a str,
}

impl<'a, T> InFlight<'a, T> {
    fn begin(inner: &'a LoaderInner<T>, key: &'a str) -> Self {
        inner.counters.active_inc();
        relock(&inner.states).insert(
            key.to_string(),
            LoadingState {
                in_progress: true,
                progress_percent: 0,
                error: None,
                started_at: Instant::now(),
            },
        );
        Self { inner, key }
    }
}

impl<T> Drop for InFlight<'_, T> {
    fn drop(&mut self) {
        self.inner.counters.active_dec();
        relock(&self.inner.states).remove(self.key);
    }
}
