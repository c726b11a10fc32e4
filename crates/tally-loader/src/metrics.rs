//! Monotonic loader counters and their snapshot.
//!
//! Counters only ever grow; `reset` is the single explicit way back to zero.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub dedup_hits: u64,
    /// Mean wall time of completed fetches (successful or not), in ms.
    pub average_load_time_ms: f64,
    pub active_requests: usize,
    pub memory_usage_estimate_mb: f64,
    pub peak_memory_estimate_mb: f64,
    /// Failed loads over completed loads; 0 when nothing completed.
    pub error_rate: f64,
    pub evictions: u64,
    pub cached_entries: usize,
}

#[derive(Default)]
pub(crate) struct LoaderCounters {
    total_requests: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    dedup_hits: AtomicU64,
    loads_ok: AtomicU64,
    loads_failed: AtomicU64,
    load_time_us: AtomicU64,
    evictions: AtomicU64,
    active: AtomicUsize,
}

impl LoaderCounters {
    pub(crate) fn request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn dedup_hit(&self) {
        self.dedup_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn evicted(&self, n: usize) {
        self.evictions.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn completed(&self, ok: bool, elapsed: Duration) {
        if ok {
            self.loads_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            self.loads_failed.fetch_add(1, Ordering::Relaxed);
        }
        let us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.load_time_us.fetch_add(us, Ordering::Relaxed);
    }

    pub(crate) fn active_inc(&self) {
        self.active.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn active_dec(&self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }

    pub(crate) fn snapshot(
        &self,
        used_bytes: usize,
        peak_bytes: usize,
        cached_entries: usize,
    ) -> MetricsSnapshot {
        let ok = self.loads_ok.load(Ordering::Relaxed);
        let failed = self.loads_failed.load(Ordering::Relaxed);
        let completed = ok + failed;
        let (average_load_time_ms, error_rate) = if completed == 0 {
            (0.0, 0.0)
        } else {
            let total_ms = self.load_time_us.load(Ordering::Relaxed) as f64 / 1_000.0;
            (total_ms / completed as f64, failed as f64 / completed as f64)
        };
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            dedup_hits: self.dedup_hits.load(Ordering::Relaxed),
            average_load_time_ms,
            active_requests: self.active.load(Ordering::Acquire),
            memory_usage_estimate_mb: bytes_to_mb(used_bytes),
            peak_memory_estimate_mb: bytes_to_mb(peak_bytes),
            error_rate,
            evictions: self.evictions.load(Ordering::Relaxed),
            cached_entries,
        }
    }

    /// Zero every accumulator. `active` tracks live work and is left alone.
    pub(crate) fn reset(&self) {
        for c in [
            &self.total_requests,
            &self.cache_hits,
            &self.cache_misses,
            &self.dedup_hits,
            &self.loads_ok,
            &self.loads_failed,
            &self.load_time_us,
            &self.evictions,
        ] {
            c.store(0, Ordering::Relaxed);
        }
    }
}

fn bytes_to_mb(bytes: usize) -> f64 {
    bytes as f64 / 1_048_576.0
}
