//! Filter performance counters.

use std::time::Duration;

use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilterMetrics {
    pub invocations: u64,
    pub cache_hits: u64,
    pub index_builds: u64,
    pub total_time_ms: f64,
    pub average_time_ms: f64,
    pub last_time_ms: f64,
    /// Cache hits over invocations; 0 before the first call.
    pub cache_hit_ratio: f64,
}

#[derive(Debug, Default)]
pub(crate) struct FilterCounters {
    invocations: u64,
    cache_hits: u64,
    index_builds: u64,
    total: Duration,
    last: Duration,
}

impl FilterCounters {
    pub(crate) fn record(&mut self, elapsed: Duration, from_cache: bool) {
        self.invocations += 1;
        if from_cache {
            self.cache_hits += 1;
        }
        self.total += elapsed;
        self.last = elapsed;
    }

    pub(crate) fn index_built(&mut self) {
        self.index_builds += 1;
    }

    pub(crate) fn snapshot(&self) -> FilterMetrics {
        let total_time_ms = self.total.as_secs_f64() * 1_000.0;
        let (average_time_ms, cache_hit_ratio) = if self.invocations == 0 {
            (0.0, 0.0)
        } else {
            let n = self.invocations as f64;
            (total_time_ms / n, self.cache_hits as f64 / n)
        };
        FilterMetrics {
            invocations: self.invocations,
            cache_hits: self.cache_hits,
            index_builds: self.index_builds,
            total_time_ms,
            average_time_ms,
            last_time_ms: self.last.as_secs_f64() * 1_000.0,
            cache_hit_ratio,
        }
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_and_average() {
        let mut c = FilterCounters::default();
        assert_eq!(c.snapshot().cache_hit_ratio, 0.0);
        c.record(Duration::from_millis(4), false);
        c.record(Duration::from_millis(2), true);
        let m = c.snapshot();
        assert_eq!(m.invocations, 2);
        assert_eq!(m.cache_hit_ratio, 0.5);
        assert!((m.average_time_ms - 3.0).abs() < 1e-9);
        assert!((m.last_time_ms - 2.0).abs() < 1e-9);
        c.reset();
        assert_eq!(c.snapshot(), FilterMetrics::default());
    }
}
