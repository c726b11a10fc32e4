//! Byte budget + RAII guard used to account cached values.
//!
//! Every admitted cache entry owns a guard; dropping the entry (eviction,
//! expiry, invalidation, overwrite) returns its bytes to the budget. The
//! budget also remembers its high-water mark for metrics.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tally_core::budget::{SizeBudget, SizeGuard};

struct BudgetInner {
    capacity: usize,
    used: AtomicUsize,
    peak: AtomicUsize,
}

impl BudgetInner {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            used: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    fn try_acquire(&self, bytes: usize) -> bool {
        loop {
            let cur = self.used.load(Ordering::Relaxed);
            let next = cur.saturating_add(bytes);
            if next > self.capacity {
                return false;
            }
            if self
                .used
                .compare_exchange(cur, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                self.record_peak(next);
                return true;
            }
        }
    }

    fn release(&self, bytes: usize) {
        self.used.fetch_sub(bytes, Ordering::AcqRel);
    }

    fn record_peak(&self, used: usize) {
        let mut cur = self.peak.load(Ordering::Relaxed);
        while used > cur {
            match self
                .peak
                .compare_exchange(cur, used, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(observed) => cur = observed,
            }
        }
    }
}

/// Shared byte ceiling. Cloning shares the same accounting.
#[derive(Clone)]
pub struct ByteBudget {
    inner: Arc<BudgetInner>,
}

impl ByteBudget {
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            inner: Arc::new(BudgetInner::new(capacity_bytes)),
        }
    }

    /// Highest `used_bytes` ever observed.
    pub fn peak_bytes(&self) -> usize {
        self.inner.peak.load(Ordering::Relaxed)
    }
}

/// Accounts `bytes` against a [`ByteBudget`] until dropped.
pub struct ByteGuard {
    inner: Arc<BudgetInner>,
    bytes: usize,
    tag: &'static str,
}

impl Drop for ByteGuard {
    fn drop(&mut self) {
        if self.bytes > 0 {
            self.inner.release(self.bytes);
            self.bytes = 0;
        }
    }
}

impl std::fmt::Debug for ByteGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteGuard")
            .field("bytes", &self.bytes)
            .field("tag", &self.tag)
            .finish()
    }
}

impl SizeGuard for ByteGuard {
    fn bytes(&self) -> usize {
        self.bytes
    }
    fn tag(&self) -> &'static str {
        self.tag
    }
}

impl SizeBudget for ByteBudget {
    type Guard = ByteGuard;

    fn try_acquire(&self, bytes: usize, tag: &'static str) -> Option<Self::Guard> {
        if bytes > 0 && !self.inner.try_acquire(bytes) {
            return None;
        }
        Some(ByteGuard {
            inner: Arc::clone(&self.inner),
            bytes,
            tag,
        })
    }

    fn capacity_bytes(&self) -> usize {
        self.inner.capacity
    }

    fn used_bytes(&self) -> usize {
        self.inner.used.load(Ordering::Relaxed)
    }
}
