//! Size-bounded, time-expiring LRU cache.
//!
//! Holds at most one live entry per key. Each entry carries a [`ByteGuard`]
//! sized by the value's approximate footprint; admission evicts expired
//! entries first, then the least-recently-accessed ones, until the guard can
//! be acquired. Values larger than the whole ceiling are refused.
//!
//! The cache is synchronous. The loader wraps it in a mutex that is never
//! held across an await point.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use tally_core::budget::{SizeBudget, SizeGuard};
use tally_core::hash::approximate_size;

use crate::budget::{ByteBudget, ByteGuard};
use crate::events::EvictionReason;

/// One cached value and its bookkeeping.
#[derive(Debug)]
pub struct CacheEntry<T> {
    pub value: Arc<T>,
    pub created_at: Instant,
    pub expires_at: Instant,
    pub approximate_size: usize,
    pub access_count: u64,
    pub last_accessed_at: Instant,
    /// Logical access clock; breaks ties between equal instants.
    recency: u64,
    _guard: ByteGuard,
}

impl<T> CacheEntry<T> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Read-only view of an entry for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryInfo {
    pub approximate_size: usize,
    pub access_count: u64,
    pub created_at: Instant,
    pub expires_at: Instant,
    pub last_accessed_at: Instant,
}

/// Result of a `get`.
#[derive(Debug)]
pub enum Lookup<T> {
    Hit(Arc<T>),
    Miss,
    /// The entry had expired and was dropped.
    Expired,
}

impl<T> Lookup<T> {
    pub fn hit(self) -> Option<Arc<T>> {
        match self {
            Lookup::Hit(v) => Some(v),
            Lookup::Miss | Lookup::Expired => None,
        }
    }
}

/// Result of an `insert`.
#[derive(Debug, Default)]
pub struct Admission {
    pub admitted: bool,
    pub evicted: Vec<(String, EvictionReason)>,
}

pub struct RecordCache<T> {
    entries: HashMap<String, CacheEntry<T>>,
    budget: ByteBudget,
    clock: u64,
}

impl<T: Serialize> RecordCache<T> {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            entries: HashMap::new(),
            budget: ByteBudget::new(max_bytes),
            clock: 0,
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Live value for `key`. Touches recency and access count; an expired
    /// entry is dropped and reported as [`Lookup::Expired`].
    pub fn get(&mut self, key: &str, now: Instant) -> Lookup<T> {
        match self.entries.get(key) {
            None => return Lookup::Miss,
            Some(e) if e.is_expired(now) => {
                self.entries.remove(key);
                return Lookup::Expired;
            }
            Some(_) => {}
        }
        let recency = self.tick();
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.access_count += 1;
                entry.last_accessed_at = now;
                entry.recency = recency;
                Lookup::Hit(Arc::clone(&entry.value))
            }
            None => Lookup::Miss,
        }
    }

    /// Whether a live entry exists, without touching recency.
    pub fn contains(&self, key: &str, now: Instant) -> bool {
        self.entries
            .get(key)
            .map(|e| !e.is_expired(now))
            .unwrap_or(false)
    }

    /// Admit `value` under `key` for `ttl`, replacing any previous entry.
    pub fn insert(&mut self, key: &str, value: Arc<T>, ttl: Duration, now: Instant) -> Admission {
        let mut admission = Admission::default();
        self.entries.remove(key);

        let size = approximate_size(&*value);
        if size > self.budget.capacity_bytes() {
            return admission;
        }

        let guard = loop {
            if let Some(g) = self.budget.try_acquire(size, "record-cache") {
                break g;
            }
            match self.pick_victim(now) {
                Some((victim, reason)) => {
                    self.entries.remove(&victim);
                    admission.evicted.push((victim, reason));
                }
                None => return admission,
            }
        };

        let recency = self.tick();
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                created_at: now,
                expires_at: now + ttl,
                approximate_size: guard.bytes(),
                access_count: 0,
                last_accessed_at: now,
                recency,
                _guard: guard,
            },
        );
        admission.admitted = true;
        admission
    }

    /// Expired entries go first, then the oldest access.
    fn pick_victim(&self, now: Instant) -> Option<(String, EvictionReason)> {
        if let Some((k, _)) = self.entries.iter().find(|(_, e)| e.is_expired(now)) {
            return Some((k.clone(), EvictionReason::Expired));
        }
        self.entries
            .iter()
            .min_by_key(|(_, e)| (e.last_accessed_at, e.recency))
            .map(|(k, _)| (k.clone(), EvictionReason::Capacity))
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drop every entry whose key starts with `prefix`; returns the keys.
    pub fn remove_prefix(&mut self, prefix: &str) -> Vec<String> {
        let keys: Vec<String> = self
            .entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        for k in &keys {
            self.entries.remove(k);
        }
        keys
    }

    /// Drop expired entries; returns the keys.
    pub fn purge_expired(&mut self, now: Instant) -> Vec<String> {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for k in &keys {
            self.entries.remove(k);
        }
        keys
    }

    /// Drop every entry; returns the keys.
    pub fn clear(&mut self) -> Vec<String> {
        self.entries.drain().map(|(k, _)| k).collect()
    }

    pub fn info(&self, key: &str) -> Option<EntryInfo> {
        self.entries.get(key).map(|e| EntryInfo {
            approximate_size: e.approximate_size,
            access_count: e.access_count,
            created_at: e.created_at,
            expires_at: e.expires_at,
            last_accessed_at: e.last_accessed_at,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn used_bytes(&self) -> usize {
        self.budget.used_bytes()
    }

    pub fn peak_bytes(&self) -> usize {
        self.budget.peak_bytes()
    }

    pub fn capacity_bytes(&self) -> usize {
        self.budget.capacity_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    // "xxxxxxxx" serializes to 10 bytes including quotes.
    fn ten_bytes() -> Arc<String> {
        Arc::new("x".repeat(8))
    }

    #[test]
    fn one_live_entry_per_key() {
        let now = Instant::now();
        let mut cache = RecordCache::new(100);
        cache.insert("k", ten_bytes(), TTL, now);
        cache.insert("k", Arc::new("y".repeat(18)), TTL, now);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.used_bytes(), 20);
        assert_eq!(cache.get("k", now).hit().unwrap().len(), 18);
    }

    #[test]
    fn expiry_is_a_miss() {
        let now = Instant::now();
        let mut cache = RecordCache::new(100);
        cache.insert("k", ten_bytes(), Duration::from_millis(5), now);
        assert!(matches!(cache.get("k", now), Lookup::Hit(_)));
        assert!(matches!(
            cache.get("k", now + Duration::from_millis(5)),
            Lookup::Expired
        ));
        assert!(cache.is_empty());
        assert_eq!(cache.used_bytes(), 0);
        assert!(matches!(cache.get("k", now), Lookup::Miss));
    }

    #[test]
    fn lru_evicts_oldest_access_first() {
        let now = Instant::now();
        let mut cache = RecordCache::new(30);
        cache.insert("a", ten_bytes(), TTL, now);
        cache.insert("b", ten_bytes(), TTL, now);
        cache.insert("c", ten_bytes(), TTL, now);
        // touch "a" so "b" becomes the oldest
        assert!(cache.get("a", now).hit().is_some());

        let admission = cache.insert("d", ten_bytes(), TTL, now);
        assert!(admission.admitted);
        assert_eq!(
            admission.evicted,
            vec![("b".to_string(), EvictionReason::Capacity)]
        );
        assert!(cache.contains("a", now));
        assert!(!cache.contains("b", now));
    }

    #[test]
    fn oversized_values_are_refused() {
        let now = Instant::now();
        let mut cache = RecordCache::new(5);
        let admission = cache.insert("big", ten_bytes(), TTL, now);
        assert!(!admission.admitted);
        assert!(cache.is_empty());
    }

    #[test]
    fn prefix_invalidation() {
        let now = Instant::now();
        let mut cache = RecordCache::new(100);
        cache.insert("results:2023", ten_bytes(), TTL, now);
        cache.insert("results:2019", ten_bytes(), TTL, now);
        cache.insert("turnout:2023", ten_bytes(), TTL, now);
        let mut removed = cache.remove_prefix("results:");
        removed.sort();
        assert_eq!(removed, vec!["results:2019", "results:2023"]);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn clear_reports_every_key() {
        let now = Instant::now();
        let mut cache = RecordCache::new(100);
        cache.insert("a", ten_bytes(), TTL, now);
        cache.insert("b", ten_bytes(), TTL, now);
        let mut removed = cache.clear();
        removed.sort();
        assert_eq!(removed, vec!["a", "b"]);
        assert!(cache.is_empty());
        assert_eq!(cache.used_bytes(), 0);
    }
}
