//! Bounded, time-expiring cache of filter result sets.
//!
//! Entries are keyed by [`FilterKey`]. When full, the oldest insertion is
//! evicted first; reads do not refresh an entry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tally_core::record::Record;

use crate::predicate::FilterKey;

#[derive(Debug, Clone)]
pub(crate) struct CachedResult {
    pub results: Arc<[Record]>,
    pub total_matched: usize,
}

#[derive(Debug)]
struct Slot {
    result: CachedResult,
    inserted_at: Instant,
    seq: u64,
}

#[derive(Debug)]
pub(crate) struct ResultCache {
    slots: HashMap<FilterKey, Slot>,
    ttl: Duration,
    capacity: usize,
    seq: u64,
}

impl ResultCache {
    pub(crate) fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            slots: HashMap::new(),
            ttl,
            capacity: capacity.max(1),
            seq: 0,
        }
    }

    pub(crate) fn get(&mut self, key: &FilterKey, now: Instant) -> Option<CachedResult> {
        let expired = now.duration_since(self.slots.get(key)?.inserted_at) >= self.ttl;
        if expired {
            self.slots.remove(key);
            return None;
        }
        self.slots.get(key).map(|s| s.result.clone())
    }

    pub(crate) fn insert(&mut self, key: FilterKey, result: CachedResult, now: Instant) {
        self.slots.remove(&key);
        while self.slots.len() >= self.capacity {
            let oldest = self
                .slots
                .iter()
                .min_by_key(|(_, s)| s.seq)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(k) => {
                    self.slots.remove(&k);
                }
                None => break,
            }
        }
        self.seq += 1;
        self.slots.insert(
            key,
            Slot {
                result,
                inserted_at: now,
                seq: self.seq,
            },
        );
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Dataset;
    use crate::predicate::{Predicate, PredicateSet};

    fn key(records: &Dataset, max: usize) -> FilterKey {
        let set = PredicateSet::new()
            .with("party", Predicate::exact("apc"))
            .unwrap();
        FilterKey::new(records.id(), &set, max, true)
    }

    fn result() -> CachedResult {
        CachedResult {
            results: Arc::from(Vec::new()),
            total_matched: 0,
        }
    }

    #[test]
    fn entries_expire_after_ttl() {
        let records = Dataset::default();
        let now = Instant::now();
        let mut cache = ResultCache::new(Duration::from_millis(10), 4);
        cache.insert(key(&records, 5), result(), now);
        assert!(cache.get(&key(&records, 5), now).is_some());
        assert!(cache
            .get(&key(&records, 5), now + Duration::from_millis(10))
            .is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn oldest_insertion_evicted_first() {
        let records = Dataset::default();
        let now = Instant::now();
        let mut cache = ResultCache::new(Duration::from_secs(60), 2);
        cache.insert(key(&records, 1), result(), now);
        cache.insert(key(&records, 2), result(), now);
        // reads do not refresh insertion order
        assert!(cache.get(&key(&records, 1), now).is_some());
        cache.insert(key(&records, 3), result(), now);
        assert!(cache.get(&key(&records, 1), now).is_none());
        assert!(cache.get(&key(&records, 2), now).is_some());
        assert!(cache.get(&key(&records, 3), now).is_some());
    }
}
