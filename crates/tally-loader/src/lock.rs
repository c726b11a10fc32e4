//! Per-key request locks.
//!
//! A lock is a completion signal: the owner publishes the outcome of its
//! load on a `watch` channel and every caller that found the key locked
//! waits on that channel instead of fetching again. Locks carry a hold
//! limit; once it passes, the next caller takes the key over even though the
//! original owner may still be running (a second concurrent fetch is
//! possible in that case).
//!
//! Dropping a [`LockGuard`] without publishing (the owning future was
//! dropped) releases the key, and waiters observe [`Wait::Abandoned`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::LoadError;

pub(crate) type Outcome<T> = Result<Arc<T>, LoadError>;

struct Slot<T> {
    id: u64,
    acquired_at: Instant,
    rx: watch::Receiver<Option<Outcome<T>>>,
}

type SlotMap<T> = Arc<Mutex<HashMap<String, Slot<T>>>>;

pub(crate) struct KeyLocks<T> {
    slots: SlotMap<T>,
    hold_limit: Duration,
    next_id: AtomicU64,
}

pub(crate) enum Acquired<T> {
    /// Caller owns the key and must run the load.
    Owner(LockGuard<T>),
    /// Another load holds the key.
    Waiter(Waiter<T>),
}

/// How a wait on someone else's lock ended.
pub(crate) enum Wait<T> {
    Settled(Outcome<T>),
    Abandoned,
    Expired,
}

impl<T> KeyLocks<T> {
    pub(crate) fn new(hold_limit: Duration) -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            hold_limit,
            next_id: AtomicU64::new(1),
        }
    }

    /// Take the lock for `key` or join the current holder.
    ///
    /// The boolean is true when an expired holder was displaced.
    pub(crate) fn acquire(&self, key: &str) -> (Acquired<T>, bool) {
        let now = Instant::now();
        let mut slots = lock_slots(&self.slots);
        let mut took_over = false;
        if let Some(slot) = slots.get(key) {
            let deadline = slot.acquired_at + self.hold_limit;
            if now < deadline {
                let waiter = Waiter {
                    rx: slot.rx.clone(),
                    deadline,
                };
                return (Acquired::Waiter(waiter), false);
            }
            took_over = true;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(None);
        slots.insert(
            key.to_string(),
            Slot {
                id,
                acquired_at: now,
                rx,
            },
        );
        let guard = LockGuard {
            slots: Arc::clone(&self.slots),
            key: key.to_string(),
            id,
            tx,
        };
        (Acquired::Owner(guard), took_over)
    }

    pub(crate) fn is_locked(&self, key: &str) -> bool {
        lock_slots(&self.slots).contains_key(key)
    }

    #[cfg(test)]
    pub(crate) fn held(&self) -> usize {
        lock_slots(&self.slots).len()
    }
}

fn lock_slots<T>(slots: &SlotMap<T>) -> MutexGuard<'_, HashMap<String, Slot<T>>> {
    // A panic while holding this mutex cannot leave the map half-updated.
    slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) struct LockGuard<T> {
    slots: SlotMap<T>,
    key: String,
    id: u64,
    tx: watch::Sender<Option<Outcome<T>>>,
}

impl<T> LockGuard<T> {
    /// Publish the outcome to every waiter and release the key.
    pub(crate) fn release(self, outcome: Outcome<T>) {
        self.tx.send_replace(Some(outcome));
        // Drop removes the slot.
    }
}

impl<T> Drop for LockGuard<T> {
    fn drop(&mut self) {
        let mut slots = lock_slots(&self.slots);
        // A waiter may have taken over an expired lock; leave its slot alone.
        if slots.get(&self.key).map(|s| s.id) == Some(self.id) {
            slots.remove(&self.key);
        }
    }
}

pub(crate) struct Waiter<T> {
    rx: watch::Receiver<Option<Outcome<T>>>,
    deadline: Instant,
}

impl<T> Waiter<T> {
    pub(crate) async fn wait(mut self) -> Wait<T> {
        let settled = tokio::time::timeout_at(self.deadline, self.rx.wait_for(|v| v.is_some()));
        let wait = match settled.await {
            Ok(Ok(value)) => match &*value {
                Some(outcome) => Wait::Settled(outcome.clone()),
                None => Wait::Abandoned,
            },
            Ok(Err(_closed)) => Wait::Abandoned,
            Err(_elapsed) => Wait::Expired,
        };
        wait
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn waiter_sees_published_outcome() {
        let locks: KeyLocks<u32> = KeyLocks::new(Duration::from_secs(60));
        let (owner, _) = locks.acquire("k");
        let (waiter, _) = locks.acquire("k");
        let (Acquired::Owner(guard), Acquired::Waiter(waiter)) = (owner, waiter) else {
            panic!("expected owner then waiter");
        };
        let handle = tokio::spawn(waiter.wait());
        guard.release(Ok(Arc::new(7)));
        match handle.await.unwrap() {
            Wait::Settled(Ok(v)) => assert_eq!(*v, 7),
            _ => panic!("expected settled outcome"),
        }
        assert!(!locks.is_locked("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_owner_abandons_waiters() {
        let locks: KeyLocks<u32> = KeyLocks::new(Duration::from_secs(60));
        let (Acquired::Owner(guard), _) = locks.acquire("k") else {
            panic!("expected owner");
        };
        let (Acquired::Waiter(waiter), _) = locks.acquire("k") else {
            panic!("expected waiter");
        };
        drop(guard);
        assert!(matches!(waiter.wait().await, Wait::Abandoned));
        assert_eq!(locks.held(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_lock_is_taken_over() {
        let locks: KeyLocks<u32> = KeyLocks::new(Duration::from_secs(60));
        let (Acquired::Owner(stale), _) = locks.acquire("k") else {
            panic!("expected owner");
        };
        let (Acquired::Waiter(waiter), _) = locks.acquire("k") else {
            panic!("expected waiter");
        };
        assert!(matches!(waiter.wait().await, Wait::Expired));

        let (Acquired::Owner(fresh), took_over) = locks.acquire("k") else {
            panic!("expected takeover");
        };
        assert!(took_over);
        // The stale owner finishing must not release the new owner's slot.
        drop(stale);
        assert!(locks.is_locked("k"));
        drop(fresh);
        assert!(!locks.is_locked("k"));
    }
}
