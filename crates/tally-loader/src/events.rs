//! Lifecycle events for external telemetry.
//!
//! The loader never logs or renders on its own; it publishes these on a
//! broadcast channel. With the `tracing` feature each event is also emitted
//! at DEBUG level.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::error::FailureKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionReason {
    /// Made room under the size ceiling.
    Capacity,
    /// TTL elapsed.
    Expired,
    /// Removed through the invalidation API.
    Invalidated,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LoaderEvent {
    CacheHit {
        key: String,
    },
    DedupHit {
        key: String,
    },
    LoadSuccess {
        key: String,
        attempts: u32,
        elapsed_ms: u64,
    },
    LoadFailure {
        key: String,
        kind: FailureKind,
        message: String,
    },
    Eviction {
        key: String,
        reason: EvictionReason,
    },
    /// A lock outlived its hold limit and a waiter took the key over.
    LockExpired {
        key: String,
    },
}

pub(crate) struct EventBus {
    tx: broadcast::Sender<LoaderEvent>,
}

impl EventBus {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<LoaderEvent> {
        self.tx.subscribe()
    }

    pub(crate) fn emit(&self, event: LoaderEvent) {
        #[cfg(feature = "tracing")]
        tracing::debug!(?event, "loader event");
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }
}
