#![forbid(unsafe_code)]
//! tally-loader: fetch-and-cache front door of the engine.
//!
//! A [`Loader`] guarantees at most one in-flight fetch per logical key,
//! retries failed fetches with exponential backoff, and keeps results in a
//! size-bounded, time-expiring LRU cache. Lifecycle events go out on a
//! broadcast channel; counters are read through [`Loader::metrics`].
//!
//! Values are handed out as `Arc<T>` so every caller deduplicated onto one
//! fetch shares the same allocation.

pub mod budget;
pub mod cache;
pub mod error;
pub mod events;
pub mod loader;
pub mod lock;
pub mod metrics;
pub mod options;

pub use budget::{ByteBudget, ByteGuard};
pub use cache::{CacheEntry, EntryInfo, Lookup, RecordCache};
pub use error::{FailureKind, LoadError};
pub use events::{EvictionReason, LoaderEvent};
pub use loader::{Loader, LoadingState};
pub use metrics::MetricsSnapshot;
pub use options::{LoadOptions, ProgressFn};
