#![forbid(unsafe_code)]
//! tally-filter: multi-dimensional filtering over in-memory records.
//!
//! Design intent:
//! - Pure and synchronous; nothing here suspends, so the engine needs no
//!   internal locking and takes `&mut self` for anything that mutates.
//! - Indexes bucket record *positions* per field; a query starts from the
//!   smallest candidate set any index can produce and evaluates the rest of
//!   the predicates on that base.
//! - Record sets are immutable [`Dataset`]s with a never-reused id; indexes
//!   and cached results are tied to that id, not to where the records live.
//! - Results are cached under a canonical, typed key so repeating a query on
//!   the same dataset is a map lookup.

pub mod cache;
pub mod dataset;
pub mod engine;
pub mod error;
pub mod index;
pub mod metrics;
pub mod predicate;

pub use engine::{FilterEngine, FilterOptions, FilterOutcome, ScanBase, ScanPlan};
pub use error::FilterError;
pub use dataset::{Dataset, DatasetId};
pub use index::{FieldIndex, IndexBuild, IndexStats};
pub use metrics::FilterMetrics;
pub use predicate::{CanonicalPredicate, FilterKey, Predicate, PredicateSet};
