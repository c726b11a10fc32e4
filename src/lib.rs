#![forbid(unsafe_code)]
//! tally: in-process query engine for dashboard data.
//!
//! Umbrella crate re-exporting the workspace members so applications can
//! depend on a single package:
//! - [`loader`]: deduplicated, cached record fetching.
//! - [`filter`]: multi-dimensional filtering with selectivity-first indexes.
//! - [`agg`]: null-tolerant aggregation with confidence estimates.

pub use tally_agg as agg;
pub use tally_core as core;
pub use tally_filter as filter;
pub use tally_loader as loader;

pub use tally_core::prelude;
