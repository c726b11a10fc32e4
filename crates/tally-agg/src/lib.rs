#![forbid(unsafe_code)]
//! tally-agg: reduce record sets to summary statistics with a quality label.
//!
//! Design intent:
//! - Stateless and synchronous; every entry point is a free function over a
//!   borrowed input and an [`AggregationOptions`].
//! - Missing data is a policy decision (`NullPolicy`), and too little data is
//!   a result (`value: None`, `QualityLevel::Unknown`), never an error.
//! - Confidence and quality are heuristics on sample size, dispersion and
//!   completeness; their thresholds are fixed constants in `stats`/`result`.

pub mod aggregate;
pub mod error;
pub mod grouped;
pub mod nulls;
pub mod options;
pub mod result;
pub mod stats;
pub mod temporal;
pub mod weighted;

pub use aggregate::{aggregate, aggregate_values, extract};
pub use error::AggError;
pub use grouped::{aggregate_grouped, GroupComparison, GroupedAggregationResult};
pub use options::{AggregationMethod, AggregationOptions, ConfidenceLevel, NullPolicy};
pub use result::{AggregationMetadata, AggregationResult, ConfidenceInterval, QualityLevel};
pub use temporal::{temporal_aggregation, TemporalBucket, TimeInterval};
pub use weighted::weighted_average;
