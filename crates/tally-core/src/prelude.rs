//! Convenient re-exports for downstream crates.

pub use crate::budget::{SizeBudget, SizeGuard};
pub use crate::config::{AggregationConfig, EngineConfig, FilterConfig, LoaderConfig};
pub use crate::error::{Error, Result};
pub use crate::hash::Hash256;
pub use crate::record::{FieldPath, Record};
pub use crate::types::Scalar;
