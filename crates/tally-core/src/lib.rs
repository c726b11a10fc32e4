#![forbid(unsafe_code)]
//! tally-core: shared types for the loader, filter, and aggregation crates.
//!
//! Nothing in here performs I/O or suspends; higher layers own the runtime.

pub mod budget;
pub mod config;
pub mod error;
pub mod hash;
pub mod prelude;
pub mod record;
pub mod types;
