use thiserror::Error;

/// Result type local to tally-filter.
pub type Result<T> = std::result::Result<T, FilterError>;

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("invalid wildcard pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid predicate for '{field}': {reason}")]
    Predicate { field: String, reason: String },

    #[error(transparent)]
    Core(#[from] tally_core::error::Error),
}
