use thiserror::Error;

/// Result type local to tally-agg.
pub type Result<T> = std::result::Result<T, AggError>;

#[derive(Debug, Error)]
pub enum AggError {
    /// Caller contract violation; not recoverable by retrying.
    #[error("usage error: {0}")]
    Usage(String),

    #[error(transparent)]
    Core(#[from] tally_core::error::Error),
}
