use serde::Serialize;
use thiserror::Error;

/// Result type local to tally-loader.
pub type Result<T> = std::result::Result<T, LoadError>;

/// Terminal failure of a load.
///
/// `Clone` because one failure is delivered to every caller deduplicated
/// onto the same in-flight fetch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("load '{key}' timed out after {timeout_ms} ms")]
    Timeout { key: String, timeout_ms: u64 },

    #[error("load '{key}' was cancelled")]
    Cancelled { key: String },

    #[error("load '{key}' failed after {attempts} attempt(s): {last_error}")]
    RetryExhausted {
        key: String,
        attempts: u32,
        last_error: String,
    },
}

impl LoadError {
    pub fn kind(&self) -> FailureKind {
        match self {
            LoadError::Timeout { .. } => FailureKind::Timeout,
            LoadError::Cancelled { .. } => FailureKind::Cancelled,
            LoadError::RetryExhausted { .. } => FailureKind::RetryExhausted,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            LoadError::Timeout { key, .. }
            | LoadError::Cancelled { key }
            | LoadError::RetryExhausted { key, .. } => key,
        }
    }
}

/// Discriminant of [`LoadError`], carried on lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    Cancelled,
    RetryExhausted,
}
