//! Error types for SiteMiner.
//!
//! Library crates use [`SiteMinerError`] via `thiserror`.
//! App crates (cli) wrap this with `color-eyre` for rich diagnostics.
//!
//! Fetch errors carry the transient/permanent split that drives the worker
//! pool's retry policy: transient errors are retried with backoff, permanent
//! errors fail the page immediately.

use std::path::PathBuf;

/// Top-level error type for all SiteMiner operations.
#[derive(Debug, thiserror::Error)]
pub enum SiteMinerError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Retryable fetch failure (timeout, connection reset, 5xx).
    #[error("transient fetch error: {0}")]
    TransientFetch(String),

    /// Non-retryable fetch failure (404, disallowed, malformed URL).
    #[error("permanent fetch error: {0}")]
    PermanentFetch(String),

    /// Content could not be parsed — the page is skipped, the job continues.
    #[error("extraction error: {0}")]
    Extraction(String),

    /// The job itself cannot proceed (root unreachable, error rate exceeded).
    #[error("job failed: {0}")]
    JobFatal(String),

    /// A partition write failed after its retry budget.
    #[error("store write error: {0}")]
    StoreWrite(String),

    /// Cooperative stop signal — not a failure.
    #[error("job cancelled")]
    Cancelled,

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Language model or embedding capability error.
    #[error("model error: {0}")]
    Model(String),

    /// Data validation error (bad URL, invalid priority, unknown job).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, SiteMinerError>;

impl SiteMinerError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error should be retried with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientFetch(_))
    }
}
