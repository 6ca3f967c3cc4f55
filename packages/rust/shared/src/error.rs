//! Error types for hrdocs.
//!
//! Library crates use [`HrDocsError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type for all hrdocs operations.
#[derive(Debug, thiserror::Error)]
pub enum HrDocsError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Transport-level failure talking to an upstream service.
    #[error("network error: {0}")]
    Network(String),

    /// Upstream service answered with a non-success HTTP status.
    #[error("upstream error (HTTP {status}): {message}")]
    Upstream { status: u16, message: String },

    /// An external call did not finish in time.
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    /// Model output did not match the expected metadata schema.
    #[error("schema violation: {message}")]
    Schema { message: String },

    /// Text extraction or classification failed for a document.
    #[error("extraction error: {0}")]
    Extraction(String),

    /// File store error (bad key, missing object, etc.).
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (duplicate names, empty batch, bad format).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, HrDocsError>;

impl HrDocsError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a schema violation from any displayable message.
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a timeout error for the named operation.
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether retrying the same call could plausibly succeed.
    ///
    /// Only transport failures, timeouts, rate limiting and server-side
    /// errors qualify. Parse and schema failures never do.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout { .. } => true,
            Self::Upstream { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
