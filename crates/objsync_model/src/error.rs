//! Error types for the model crate.

use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors that can occur while building or parsing model values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// A sync identifier was empty or contained a path separator.
    #[error("invalid sync identifier: {0:?}")]
    InvalidSyncId(String),

    /// A remote path was not of the form `table/identifier`.
    #[error("invalid remote path: {0:?}")]
    InvalidPath(String),

    /// A timestamp string could not be parsed as ISO-8601.
    #[error("invalid ISO-8601 timestamp: {0:?}")]
    InvalidTimestamp(String),
}
