//! Error types for store operations.

use crate::object::{ObjectId, ValidationFailure};
use objsync_model::{AttributeType, RemotePath};
use thiserror::Error;

/// Result type for local store operations.
pub type LocalStoreResult<T> = Result<T, LocalStoreError>;

/// Result type for remote store operations.
pub type RemoteStoreResult<T> = Result<T, RemoteStoreError>;

/// Errors reported by a local store.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LocalStoreError {
    /// The entity type is not part of the store's model.
    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    /// The object does not exist (or was deleted in this edit).
    #[error("unknown object: {0}")]
    UnknownObject(ObjectId),

    /// The entity declares no attribute or relationship of that name.
    #[error("entity {entity} has no property {property}")]
    UnknownProperty {
        /// Entity name.
        entity: String,
        /// Property name.
        property: String,
    },

    /// A value does not match the declared attribute type.
    #[error("{entity}.{attribute} expects {expected}, got {found}")]
    TypeMismatch {
        /// Entity name.
        entity: String,
        /// Attribute name.
        attribute: String,
        /// Declared type.
        expected: AttributeType,
        /// Type of the rejected value.
        found: AttributeType,
    },

    /// The edit failed validation; nothing was committed.
    #[error("validation failed for {} object(s)", .0.len())]
    Validation(Vec<ValidationFailure>),

    /// The edit was abandoned by its caller; nothing was committed.
    #[error("edit aborted: {0}")]
    Aborted(String),

    /// The store is closed.
    #[error("local store is closed")]
    Closed,
}

impl LocalStoreError {
    /// Returns the per-object validation failures, if this is a validation error.
    #[must_use]
    pub fn validation_failures(&self) -> Option<&[ValidationFailure]> {
        match self {
            LocalStoreError::Validation(failures) => Some(failures),
            _ => None,
        }
    }
}

/// Errors reported by a remote store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteStoreError {
    /// The store refused the write. `paths` lists the offending records
    /// when the failure is attributable to them.
    #[error("write rejected: {message}")]
    Rejected {
        /// Reason given by the store.
        message: String,
        /// Paths the failure applies to; empty for batch-level failures.
        paths: Vec<RemotePath>,
    },

    /// The payload exceeds the store's size ceiling.
    #[error("payload of {bytes} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge {
        /// Encoded size of the payload.
        bytes: usize,
        /// Size ceiling.
        limit: usize,
    },

    /// The store is not reachable.
    #[error("remote store disconnected")]
    Disconnected,
}

impl RemoteStoreError {
    /// Creates a batch-level rejection.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
            paths: Vec::new(),
        }
    }

    /// Returns the paths the failure is attributable to.
    #[must_use]
    pub fn paths(&self) -> &[RemotePath] {
        match self {
            RemoteStoreError::Rejected { paths, .. } => paths,
            _ => &[],
        }
    }
}
