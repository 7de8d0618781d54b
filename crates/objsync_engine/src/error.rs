//! Error types for the sync engine.

use objsync_model::{AttributeType, ModelError};
use objsync_store::{LocalStoreError, RemoteStoreError};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while configuring or running the sync engine.
///
/// Only configuration errors are ever returned from the public API after
/// observing has started; per-record problems are reported through the
/// delegate instead.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The local store does not define the entity.
    #[error("local store has no entity named {0}")]
    UnknownEntity(String),

    /// The entity lacks the configured sync attribute.
    #[error("entity {entity} has no sync attribute {attribute}")]
    MissingSyncAttribute {
        /// Entity name.
        entity: String,
        /// Configured sync attribute name.
        attribute: String,
    },

    /// The sync attribute is not a string attribute.
    #[error("sync attribute {entity}.{attribute} must be a string, found {found}")]
    InvalidSyncAttribute {
        /// Entity name.
        entity: String,
        /// Configured sync attribute name.
        attribute: String,
        /// Declared type.
        found: AttributeType,
    },

    /// The synced-flag attribute is not a boolean attribute.
    #[error("synced flag {entity}.{attribute} must be a boolean, found {found}")]
    InvalidSyncedFlag {
        /// Entity name.
        entity: String,
        /// Configured synced-flag attribute name.
        attribute: String,
        /// Declared type.
        found: AttributeType,
    },

    /// Observing was started without any entity/table mapping.
    #[error("no entity/table mappings registered")]
    NoMappings,

    /// The local store handle cannot be used.
    #[error("local store is not open")]
    LocalStoreUnavailable,

    /// The remote store handle cannot be used.
    #[error("remote store is not connected")]
    RemoteStoreUnavailable,

    /// The configuration is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The dispatcher thread could not be started.
    #[error("failed to start dispatcher: {0}")]
    Dispatcher(String),

    /// Local store error during propagation.
    #[error("local store error: {0}")]
    Local(#[from] LocalStoreError),

    /// Remote store error during propagation.
    #[error("remote store error: {0}")]
    Remote(#[from] RemoteStoreError),

    /// Model error.
    #[error("model error: {0}")]
    Model(#[from] ModelError),
}

impl SyncError {
    /// Returns true for errors caused by configuration rather than data.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            SyncError::UnknownEntity(_)
                | SyncError::MissingSyncAttribute { .. }
                | SyncError::InvalidSyncAttribute { .. }
                | SyncError::InvalidSyncedFlag { .. }
                | SyncError::NoMappings
                | SyncError::LocalStoreUnavailable
                | SyncError::RemoteStoreUnavailable
                | SyncError::InvalidConfig(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors() {
        assert!(SyncError::NoMappings.is_configuration_error());
        assert!(SyncError::UnknownEntity("Note".into()).is_configuration_error());
        assert!(!SyncError::Remote(RemoteStoreError::Disconnected).is_configuration_error());
        assert!(!SyncError::Local(LocalStoreError::Closed).is_configuration_error());
    }

    #[test]
    fn error_display() {
        let err = SyncError::MissingSyncAttribute {
            entity: "Task".into(),
            attribute: "syncID".into(),
        };
        assert_eq!(err.to_string(), "entity Task has no sync attribute syncID");

        let err: SyncError = RemoteStoreError::Disconnected.into();
        assert_eq!(err.to_string(), "remote store error: remote store disconnected");
    }
}
