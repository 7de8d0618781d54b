//! Host callbacks.
//!
//! Every hook has a default so hosts implement only what they need. Hooks
//! run on the engine's dispatcher thread, one at a time, in event order.

use objsync_model::{AttributeType, RemotePath, RemoteValue, SyncId};
use objsync_store::{LocalObject, LocalStoreError, RemoteStoreError};

/// Context of a rejected inbound record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationContext {
    /// Remote table of the record.
    pub table: String,
    /// Identifier of the record.
    pub sync_id: SyncId,
    /// Fields that were skipped before the record was given up.
    pub skipped_fields: Vec<String>,
}

/// A remote write that failed for one object.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteFailure {
    /// Index of the batch within its propagation pass.
    pub batch: usize,
    /// Path of the failed write.
    pub path: RemotePath,
    /// Local object as it was when the write was issued.
    pub object: LocalObject,
    /// Whether the write was a delete.
    pub deleted: bool,
    /// Error reported by the remote store.
    pub error: RemoteStoreError,
}

/// Receives per-record outcomes from the engine.
pub trait SyncDelegate: Send + Sync {
    /// An inbound record could not be saved, even after dropping the
    /// fields that failed validation, or the local store rejected the
    /// identifier assigned to an outbound object.
    fn insert_validation_failed(
        &self,
        _object: &LocalObject,
        _error: &LocalStoreError,
        _context: &ValidationContext,
    ) {
    }

    /// An inbound record was applied to the local store.
    fn synced_from_remote(&self, _object: &LocalObject) {}

    /// An outbound write of this object was acknowledged.
    fn synced_to_remote(&self, _object: &LocalObject) {}

    /// A remote field did not match the declared local type and was skipped.
    fn invalid_attribute(
        &self,
        _object: &LocalObject,
        _property: &str,
        _value: &RemoteValue,
        _expected: AttributeType,
    ) {
    }

    /// Decides whether an object takes part in sync. Consulted for local
    /// changes and for inbound records that would create a new object.
    fn is_record_syncable(&self, _object: &LocalObject) -> bool {
        true
    }

    /// A remote write failed and the failure names this object's path.
    fn remote_write_failed(&self, _failure: &WriteFailure) {}

    /// A remote batch failed without naming the offending paths.
    fn batch_write_failed(&self, _batch: usize, _paths: &[RemotePath], _error: &RemoteStoreError) {}
}

/// A delegate that ignores every callback.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDelegate;

impl SyncDelegate for NoopDelegate {}

#[cfg(test)]
mod tests {
    use super::*;
    use objsync_store::ObjectId;

    struct OnlyTasks;

    impl SyncDelegate for OnlyTasks {
        fn is_record_syncable(&self, object: &LocalObject) -> bool {
            object.entity() == "Task"
        }
    }

    #[test]
    fn defaults_accept_everything() {
        let object = LocalObject::new(ObjectId::from_raw(1), "Note");
        assert!(NoopDelegate.is_record_syncable(&object));
        assert!(!OnlyTasks.is_record_syncable(&object));
    }
}
