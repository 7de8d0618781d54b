//! Outbound remote writes and batches.

use crate::record::{RemotePath, RemoteRecord};
use serde::{Deserialize, Serialize};

/// A single pending write against the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum RemoteWrite {
    /// Replace the record stored at `path`.
    Set {
        /// Target path.
        path: RemotePath,
        /// Full record payload.
        record: RemoteRecord,
    },
    /// Remove the record stored at `path`.
    Delete {
        /// Target path.
        path: RemotePath,
    },
}

impl RemoteWrite {
    /// Returns the target path.
    #[must_use]
    pub fn path(&self) -> &RemotePath {
        match self {
            RemoteWrite::Set { path, .. } | RemoteWrite::Delete { path } => path,
        }
    }

    /// Returns true for deletes.
    #[must_use]
    pub fn is_delete(&self) -> bool {
        matches!(self, RemoteWrite::Delete { .. })
    }
}

/// An ordered group of writes issued to the remote store in one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeBatch {
    /// Position of this batch within its change notification.
    pub index: usize,
    /// Session the writes are issued for.
    pub user_id: Option<String>,
    /// Writes in issue order.
    pub writes: Vec<RemoteWrite>,
}

impl ChangeBatch {
    /// Splits `writes` into batches of at most `batch_size` writes.
    ///
    /// A `batch_size` of zero is treated as one.
    #[must_use]
    pub fn partition(
        writes: Vec<RemoteWrite>,
        batch_size: usize,
        user_id: Option<&str>,
    ) -> Vec<ChangeBatch> {
        let batch_size = batch_size.max(1);
        let mut batches = Vec::with_capacity(writes.len().div_ceil(batch_size));
        let mut writes = writes.into_iter().peekable();

        while writes.peek().is_some() {
            batches.push(ChangeBatch {
                index: batches.len(),
                user_id: user_id.map(str::to_string),
                writes: writes.by_ref().take(batch_size).collect(),
            });
        }

        batches
    }

    /// Number of writes in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Returns true if the batch has no writes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Iterates the target paths in issue order.
    pub fn paths(&self) -> impl Iterator<Item = &RemotePath> {
        self.writes.iter().map(RemoteWrite::path)
    }
}
