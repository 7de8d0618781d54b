//! Remote change notifications.

use crate::record::{RemotePath, RemoteRecord};
use serde::{Deserialize, Serialize};

/// Kind of remote change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteEventKind {
    /// A record appeared under the table.
    Added,
    /// An existing record changed.
    Modified,
    /// A record was removed.
    Removed,
}

/// A push notification for one record under an observed table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEvent {
    /// Table the record lives under.
    pub table: String,
    /// Kind of change.
    pub kind: RemoteEventKind,
    /// Full record payload (last known payload for removals).
    pub record: RemoteRecord,
}

impl RemoteEvent {
    /// Creates an event.
    pub fn new(table: impl Into<String>, kind: RemoteEventKind, record: RemoteRecord) -> Self {
        Self {
            table: table.into(),
            kind,
            record,
        }
    }

    /// Returns the path of the affected record.
    #[must_use]
    pub fn path(&self) -> RemotePath {
        RemotePath::new(self.table.clone(), self.record.id().clone())
    }
}
