//! Remote records and their addresses.

use crate::error::{ModelError, ModelResult};
use crate::sync_id::SyncId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Field map of a remote record.
pub type RemoteFields = Map<String, Value>;

/// Address of a remote record: `table/identifier` below the remote root.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RemotePath {
    /// Remote table identifier.
    pub table: String,
    /// Sync identifier of the record.
    pub id: SyncId,
}

impl RemotePath {
    /// Creates a path.
    pub fn new(table: impl Into<String>, id: SyncId) -> Self {
        Self {
            table: table.into(),
            id,
        }
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.table, self.id)
    }
}

impl FromStr for RemotePath {
    type Err = ModelError;

    fn from_str(s: &str) -> ModelResult<Self> {
        let (table, id) = s
            .split_once('/')
            .ok_or_else(|| ModelError::InvalidPath(s.to_string()))?;
        if table.is_empty() {
            return Err(ModelError::InvalidPath(s.to_string()));
        }
        let id = SyncId::parse(id).map_err(|_| ModelError::InvalidPath(s.to_string()))?;
        Ok(Self::new(table, id))
    }
}

/// One synced object in remote vocabulary.
///
/// The identifier is the record's key under its table; it is never part of
/// [`RemoteRecord::fields`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    id: SyncId,
    #[serde(default)]
    fields: RemoteFields,
}

impl RemoteRecord {
    /// Creates a record without fields.
    #[must_use]
    pub fn new(id: SyncId) -> Self {
        Self {
            id,
            fields: RemoteFields::new(),
        }
    }

    /// Creates a record from an existing field map.
    #[must_use]
    pub fn with_fields(id: SyncId, fields: RemoteFields) -> Self {
        Self { id, fields }
    }

    /// Adds a field.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Returns the record's sync identifier.
    #[must_use]
    pub fn id(&self) -> &SyncId {
        &self.id
    }

    /// Returns all fields.
    #[must_use]
    pub fn fields(&self) -> &RemoteFields {
        &self.fields
    }

    /// Returns a single field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Sets a field, returning the previous value.
    pub fn set_field(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.fields.insert(name.into(), value)
    }

    /// Removes a field.
    pub fn remove_field(&mut self, name: &str) -> Option<Value> {
        self.fields.remove(name)
    }

    /// Number of bytes the field map occupies as JSON.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        serde_json::to_vec(&self.fields).map_or(0, |bytes| bytes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn id(s: &str) -> SyncId {
        SyncId::parse(s).unwrap()
    }

    #[test]
    fn path_display_and_parse() {
        let path = RemotePath::new("tasks", id("abc123"));
        assert_eq!(path.to_string(), "tasks/abc123");
        assert_eq!("tasks/abc123".parse::<RemotePath>().unwrap(), path);
    }

    #[test]
    fn path_parse_rejects_malformed() {
        assert!("tasks".parse::<RemotePath>().is_err());
        assert!("/abc".parse::<RemotePath>().is_err());
        assert!("tasks/".parse::<RemotePath>().is_err());
        assert!("tasks/a/b".parse::<RemotePath>().is_err());
    }

    #[test]
    fn record_fields() {
        let mut record = RemoteRecord::new(id("abc123"))
            .with_field("title", "Buy milk")
            .with_field("done", false);
        assert_eq!(record.field("title"), Some(&json!("Buy milk")));
        assert_eq!(record.fields().len(), 2);

        assert_eq!(record.remove_field("done"), Some(json!(false)));
        assert!(record.field("done").is_none());
        assert_eq!(record.encoded_len(), r#"{"title":"Buy milk"}"#.len());
    }
}
