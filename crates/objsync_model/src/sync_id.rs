//! Sync identifier.

use crate::error::{ModelError, ModelResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stable identifier of a synced object.
///
/// Sync identifiers are:
/// - Stored on the local object under the configured sync attribute
/// - Used as the key of the remote record under its table
/// - Immutable once assigned
///
/// They are random strings; collisions are negligible but the value is not
/// security sensitive.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SyncId(String);

impl SyncId {
    /// Generates a new random sync identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Parses a sync identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidSyncId`] if the string is empty or
    /// contains `/`, which would break `table/identifier` addressing.
    pub fn parse(value: impl Into<String>) -> ModelResult<Self> {
        let value = value.into();
        if value.is_empty() || value.contains('/') {
            return Err(ModelError::InvalidSyncId(value));
        }
        Ok(Self(value))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SyncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SyncId({})", self.0)
    }
}

impl fmt::Display for SyncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SyncId {
    type Error = ModelError;

    fn try_from(value: String) -> ModelResult<Self> {
        Self::parse(value)
    }
}

impl TryFrom<&str> for SyncId {
    type Error = ModelError;

    fn try_from(value: &str) -> ModelResult<Self> {
        Self::parse(value)
    }
}

impl From<SyncId> for String {
    fn from(id: SyncId) -> Self {
        id.0
    }
}

impl AsRef<str> for SyncId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_is_unique() {
        let a = SyncId::generate();
        let b = SyncId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
    }

    #[test]
    fn parse_rejects_empty_and_separator() {
        assert!(SyncId::parse("").is_err());
        assert!(SyncId::parse("a/b").is_err());
        assert_eq!(SyncId::parse("abc123").unwrap().as_str(), "abc123");
    }

    #[test]
    fn serde_is_transparent() {
        let id = SyncId::parse("abc123").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"abc123\"");

        let back: SyncId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<SyncId>("\"\"").is_err());
    }
}
