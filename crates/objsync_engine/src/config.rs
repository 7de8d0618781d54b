//! Configuration for the sync engine.

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};

/// Default name of the attribute holding the sync identifier.
pub const DEFAULT_SYNC_ATTRIBUTE: &str = "syncID";

/// Default name of the echo-suppression flag attribute.
pub const DEFAULT_SYNCED_FLAG_ATTRIBUTE: &str = "isSynced";

/// Default number of objects written per batch (2048 KiB / 100 KiB).
pub const DEFAULT_BATCH_SIZE: usize = 20;

/// Default payload ceiling of one batch.
pub const DEFAULT_MAX_BATCH_BYTES: usize = 2048 * 1024;

/// Default assumed ceiling of one record.
pub const DEFAULT_MAX_RECORD_BYTES: usize = 100 * 1024;

/// Configuration for sync operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Local attribute holding the sync identifier.
    pub sync_attribute: String,
    /// Local boolean attribute marking state that must not be re-sent.
    pub synced_flag_attribute: String,
    /// Maximum number of writes per remote batch.
    pub batch_size: usize,
    /// Payload ceiling of one batch, in bytes.
    pub max_batch_bytes: usize,
    /// Expected ceiling of one record, in bytes.
    pub max_record_bytes: usize,
    /// Session identifier attached to every batch.
    pub user_id: Option<String>,
}

impl SyncConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            sync_attribute: DEFAULT_SYNC_ATTRIBUTE.to_string(),
            synced_flag_attribute: DEFAULT_SYNCED_FLAG_ATTRIBUTE.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            max_batch_bytes: DEFAULT_MAX_BATCH_BYTES,
            max_record_bytes: DEFAULT_MAX_RECORD_BYTES,
            user_id: None,
        }
    }

    /// Parses a configuration from JSON. Missing keys take default values.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] if the JSON is malformed or the
    /// result fails [`SyncConfig::validate`].
    pub fn from_json(json: &str) -> SyncResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| SyncError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the sync attribute name.
    pub fn with_sync_attribute(mut self, name: impl Into<String>) -> Self {
        self.sync_attribute = name.into();
        self
    }

    /// Sets the synced-flag attribute name.
    pub fn with_synced_flag_attribute(mut self, name: impl Into<String>) -> Self {
        self.synced_flag_attribute = name.into();
        self
    }

    /// Sets the batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the batch payload ceiling.
    pub fn with_max_batch_bytes(mut self, bytes: usize) -> Self {
        self.max_batch_bytes = bytes;
        self
    }

    /// Sets the expected record ceiling.
    pub fn with_max_record_bytes(mut self, bytes: usize) -> Self {
        self.max_record_bytes = bytes;
        self
    }

    /// Sets the session identifier.
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Checks the configuration.
    ///
    /// A batch size whose worst-case payload exceeds the batch ceiling is
    /// accepted with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] for a zero batch size, empty or
    /// identical attribute names.
    pub fn validate(&self) -> SyncResult<()> {
        if self.batch_size == 0 {
            return Err(SyncError::InvalidConfig("batch size must be positive".into()));
        }
        if self.sync_attribute.is_empty() || self.synced_flag_attribute.is_empty() {
            return Err(SyncError::InvalidConfig(
                "attribute names must not be empty".into(),
            ));
        }
        if self.sync_attribute == self.synced_flag_attribute {
            return Err(SyncError::InvalidConfig(
                "sync attribute and synced flag must differ".into(),
            ));
        }
        if self.worst_case_batch_bytes() > self.max_batch_bytes {
            tracing::warn!(
                batch_size = self.batch_size,
                max_record_bytes = self.max_record_bytes,
                max_batch_bytes = self.max_batch_bytes,
                "batch size may exceed the remote payload ceiling"
            );
        }
        Ok(())
    }

    /// Payload of a full batch of maximum-size records.
    pub fn worst_case_batch_bytes(&self) -> usize {
        self.batch_size.saturating_mul(self.max_record_bytes)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.sync_attribute, "syncID");
        assert_eq!(config.synced_flag_attribute, "isSynced");
        assert_eq!(config.batch_size, 20);
        assert!(config.worst_case_batch_bytes() <= config.max_batch_bytes);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder() {
        let config = SyncConfig::new()
            .with_sync_attribute("uuid")
            .with_synced_flag_attribute("clean")
            .with_batch_size(5)
            .with_user_id("user-42");

        assert_eq!(config.sync_attribute, "uuid");
        assert_eq!(config.synced_flag_attribute, "clean");
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.user_id.as_deref(), Some("user-42"));
    }

    #[test]
    fn validate_rejects_bad_values() {
        assert!(SyncConfig::new().with_batch_size(0).validate().is_err());
        assert!(SyncConfig::new().with_sync_attribute("").validate().is_err());
        assert!(SyncConfig::new()
            .with_sync_attribute("isSynced")
            .validate()
            .is_err());
    }

    #[test]
    fn oversized_batch_is_only_a_warning() {
        let config = SyncConfig::new().with_batch_size(100);
        assert!(config.worst_case_batch_bytes() > config.max_batch_bytes);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn from_json_fills_defaults() {
        let config = SyncConfig::from_json(r#"{"batch_size": 10, "user_id": "u1"}"#).unwrap();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.sync_attribute, "syncID");
        assert_eq!(config.user_id.as_deref(), Some("u1"));

        assert!(matches!(
            SyncConfig::from_json(r#"{"batch_size": 0}"#),
            Err(SyncError::InvalidConfig(_))
        ));
        assert!(SyncConfig::from_json("not json").is_err());
    }
}
