//! # objsync model
//!
//! Shared vocabulary for the objsync engine.
//!
//! This crate provides:
//! - [`SyncId`], the stable identifier every synced object carries
//! - [`AttributeType`] / [`AttributeValue`] for the typed local side
//! - [`EntitySchema`], the per-entity schema descriptor
//! - [`RemoteRecord`], [`RemotePath`], [`RemoteWrite`], [`ChangeBatch`] and
//!   [`RemoteEvent`] for the schema-less remote side
//! - ISO-8601 timestamp helpers
//!
//! This is a pure data crate with no I/O operations.
//!
//! ## Usage
//!
//! ```
//! use objsync_model::{AttributeType, EntitySchema, RemotePath, SyncId};
//!
//! let schema = EntitySchema::new("Task")
//!     .with_attribute("syncID", AttributeType::String)
//!     .with_attribute("title", AttributeType::String)
//!     .with_to_one("project", "Project");
//! assert_eq!(schema.attribute_type("title"), Some(AttributeType::String));
//!
//! let path = RemotePath::new("tasks", SyncId::parse("abc123").unwrap());
//! assert_eq!(path.to_string(), "tasks/abc123");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod event;
mod record;
mod schema;
mod sync_id;
mod timestamp;
mod value;
mod write;

pub use error::{ModelError, ModelResult};
pub use event::{RemoteEvent, RemoteEventKind};
pub use record::{RemoteFields, RemotePath, RemoteRecord};
pub use schema::{Cardinality, EntitySchema, RelationshipDescriptor};
pub use sync_id::SyncId;
pub use timestamp::{date_from_iso8601, iso8601_timestamp};
pub use value::{AttributeType, AttributeValue};
pub use write::{ChangeBatch, RemoteWrite};

/// JSON value type used for remote record fields.
pub use serde_json::Value as RemoteValue;
