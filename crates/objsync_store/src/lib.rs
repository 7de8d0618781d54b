//! # objsync store
//!
//! Collaborator contracts for the objsync engine and in-memory
//! implementations of them.
//!
//! The engine never owns persistence. It talks to two external stores:
//!
//! - a **local store**: a schema-typed object graph with scoped edits,
//!   typed attribute access, indexed lookup by attribute value and a
//!   per-transaction change notification ([`LocalStore`])
//! - a **remote store**: a schema-less, path-addressable document tree with
//!   batched writes, completion callbacks and per-table push notifications
//!   ([`RemoteStore`])
//!
//! ## Available Implementations
//!
//! - [`MemoryLocalStore`] - In-memory object graph, for tests and embedding
//! - [`MemoryRemoteStore`] - In-memory document tree, for tests
//!
//! ## Example
//!
//! ```rust
//! use objsync_model::{AttributeType, EntitySchema};
//! use objsync_store::{LocalStore, MemoryLocalStore, ObjectLookup};
//!
//! let store = MemoryLocalStore::new().with_entity(
//!     EntitySchema::new("Task").with_attribute("title", AttributeType::String),
//! );
//! let id = store.insert_object("Task", [("title", "Buy milk".into())]).unwrap();
//! assert_eq!(
//!     store.object(id).unwrap().attribute("title").as_text(),
//!     Some("Buy milk")
//! );
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod local;
mod memory;
mod object;
mod remote;

pub use error::{LocalStoreError, LocalStoreResult, RemoteStoreError, RemoteStoreResult};
pub use local::{LocalChangeListener, LocalEdit, LocalStore, ObjectLookup};
pub use memory::{MemoryLocalStore, MemoryRemoteStore};
pub use object::{
    LocalChangeSet, LocalObject, ObjectId, RelationshipValue, SubscriptionId, ValidationFailure,
};
pub use remote::{RemoteChangeListener, RemoteStore, WriteCompletion};
