//! # objsync engine
//!
//! Keeps a local object store and a realtime remote document store in
//! sync, in both directions.
//!
//! This crate provides:
//! - An entity ↔ table registry validated against the local schema
//! - Outbound propagation: local changes become batched remote writes
//! - Inbound propagation: remote events become local edits
//! - Stable sync identifiers linking local objects to remote records
//! - Echo suppression through a synced flag on every local object
//! - A delegate for per-record outcomes
//!
//! ## Architecture
//!
//! Both stores notify the engine through listeners. Listeners only enqueue;
//! a dispatcher thread handles events one at a time, in arrival order.
//!
//! The synced flag breaks the loop between the two directions:
//! 1. Inbound edits set the flag in the same transaction
//! 2. The local store clears the flag on every other edit
//! 3. Outbound propagation skips objects whose flag is set
//!
//! ## Usage
//!
//! ```rust,ignore
//! use objsync_engine::{SyncManager, MemoryLocalStore, MemoryRemoteStore};
//! use std::sync::Arc;
//!
//! let manager = SyncManager::new(Arc::new(local), Arc::new(MemoryRemoteStore::new()));
//! manager.set_table("Task", "tasks")?;
//! manager.start_observing()?;
//!
//! // Local edits now reach the remote store, and remote edits the local one.
//! ```
//!
//! ## Key Invariants
//!
//! - A sync identifier is assigned once and never changes
//! - Remote-originated state is never written back to the remote
//! - Applying the same remote record twice leaves the local store unchanged
//! - A failing record never blocks the rest of its batch

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod delegate;
mod dispatch;
mod error;
mod identity;
mod inbound;
mod manager;
mod mapper;
mod outbound;
mod registry;
mod state;

pub use config::{
    SyncConfig, DEFAULT_BATCH_SIZE, DEFAULT_MAX_BATCH_BYTES, DEFAULT_MAX_RECORD_BYTES,
    DEFAULT_SYNCED_FLAG_ATTRIBUTE, DEFAULT_SYNC_ATTRIBUTE,
};
pub use delegate::{NoopDelegate, SyncDelegate, ValidationContext, WriteFailure};
pub use error::{SyncError, SyncResult};
pub use identity::IdentityResolver;
pub use inbound::{InboundOutcome, InboundPropagator, InboundReport};
pub use manager::SyncManager;
pub use mapper::{
    decode_attribute, encode_attribute, AttributeMapper, DecodedRecord, DecodedRelationship,
    InvalidAttribute, RelationshipTargets,
};
pub use outbound::{
    acknowledge, Acknowledgement, OutboundPropagator, OutboundSummary, WriteReport, WrittenObject,
};
pub use registry::{describe_entity, EntityMapping, EntityTableRegistry};
pub use state::{EventFeed, SyncEvent, SyncStats, SyncStatus};

pub use objsync_model::{
    date_from_iso8601, iso8601_timestamp, AttributeType, AttributeValue, Cardinality,
    ChangeBatch, EntitySchema, ModelError, RelationshipDescriptor, RemoteEvent, RemoteEventKind,
    RemoteFields, RemotePath, RemoteRecord, RemoteValue, RemoteWrite, SyncId,
};
pub use objsync_store::{
    LocalChangeListener, LocalChangeSet, LocalEdit, LocalObject, LocalStore, LocalStoreError,
    LocalStoreResult, MemoryLocalStore, MemoryRemoteStore, ObjectId, ObjectLookup,
    RelationshipValue, RemoteChangeListener, RemoteStore, RemoteStoreError, RemoteStoreResult,
    SubscriptionId, ValidationFailure, WriteCompletion,
};
