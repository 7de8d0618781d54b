//! Local store contract.

use crate::error::LocalStoreResult;
use crate::object::{LocalChangeSet, LocalObject, ObjectId, RelationshipValue, SubscriptionId};
use objsync_model::{AttributeValue, EntitySchema};

/// Callback invoked once per committed local transaction.
pub type LocalChangeListener = Box<dyn Fn(&LocalChangeSet) + Send + Sync>;

/// Read access to local objects.
pub trait ObjectLookup {
    /// Returns a snapshot of the object, or `None` if it does not exist.
    fn object(&self, id: ObjectId) -> Option<LocalObject>;

    /// Finds an object of `entity` whose `attribute` equals `value`.
    ///
    /// Used to resolve sync identifiers; the store is expected to answer
    /// from an index.
    fn find_by_attribute(
        &self,
        entity: &str,
        attribute: &str,
        value: &AttributeValue,
    ) -> Option<LocalObject>;
}

/// Mutations available inside a scoped local edit.
///
/// Lookups through the edit observe its own uncommitted changes.
pub trait LocalEdit: ObjectLookup {
    /// Inserts a new, empty object of `entity`.
    ///
    /// # Errors
    ///
    /// Returns an error if the entity is unknown.
    fn insert(&mut self, entity: &str) -> LocalStoreResult<ObjectId>;

    /// Writes an attribute.
    ///
    /// # Errors
    ///
    /// Returns an error if the object or attribute is unknown or if the
    /// value does not match the declared type.
    fn set_attribute(
        &mut self,
        id: ObjectId,
        name: &str,
        value: AttributeValue,
    ) -> LocalStoreResult<()>;

    /// Writes a relationship.
    ///
    /// # Errors
    ///
    /// Returns an error if the object, relationship or a target is unknown,
    /// or if the cardinality does not match.
    fn set_relationship(
        &mut self,
        id: ObjectId,
        name: &str,
        value: RelationshipValue,
    ) -> LocalStoreResult<()>;

    /// Deletes an object.
    ///
    /// # Errors
    ///
    /// Returns an error if the object does not exist.
    fn delete(&mut self, id: ObjectId) -> LocalStoreResult<()>;
}

/// A schema-typed local object store.
///
/// # Invariants
///
/// - [`LocalStore::transaction`] commits only if the closure returns `Ok`
///   and validation passes; otherwise nothing is committed
/// - every committed transaction that changed at least one object fires
///   each subscribed listener exactly once, after the commit
/// - a committed change to an object that did not itself write the
///   object's synced-flag attribute leaves that attribute `false`, so user
///   edits are always picked up by the next outbound pass
pub trait LocalStore: ObjectLookup + Send + Sync {
    /// Returns the schema of an entity type.
    fn entity_schema(&self, entity: &str) -> Option<EntitySchema>;

    /// Runs `f` inside a scoped edit and commits it.
    ///
    /// # Errors
    ///
    /// Returns the closure's error, or [`crate::LocalStoreError::Validation`]
    /// if the store rejects the resulting state. In both cases nothing is
    /// committed.
    fn transaction<R, F>(&self, f: F) -> LocalStoreResult<R>
    where
        F: FnOnce(&mut dyn LocalEdit) -> LocalStoreResult<R>;

    /// Subscribes to committed change sets.
    fn subscribe(&self, listener: LocalChangeListener) -> SubscriptionId;

    /// Removes a subscription. Returns false if it did not exist.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;

    /// Returns true if the store can be read and written.
    fn is_open(&self) -> bool {
        true
    }
}
