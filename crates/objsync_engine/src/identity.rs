//! Sync identifier resolution.

use objsync_model::{AttributeValue, RemoteRecord, SyncId};
use objsync_store::{LocalEdit, LocalObject, LocalStoreResult, ObjectId, ObjectLookup};

/// Reads, assigns and resolves the sync identifiers of local objects.
///
/// An identifier is assigned once, the first time an object takes part in
/// an outbound pass, and is never rewritten afterwards.
#[derive(Debug, Clone, Copy)]
pub struct IdentityResolver<'a> {
    sync_attribute: &'a str,
}

impl<'a> IdentityResolver<'a> {
    /// Creates a resolver reading the given attribute.
    pub fn new(sync_attribute: &'a str) -> Self {
        Self { sync_attribute }
    }

    /// Returns the identifier already stored on an object.
    ///
    /// A stored value that is not a valid identifier is treated as absent.
    pub fn existing(&self, object: &LocalObject) -> Option<SyncId> {
        let text = object.attribute(self.sync_attribute).as_text()?;
        match SyncId::parse(text) {
            Ok(id) => Some(id),
            Err(error) => {
                tracing::warn!(object = %object.id(), %error, "ignoring malformed sync identifier");
                None
            }
        }
    }

    /// Returns the object's identifier, generating and storing one in
    /// `edit` if it has none yet.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the identifier cannot be written.
    pub fn identifier_for(
        &self,
        edit: &mut dyn LocalEdit,
        object: &LocalObject,
    ) -> LocalStoreResult<SyncId> {
        if let Some(id) = self.existing(object) {
            return Ok(id);
        }
        let id = SyncId::generate();
        self.assign(edit, object.id(), &id)?;
        Ok(id)
    }

    /// Stores `id` as the identifier of an object.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the identifier cannot be written.
    pub fn assign(&self, edit: &mut dyn LocalEdit, object: ObjectId, id: &SyncId) -> LocalStoreResult<()> {
        edit.set_attribute(
            object,
            self.sync_attribute,
            AttributeValue::Text(id.as_str().to_string()),
        )?;
        tracing::trace!(%object, sync_id = %id, "assigned sync identifier");
        Ok(())
    }

    /// Finds the local object of `entity` carrying the identifier.
    pub fn local_object_for<T: ObjectLookup + ?Sized>(
        &self,
        lookup: &T,
        entity: &str,
        id: &SyncId,
    ) -> Option<LocalObject> {
        lookup.find_by_attribute(
            entity,
            self.sync_attribute,
            &AttributeValue::Text(id.as_str().to_string()),
        )
    }

    /// Returns the identifier of a remote record.
    pub fn identifier_of<'r>(&self, record: &'r RemoteRecord) -> &'r SyncId {
        record.id()
    }
}
