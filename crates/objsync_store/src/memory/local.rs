//! In-memory local object store.

use crate::error::{LocalStoreError, LocalStoreResult};
use crate::local::{LocalChangeListener, LocalEdit, LocalStore, ObjectLookup};
use crate::object::{
    LocalChangeSet, LocalObject, ObjectId, RelationshipValue, SubscriptionId, ValidationFailure,
};
use objsync_model::{AttributeValue, Cardinality, EntitySchema};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

type Listener = Arc<dyn Fn(&LocalChangeSet) + Send + Sync>;
type Check = Arc<dyn Fn(&AttributeValue) -> Result<(), String> + Send + Sync>;

struct ValidationRule {
    entity: String,
    attribute: String,
    check: Check,
}

#[derive(Default)]
struct State {
    schemas: BTreeMap<String, EntitySchema>,
    objects: BTreeMap<ObjectId, LocalObject>,
}

/// An in-memory local object store.
///
/// This store keeps all objects in memory and is suitable for:
/// - Unit and integration tests of the sync engine
/// - Hosts that keep their object graph in memory
///
/// Transactions are serialized. Listeners run synchronously on the
/// committing thread, in commit order, while the next transaction waits;
/// they must not open transactions on the same store themselves.
///
/// Deleting an object leaves references to it in place; lookups of a
/// dangling reference return `None`.
pub struct MemoryLocalStore {
    state: RwLock<State>,
    rules: RwLock<Vec<ValidationRule>>,
    listeners: RwLock<Vec<(SubscriptionId, Listener)>>,
    writer: Mutex<()>,
    synced_flag: String,
    next_object: AtomicU64,
    next_subscription: AtomicU64,
    open: AtomicBool,
}

impl MemoryLocalStore {
    /// Creates an empty store whose synced-flag attribute is `isSynced`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            rules: RwLock::new(Vec::new()),
            listeners: RwLock::new(Vec::new()),
            writer: Mutex::new(()),
            synced_flag: "isSynced".to_string(),
            next_object: AtomicU64::new(1),
            next_subscription: AtomicU64::new(1),
            open: AtomicBool::new(true),
        }
    }

    /// Sets the attribute that is cleared on every edit that does not write it.
    ///
    /// Defaults to `isSynced`. A sync engine configured with another flag
    /// name needs the same name here, or edits made after an inbound apply
    /// keep the flag set and are never sent.
    #[must_use]
    pub fn with_synced_flag(mut self, name: impl Into<String>) -> Self {
        self.synced_flag = name.into();
        self
    }

    /// Adds an entity type to the model.
    #[must_use]
    pub fn with_entity(self, schema: EntitySchema) -> Self {
        self.register_entity(schema);
        self
    }

    /// Adds or replaces an entity type.
    pub fn register_entity(&self, schema: EntitySchema) {
        self.state
            .write()
            .schemas
            .insert(schema.name().to_string(), schema);
    }

    /// Adds a validation rule checked at commit for every inserted or
    /// updated object of `entity`.
    pub fn add_validation_rule<F>(&self, entity: &str, attribute: &str, check: F)
    where
        F: Fn(&AttributeValue) -> Result<(), String> + Send + Sync + 'static,
    {
        self.rules.write().push(ValidationRule {
            entity: entity.to_string(),
            attribute: attribute.to_string(),
            check: Arc::new(check),
        });
    }

    /// Inserts an object with the given attributes in its own transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the entity or an attribute is unknown, or if the
    /// object fails validation.
    pub fn insert_object<'a, I>(&self, entity: &str, attributes: I) -> LocalStoreResult<ObjectId>
    where
        I: IntoIterator<Item = (&'a str, AttributeValue)>,
    {
        self.transaction(|edit| {
            let id = edit.insert(entity)?;
            for (name, value) in attributes {
                edit.set_attribute(id, name, value)?;
            }
            Ok(id)
        })
    }

    /// Updates attributes of an object in its own transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the object or an attribute is unknown, or if the
    /// object fails validation.
    pub fn update_object<'a, I>(&self, id: ObjectId, attributes: I) -> LocalStoreResult<()>
    where
        I: IntoIterator<Item = (&'a str, AttributeValue)>,
    {
        self.transaction(|edit| {
            for (name, value) in attributes {
                edit.set_attribute(id, name, value)?;
            }
            Ok(())
        })
    }

    /// Sets a relationship of an object in its own transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the object, relationship or a target is unknown.
    pub fn relate(&self, id: ObjectId, name: &str, value: RelationshipValue) -> LocalStoreResult<()> {
        self.transaction(|edit| edit.set_relationship(id, name, value))
    }

    /// Deletes an object in its own transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the object does not exist.
    pub fn delete_object(&self, id: ObjectId) -> LocalStoreResult<()> {
        self.transaction(|edit| edit.delete(id))
    }

    /// Returns all committed objects of an entity type.
    #[must_use]
    pub fn objects(&self, entity: &str) -> Vec<LocalObject> {
        self.state
            .read()
            .objects
            .values()
            .filter(|o| o.entity() == entity)
            .cloned()
            .collect()
    }

    /// Returns the number of committed objects of an entity type.
    #[must_use]
    pub fn count(&self, entity: &str) -> usize {
        self.state
            .read()
            .objects
            .values()
            .filter(|o| o.entity() == entity)
            .count()
    }

    /// Returns the number of active subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Closes the store; further transactions fail with
    /// [`LocalStoreError::Closed`].
    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    fn validate(&self, changes: &LocalChangeSet) -> Vec<ValidationFailure> {
        let rules = self.rules.read();
        let mut failures = Vec::new();

        for object in changes.inserted.iter().chain(&changes.updated) {
            for rule in rules.iter().filter(|r| r.entity == object.entity()) {
                if let Err(message) = (rule.check)(object.attribute(&rule.attribute)) {
                    failures.push(ValidationFailure::new(
                        object.id(),
                        Some(rule.attribute.clone()),
                        message,
                    ));
                }
            }
        }

        failures
    }

    fn notify(&self, changes: &LocalChangeSet) {
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(changes);
        }
    }
}

impl Default for MemoryLocalStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectLookup for MemoryLocalStore {
    fn object(&self, id: ObjectId) -> Option<LocalObject> {
        self.state.read().objects.get(&id).cloned()
    }

    fn find_by_attribute(
        &self,
        entity: &str,
        attribute: &str,
        value: &AttributeValue,
    ) -> Option<LocalObject> {
        self.state
            .read()
            .objects
            .values()
            .find(|o| o.entity() == entity && o.attribute(attribute) == value)
            .cloned()
    }
}

impl LocalStore for MemoryLocalStore {
    fn entity_schema(&self, entity: &str) -> Option<EntitySchema> {
        self.state.read().schemas.get(entity).cloned()
    }

    fn transaction<R, F>(&self, f: F) -> LocalStoreResult<R>
    where
        F: FnOnce(&mut dyn LocalEdit) -> LocalStoreResult<R>,
    {
        if !self.is_open() {
            return Err(LocalStoreError::Closed);
        }

        let _writer = self.writer.lock();

        let (result, changes) = {
            let state = self.state.read();
            let mut edit = MemoryEdit {
                committed: &*state,
                synced_flag: &self.synced_flag,
                next_object: &self.next_object,
                staged: BTreeMap::new(),
                inserted: BTreeSet::new(),
                flag_written: BTreeSet::new(),
            };
            let result = f(&mut edit)?;
            (result, edit.into_changes())
        };

        let failures = self.validate(&changes);
        if !failures.is_empty() {
            return Err(LocalStoreError::Validation(failures));
        }

        if changes.is_empty() {
            return Ok(result);
        }

        {
            let mut state = self.state.write();
            for object in changes.inserted.iter().chain(&changes.updated) {
                state.objects.insert(object.id(), object.clone());
            }
            for object in &changes.deleted {
                state.objects.remove(&object.id());
            }
        }

        self.notify(&changes);
        Ok(result)
    }

    fn subscribe(&self, listener: LocalChangeListener) -> SubscriptionId {
        let id = SubscriptionId::from_raw(self.next_subscription.fetch_add(1, Ordering::SeqCst));
        self.listeners.write().push((id, Arc::from(listener)));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(sub, _)| *sub != id);
        listeners.len() != before
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Uncommitted changes of one transaction, layered over the committed state.
struct MemoryEdit<'a> {
    committed: &'a State,
    synced_flag: &'a str,
    next_object: &'a AtomicU64,
    /// `None` marks a deletion.
    staged: BTreeMap<ObjectId, Option<LocalObject>>,
    inserted: BTreeSet<ObjectId>,
    flag_written: BTreeSet<ObjectId>,
}

impl MemoryEdit<'_> {
    fn current(&self, id: ObjectId) -> Option<LocalObject> {
        match self.staged.get(&id) {
            Some(staged) => staged.clone(),
            None => self.committed.objects.get(&id).cloned(),
        }
    }

    fn schema_of(&self, id: ObjectId) -> LocalStoreResult<&EntitySchema> {
        let entity = match self.staged.get(&id) {
            Some(Some(object)) => object.entity(),
            Some(None) => return Err(LocalStoreError::UnknownObject(id)),
            None => self
                .committed
                .objects
                .get(&id)
                .ok_or(LocalStoreError::UnknownObject(id))?
                .entity(),
        };
        self.committed
            .schemas
            .get(entity)
            .ok_or_else(|| LocalStoreError::UnknownEntity(entity.to_string()))
    }

    fn staged_mut(&mut self, id: ObjectId) -> LocalStoreResult<&mut LocalObject> {
        if !self.staged.contains_key(&id) {
            let object = self
                .committed
                .objects
                .get(&id)
                .cloned()
                .ok_or(LocalStoreError::UnknownObject(id))?;
            self.staged.insert(id, Some(object));
        }
        match self.staged.get_mut(&id) {
            Some(Some(object)) => Ok(object),
            _ => Err(LocalStoreError::UnknownObject(id)),
        }
    }

    fn into_changes(self) -> LocalChangeSet {
        let mut changes = LocalChangeSet::default();

        for (id, staged) in self.staged {
            let inserted = self.inserted.contains(&id);
            match staged {
                Some(mut object) => {
                    if !inserted && self.committed.objects.get(&id) == Some(&object) {
                        continue;
                    }
                    let has_flag = self
                        .committed
                        .schemas
                        .get(object.entity())
                        .is_some_and(|s| s.attribute_type(self.synced_flag).is_some());
                    if has_flag && !self.flag_written.contains(&id) {
                        object.set_attribute(self.synced_flag, AttributeValue::Bool(false));
                    }
                    if inserted {
                        changes.inserted.push(object);
                    } else {
                        changes.updated.push(object);
                    }
                }
                None if !inserted => {
                    if let Some(previous) = self.committed.objects.get(&id) {
                        changes.deleted.push(previous.clone());
                    }
                }
                None => {}
            }
        }

        changes
    }
}

impl ObjectLookup for MemoryEdit<'_> {
    fn object(&self, id: ObjectId) -> Option<LocalObject> {
        self.current(id)
    }

    fn find_by_attribute(
        &self,
        entity: &str,
        attribute: &str,
        value: &AttributeValue,
    ) -> Option<LocalObject> {
        let matches = |o: &&LocalObject| o.entity() == entity && o.attribute(attribute) == value;

        self.staged
            .values()
            .flatten()
            .find(matches)
            .or_else(|| {
                self.committed
                    .objects
                    .values()
                    .filter(|o| !self.staged.contains_key(&o.id()))
                    .find(matches)
            })
            .cloned()
    }
}

impl LocalEdit for MemoryEdit<'_> {
    fn insert(&mut self, entity: &str) -> LocalStoreResult<ObjectId> {
        if !self.committed.schemas.contains_key(entity) {
            return Err(LocalStoreError::UnknownEntity(entity.to_string()));
        }
        let id = ObjectId::from_raw(self.next_object.fetch_add(1, Ordering::SeqCst));
        self.staged.insert(id, Some(LocalObject::new(id, entity)));
        self.inserted.insert(id);
        Ok(id)
    }

    fn set_attribute(
        &mut self,
        id: ObjectId,
        name: &str,
        value: AttributeValue,
    ) -> LocalStoreResult<()> {
        let schema = self.schema_of(id)?;
        let expected =
            schema
                .attribute_type(name)
                .ok_or_else(|| LocalStoreError::UnknownProperty {
                    entity: schema.name().to_string(),
                    property: name.to_string(),
                })?;
        if let Some(found) = value.attribute_type() {
            if found != expected {
                return Err(LocalStoreError::TypeMismatch {
                    entity: schema.name().to_string(),
                    attribute: name.to_string(),
                    expected,
                    found,
                });
            }
        }

        self.staged_mut(id)?.set_attribute(name, value);
        if name == self.synced_flag {
            self.flag_written.insert(id);
        }
        Ok(())
    }

    fn set_relationship(
        &mut self,
        id: ObjectId,
        name: &str,
        value: RelationshipValue,
    ) -> LocalStoreResult<()> {
        let schema = self.schema_of(id)?;
        let descriptor =
            schema
                .relationship(name)
                .ok_or_else(|| LocalStoreError::UnknownProperty {
                    entity: schema.name().to_string(),
                    property: name.to_string(),
                })?;

        let cardinality_matches = matches!(
            (&value, descriptor.cardinality),
            (RelationshipValue::ToOne(_), Cardinality::ToOne)
                | (RelationshipValue::ToMany(_), Cardinality::ToMany)
        );
        if !cardinality_matches {
            return Err(LocalStoreError::UnknownProperty {
                entity: schema.name().to_string(),
                property: name.to_string(),
            });
        }

        for target in value.targets() {
            match self.current(target) {
                Some(related) if related.entity() == descriptor.destination => {}
                _ => return Err(LocalStoreError::UnknownObject(target)),
            }
        }

        self.staged_mut(id)?.set_relationship(name, value);
        Ok(())
    }

    fn delete(&mut self, id: ObjectId) -> LocalStoreResult<()> {
        if self.current(id).is_none() {
            return Err(LocalStoreError::UnknownObject(id));
        }
        self.staged.insert(id, None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objsync_model::AttributeType;

    fn store() -> MemoryLocalStore {
        MemoryLocalStore::new()
            .with_entity(
                EntitySchema::new("Task")
                    .with_attribute("syncID", AttributeType::String)
                    .with_attribute("isSynced", AttributeType::Boolean)
                    .with_attribute("title", AttributeType::String)
                    .with_to_one("project", "Project"),
            )
            .with_entity(
                EntitySchema::new("Project")
                    .with_attribute("syncID", AttributeType::String)
                    .with_attribute("name", AttributeType::String),
            )
    }

    fn recorder(store: &MemoryLocalStore) -> Arc<Mutex<Vec<LocalChangeSet>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        store.subscribe(Box::new(move |changes: &LocalChangeSet| {
            sink.lock().push(changes.clone());
        }));
        seen
    }

    #[test]
    fn insert_and_notify() {
        let store = store();
        let seen = recorder(&store);

        let id = store
            .insert_object("Task", [("title", "Buy milk".into())])
            .unwrap();

        let object = store.object(id).unwrap();
        assert_eq!(object.attribute("title").as_text(), Some("Buy milk"));
        assert_eq!(object.attribute("isSynced").as_bool(), Some(false));

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].inserted.len(), 1);
        assert!(seen[0].updated.is_empty());
    }

    #[test]
    fn failed_closure_commits_nothing() {
        let store = store();
        let seen = recorder(&store);

        let result: LocalStoreResult<()> = store.transaction(|edit| {
            let id = edit.insert("Task")?;
            edit.set_attribute(id, "title", "x".into())?;
            Err(LocalStoreError::Aborted("changed my mind".into()))
        });

        assert!(result.is_err());
        assert_eq!(store.count("Task"), 0);
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn type_mismatch_rejected() {
        let store = store();
        let err = store
            .insert_object("Task", [("title", AttributeValue::Integer(3))])
            .unwrap_err();
        assert!(matches!(err, LocalStoreError::TypeMismatch { .. }));
    }

    #[test]
    fn user_edit_clears_synced_flag() {
        let store = store();
        let id = store.insert_object("Task", [("title", "a".into())]).unwrap();

        store
            .update_object(id, [("isSynced", true.into())])
            .unwrap();
        assert_eq!(store.object(id).unwrap().attribute("isSynced").as_bool(), Some(true));

        store.update_object(id, [("title", "b".into())]).unwrap();
        assert_eq!(store.object(id).unwrap().attribute("isSynced").as_bool(), Some(false));
    }

    #[test]
    fn unchanged_update_is_not_reported() {
        let store = store();
        let id = store.insert_object("Task", [("title", "a".into())]).unwrap();
        let seen = recorder(&store);

        store.update_object(id, [("title", "a".into())]).unwrap();
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn delete_reports_last_state() {
        let store = store();
        let id = store
            .insert_object("Task", [("syncID", "abc".into())])
            .unwrap();
        let seen = recorder(&store);

        store.delete_object(id).unwrap();

        assert!(store.object(id).is_none());
        let seen = seen.lock();
        assert_eq!(seen[0].deleted[0].attribute("syncID").as_text(), Some("abc"));
    }

    #[test]
    fn validation_rule_blocks_commit() {
        let store = store();
        store.add_validation_rule("Task", "title", |v| match v.as_text() {
            Some(t) if t.len() > 5 => Err("title too long".into()),
            _ => Ok(()),
        });

        let err = store
            .insert_object("Task", [("title", "far too long".into())])
            .unwrap_err();
        let failures = err.validation_failures().unwrap();
        assert_eq!(failures[0].attribute.as_deref(), Some("title"));
        assert_eq!(store.count("Task"), 0);
    }

    #[test]
    fn find_by_attribute_sees_staged_objects() {
        let store = store();
        store
            .transaction(|edit| {
                let id = edit.insert("Project")?;
                edit.set_attribute(id, "syncID", "p1".into())?;
                let found = edit
                    .find_by_attribute("Project", "syncID", &"p1".into())
                    .map(|o| o.id());
                assert_eq!(found, Some(id));
                Ok(())
            })
            .unwrap();

        assert!(store
            .find_by_attribute("Project", "syncID", &"p1".into())
            .is_some());
    }

    #[test]
    fn relationship_targets_must_exist_with_matching_entity() {
        let store = store();
        let task = store.insert_object("Task", []).unwrap();
        let project = store.insert_object("Project", []).unwrap();

        store
            .relate(task, "project", RelationshipValue::ToOne(Some(project)))
            .unwrap();
        assert_eq!(
            store.object(task).unwrap().relationship("project"),
            Some(&RelationshipValue::ToOne(Some(project)))
        );

        let err = store
            .relate(task, "project", RelationshipValue::ToOne(Some(task)))
            .unwrap_err();
        assert_eq!(err, LocalStoreError::UnknownObject(task));
    }

    #[test]
    fn closed_store_rejects_transactions() {
        let store = store();
        store.close();
        assert_eq!(
            store.insert_object("Task", []).unwrap_err(),
            LocalStoreError::Closed
        );
    }

    #[test]
    fn unsubscribe_stops_notifications() {
        let store = store();
        let count = Arc::new(AtomicU64::new(0));
        let c = Arc::clone(&count);
        let sub = store.subscribe(Box::new(move |_: &LocalChangeSet| {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        store.insert_object("Task", []).unwrap();
        assert!(store.unsubscribe(sub));
        assert!(!store.unsubscribe(sub));
        store.insert_object("Task", []).unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(store.subscriber_count(), 0);
    }
}
