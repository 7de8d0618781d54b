//! Local objects and change notifications.

use objsync_model::AttributeValue;
use std::collections::BTreeMap;
use std::fmt;

static NULL: AttributeValue = AttributeValue::Null;

/// Identity of an object within the local store.
///
/// This is the store's own identity, not the sync identifier; it is only
/// meaningful inside one store instance.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(u64);

impl ObjectId {
    /// Creates an object ID from its raw value.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj#{}", self.0)
    }
}

/// Handle returned by change subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Creates a subscription ID from its raw value.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

/// Value of a relationship on a local object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationshipValue {
    /// To-one relationship.
    ToOne(Option<ObjectId>),
    /// To-many relationship.
    ToMany(Vec<ObjectId>),
}

impl RelationshipValue {
    /// Returns the related object IDs.
    #[must_use]
    pub fn targets(&self) -> Vec<ObjectId> {
        match self {
            RelationshipValue::ToOne(target) => target.iter().copied().collect(),
            RelationshipValue::ToMany(targets) => targets.clone(),
        }
    }

    /// Returns true if nothing is related.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            RelationshipValue::ToOne(target) => target.is_none(),
            RelationshipValue::ToMany(targets) => targets.is_empty(),
        }
    }
}

/// Snapshot of a local object: its entity, attributes and relationships.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalObject {
    id: ObjectId,
    entity: String,
    attributes: BTreeMap<String, AttributeValue>,
    relationships: BTreeMap<String, RelationshipValue>,
}

impl LocalObject {
    /// Creates an object snapshot without properties.
    pub fn new(id: ObjectId, entity: impl Into<String>) -> Self {
        Self {
            id,
            entity: entity.into(),
            attributes: BTreeMap::new(),
            relationships: BTreeMap::new(),
        }
    }

    /// Adds an attribute value.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.set_attribute(name, value.into());
        self
    }

    /// Adds a relationship value.
    #[must_use]
    pub fn with_relationship(mut self, name: impl Into<String>, value: RelationshipValue) -> Self {
        self.relationships.insert(name.into(), value);
        self
    }

    /// Returns the store identity.
    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Returns the entity name.
    #[must_use]
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Returns an attribute value; unset attributes read as `Null`.
    #[must_use]
    pub fn attribute(&self, name: &str) -> &AttributeValue {
        self.attributes.get(name).unwrap_or(&NULL)
    }

    /// Iterates set attributes in name order.
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Returns a relationship value.
    #[must_use]
    pub fn relationship(&self, name: &str) -> Option<&RelationshipValue> {
        self.relationships.get(name)
    }

    /// Iterates set relationships in name order.
    pub fn relationships(&self) -> impl Iterator<Item = (&str, &RelationshipValue)> {
        self.relationships.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Sets an attribute. Setting `Null` removes it.
    pub fn set_attribute(&mut self, name: impl Into<String>, value: AttributeValue) {
        let name = name.into();
        if value.is_null() {
            self.attributes.remove(&name);
        } else {
            self.attributes.insert(name, value);
        }
    }

    /// Sets a relationship.
    pub fn set_relationship(&mut self, name: impl Into<String>, value: RelationshipValue) {
        self.relationships.insert(name.into(), value);
    }
}

/// The objects inserted, updated and deleted by one committed transaction.
///
/// Deleted objects carry their last committed state so that their sync
/// identifier can still be read while the notification is handled.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalChangeSet {
    /// Objects created by the transaction.
    pub inserted: Vec<LocalObject>,
    /// Objects changed by the transaction.
    pub updated: Vec<LocalObject>,
    /// Objects removed by the transaction.
    pub deleted: Vec<LocalObject>,
}

impl LocalChangeSet {
    /// Returns true if the transaction changed nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    /// Total number of changed objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inserted.len() + self.updated.len() + self.deleted.len()
    }
}

/// A single validation problem reported by the local store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    /// Object that failed validation.
    pub object: ObjectId,
    /// Offending attribute, when the failure is attributable to one.
    pub attribute: Option<String>,
    /// Human readable reason.
    pub message: String,
}

impl ValidationFailure {
    /// Creates a validation failure.
    pub fn new(object: ObjectId, attribute: Option<String>, message: impl Into<String>) -> Self {
        Self {
            object,
            attribute,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_attributes_read_as_null() {
        let object = LocalObject::new(ObjectId::from_raw(1), "Task").with_attribute("title", "a");
        assert_eq!(object.attribute("title").as_text(), Some("a"));
        assert!(object.attribute("missing").is_null());
    }

    #[test]
    fn setting_null_removes_attribute() {
        let mut object = LocalObject::new(ObjectId::from_raw(1), "Task").with_attribute("title", "a");
        object.set_attribute("title", AttributeValue::Null);
        assert_eq!(object.attributes().count(), 0);
    }

    #[test]
    fn relationship_targets() {
        let one = RelationshipValue::ToOne(Some(ObjectId::from_raw(7)));
        assert_eq!(one.targets(), vec![ObjectId::from_raw(7)]);
        assert!(RelationshipValue::ToOne(None).is_empty());
        assert!(RelationshipValue::ToMany(Vec::new()).is_empty());
    }

    #[test]
    fn change_set_len() {
        let mut changes = LocalChangeSet::default();
        assert!(changes.is_empty());
        changes
            .deleted
            .push(LocalObject::new(ObjectId::from_raw(2), "Task"));
        assert_eq!(changes.len(), 1);
    }
}
