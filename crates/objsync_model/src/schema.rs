//! Per-entity schema descriptors.
//!
//! A schema descriptor is built once, when an entity is registered for sync,
//! and consulted by the attribute mapper instead of introspecting objects at
//! runtime.

use crate::value::AttributeType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Cardinality of a relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    /// At most one related object.
    ToOne,
    /// Any number of related objects.
    ToMany,
}

/// A relationship declared on an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipDescriptor {
    /// Entity name of the related objects.
    pub destination: String,
    /// Cardinality of the relationship.
    pub cardinality: Cardinality,
}

/// Schema of a local entity type: its attributes and relationships.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySchema {
    name: String,
    #[serde(default)]
    attributes: BTreeMap<String, AttributeType>,
    #[serde(default)]
    relationships: BTreeMap<String, RelationshipDescriptor>,
}

impl EntitySchema {
    /// Creates an empty schema for the named entity.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: BTreeMap::new(),
            relationships: BTreeMap::new(),
        }
    }

    /// Declares an attribute.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, ty: AttributeType) -> Self {
        self.attributes.insert(name.into(), ty);
        self
    }

    /// Declares a to-one relationship.
    #[must_use]
    pub fn with_to_one(self, name: impl Into<String>, destination: impl Into<String>) -> Self {
        self.with_relationship(name, destination, Cardinality::ToOne)
    }

    /// Declares a to-many relationship.
    #[must_use]
    pub fn with_to_many(self, name: impl Into<String>, destination: impl Into<String>) -> Self {
        self.with_relationship(name, destination, Cardinality::ToMany)
    }

    fn with_relationship(
        mut self,
        name: impl Into<String>,
        destination: impl Into<String>,
        cardinality: Cardinality,
    ) -> Self {
        self.relationships.insert(
            name.into(),
            RelationshipDescriptor {
                destination: destination.into(),
                cardinality,
            },
        );
        self
    }

    /// Returns the entity name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the declared type of an attribute.
    #[must_use]
    pub fn attribute_type(&self, name: &str) -> Option<AttributeType> {
        self.attributes.get(name).copied()
    }

    /// Returns the relationship declared under `name`.
    #[must_use]
    pub fn relationship(&self, name: &str) -> Option<&RelationshipDescriptor> {
        self.relationships.get(name)
    }

    /// Iterates attributes in name order.
    pub fn attributes(&self) -> impl Iterator<Item = (&str, AttributeType)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Iterates relationships in name order.
    pub fn relationships(&self) -> impl Iterator<Item = (&str, &RelationshipDescriptor)> {
        self.relationships.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Returns true if `name` is a declared attribute or relationship.
    #[must_use]
    pub fn has_property(&self, name: &str) -> bool {
        self.attributes.contains_key(name) || self.relationships.contains_key(name)
    }
}
