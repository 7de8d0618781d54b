//! Entity ↔ table registry.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use objsync_model::{AttributeType, EntitySchema};
use objsync_store::LocalStore;
use std::collections::BTreeMap;

/// One registered entity/table pair with the entity's schema.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityMapping {
    /// Local entity name.
    pub entity: String,
    /// Remote table name.
    pub table: String,
    /// Schema of the entity at registration time.
    pub schema: EntitySchema,
}

impl EntityMapping {
    /// Creates a mapping.
    pub fn new(entity: impl Into<String>, table: impl Into<String>, schema: EntitySchema) -> Self {
        Self {
            entity: entity.into(),
            table: table.into(),
            schema,
        }
    }

    /// Returns true if the entity declares the synced-flag attribute.
    pub fn has_synced_flag(&self, config: &SyncConfig) -> bool {
        self.schema
            .attribute_type(&config.synced_flag_attribute)
            .is_some()
    }
}

/// A one-to-one mapping between local entities and remote tables.
///
/// Registering a pair displaces any existing pair that shares either side,
/// so lookups in both directions stay consistent.
#[derive(Debug, Clone, Default)]
pub struct EntityTableRegistry {
    by_entity: BTreeMap<String, EntityMapping>,
    entity_by_table: BTreeMap<String, String>,
}

impl EntityTableRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pair and returns the pairs it displaced.
    pub fn insert(&mut self, mapping: EntityMapping) -> Vec<EntityMapping> {
        let mut displaced = Vec::new();
        if let Some(previous) = self.remove_entity(&mapping.entity) {
            displaced.push(previous);
        }
        if let Some(other) = self.entity_by_table.get(&mapping.table).cloned() {
            if let Some(previous) = self.remove_entity(&other) {
                displaced.push(previous);
            }
        }

        self.entity_by_table
            .insert(mapping.table.clone(), mapping.entity.clone());
        self.by_entity.insert(mapping.entity.clone(), mapping);
        displaced
    }

    /// Removes the pair of an entity.
    pub fn remove_entity(&mut self, entity: &str) -> Option<EntityMapping> {
        let mapping = self.by_entity.remove(entity)?;
        self.entity_by_table.remove(&mapping.table);
        Some(mapping)
    }

    /// Returns the table of an entity.
    pub fn table_for(&self, entity: &str) -> Option<&str> {
        self.by_entity.get(entity).map(|m| m.table.as_str())
    }

    /// Returns the entity of a table.
    pub fn entity_for(&self, table: &str) -> Option<&str> {
        self.entity_by_table.get(table).map(String::as_str)
    }

    /// Returns the mapping of an entity.
    pub fn mapping_for_entity(&self, entity: &str) -> Option<&EntityMapping> {
        self.by_entity.get(entity)
    }

    /// Returns the mapping of a table.
    pub fn mapping_for_table(&self, table: &str) -> Option<&EntityMapping> {
        self.entity_for(table)
            .and_then(|entity| self.by_entity.get(entity))
    }

    /// Registered table names, sorted.
    pub fn table_ids(&self) -> Vec<String> {
        self.entity_by_table.keys().cloned().collect()
    }

    /// Registered entity names, sorted.
    pub fn entity_names(&self) -> Vec<String> {
        self.by_entity.keys().cloned().collect()
    }

    /// All pairs keyed by entity name.
    pub fn tables_by_entity_name(&self) -> BTreeMap<String, String> {
        self.by_entity
            .iter()
            .map(|(entity, m)| (entity.clone(), m.table.clone()))
            .collect()
    }

    /// Number of registered pairs.
    pub fn len(&self) -> usize {
        self.by_entity.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.by_entity.is_empty()
    }
}

/// Looks up and checks an entity before it is registered.
///
/// The entity must exist and declare the sync attribute as a string. The
/// synced flag is optional, but when declared it must be a boolean.
///
/// # Errors
///
/// Returns a configuration error describing the first problem found.
pub fn describe_entity<L: LocalStore>(
    store: &L,
    entity: &str,
    config: &SyncConfig,
) -> SyncResult<EntitySchema> {
    let schema = store
        .entity_schema(entity)
        .ok_or_else(|| SyncError::UnknownEntity(entity.to_string()))?;

    match schema.attribute_type(&config.sync_attribute) {
        Some(AttributeType::String) => {}
        Some(found) => {
            return Err(SyncError::InvalidSyncAttribute {
                entity: entity.to_string(),
                attribute: config.sync_attribute.clone(),
                found,
            })
        }
        None => {
            return Err(SyncError::MissingSyncAttribute {
                entity: entity.to_string(),
                attribute: config.sync_attribute.clone(),
            })
        }
    }

    match schema.attribute_type(&config.synced_flag_attribute) {
        Some(AttributeType::Boolean) => {}
        Some(found) => {
            return Err(SyncError::InvalidSyncedFlag {
                entity: entity.to_string(),
                attribute: config.synced_flag_attribute.clone(),
                found,
            })
        }
        None => tracing::warn!(
            entity,
            attribute = %config.synced_flag_attribute,
            "entity has no synced flag; inbound changes to it will be sent back"
        ),
    }

    Ok(schema)
}
