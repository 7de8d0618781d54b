//! Remote changes to local edits.

use crate::config::SyncConfig;
use crate::delegate::{SyncDelegate, ValidationContext};
use crate::error::SyncResult;
use crate::identity::IdentityResolver;
use crate::mapper::{
    encode_attribute, AttributeMapper, DecodedRecord, DecodedRelationship, RelationshipTargets,
};
use crate::registry::{EntityMapping, EntityTableRegistry};
use objsync_model::{AttributeValue, RemoteEvent, RemoteEventKind, RemotePath, SyncId};
use objsync_store::{
    LocalEdit, LocalObject, LocalStore, LocalStoreError, LocalStoreResult, ObjectId,
    RelationshipValue, ValidationFailure,
};
use std::collections::{BTreeMap, BTreeSet};

/// What happened to one remote change.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundOutcome {
    /// The table is not registered.
    Ignored,
    /// The record was written to a local object.
    Applied {
        /// The object as committed.
        object: LocalObject,
        /// Whether the object was created.
        created: bool,
    },
    /// The local object already matched the record.
    Unchanged,
    /// The local object of a removed record was deleted.
    Deleted {
        /// The object's last state.
        object: LocalObject,
        /// Path of the removed record.
        path: RemotePath,
    },
    /// A removed record had no local object.
    Missing,
    /// The record was not applied: the delegate declined it or it failed
    /// validation.
    Dropped,
}

/// Result of applying one remote change.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundReport {
    /// What happened.
    pub outcome: InboundOutcome,
    /// Fields skipped because of a type mismatch.
    pub invalid_attributes: usize,
    /// Fields skipped because they failed local validation.
    pub skipped_fields: Vec<String>,
    /// Whether the record was given up after failing validation.
    pub validation_failed: bool,
}

impl InboundReport {
    fn new(outcome: InboundOutcome) -> Self {
        Self {
            outcome,
            invalid_attributes: 0,
            skipped_fields: Vec::new(),
            validation_failed: false,
        }
    }

    /// Returns true if the local store was modified.
    pub fn changed_local_store(&self) -> bool {
        matches!(
            self.outcome,
            InboundOutcome::Applied { .. } | InboundOutcome::Deleted { .. }
        )
    }
}

/// State recorded while staging one attempt.
#[derive(Debug, Default)]
struct StagedApply {
    target: Option<ObjectId>,
    created: bool,
    unchanged: bool,
    declined: bool,
    /// Placeholder objects and the relationship field that created them.
    placeholders: BTreeMap<ObjectId, String>,
    snapshot: Option<LocalObject>,
}

/// Applies remote change events to the local store.
pub struct InboundPropagator<'a, L> {
    local: &'a L,
    registry: &'a EntityTableRegistry,
    config: &'a SyncConfig,
    delegate: &'a dyn SyncDelegate,
}

impl<'a, L: LocalStore> InboundPropagator<'a, L> {
    /// Creates a propagator over one snapshot of the engine's state.
    pub fn new(
        local: &'a L,
        registry: &'a EntityTableRegistry,
        config: &'a SyncConfig,
        delegate: &'a dyn SyncDelegate,
    ) -> Self {
        Self {
            local,
            registry,
            config,
            delegate,
        }
    }

    /// Applies one remote change.
    ///
    /// Added and modified records are written to the object carrying their
    /// identifier, created if needed, with the synced flag set in the same
    /// transaction. Removed records delete their local object.
    ///
    /// # Errors
    ///
    /// Returns an error only for store failures other than validation.
    pub fn apply(&self, event: &RemoteEvent) -> SyncResult<InboundReport> {
        let Some(mapping) = self.registry.mapping_for_table(&event.table) else {
            tracing::debug!(table = %event.table, "ignoring change from unregistered table");
            return Ok(InboundReport::new(InboundOutcome::Ignored));
        };

        match event.kind {
            RemoteEventKind::Removed => self.remove(mapping, event),
            RemoteEventKind::Added | RemoteEventKind::Modified => self.upsert(mapping, event),
        }
    }

    fn remove(&self, mapping: &EntityMapping, event: &RemoteEvent) -> SyncResult<InboundReport> {
        let resolver = IdentityResolver::new(&self.config.sync_attribute);
        let id = resolver.identifier_of(&event.record);
        let Some(object) = resolver.local_object_for(self.local, &mapping.entity, id) else {
            tracing::debug!(table = %event.table, sync_id = %id, "removed record has no local object");
            return Ok(InboundReport::new(InboundOutcome::Missing));
        };

        match self.local.transaction(|edit| edit.delete(object.id())) {
            Ok(()) => {}
            Err(LocalStoreError::UnknownObject(_)) => {
                return Ok(InboundReport::new(InboundOutcome::Missing))
            }
            Err(error) => return Err(error.into()),
        }

        tracing::debug!(table = %event.table, sync_id = %id, "deleted local object");
        Ok(InboundReport::new(InboundOutcome::Deleted {
            object,
            path: RemotePath::new(mapping.table.as_str(), id.clone()),
        }))
    }

    fn upsert(&self, mapping: &EntityMapping, event: &RemoteEvent) -> SyncResult<InboundReport> {
        let record = &event.record;
        let decoded = AttributeMapper::new(&mapping.schema, self.config).from_remote_fields(record);
        let mut skipped: BTreeSet<String> = BTreeSet::new();

        let staged = loop {
            let mut staged = StagedApply::default();
            let result = self
                .local
                .transaction(|edit| self.stage(edit, mapping, record.id(), &decoded, &skipped, &mut staged));

            match result {
                Ok(()) => break staged,
                Err(LocalStoreError::Aborted(_)) if staged.declined => {
                    tracing::debug!(table = %event.table, sync_id = %record.id(), "delegate declined new record");
                    return Ok(InboundReport::new(InboundOutcome::Dropped));
                }
                Err(LocalStoreError::Aborted(_)) if staged.unchanged => {
                    let mut report = InboundReport::new(InboundOutcome::Unchanged);
                    report.invalid_attributes = self.report_invalid(&decoded, staged.snapshot.as_ref());
                    report.skipped_fields = skipped.into_iter().collect();
                    return Ok(report);
                }
                Err(LocalStoreError::Validation(failures)) => {
                    let fields = fields_to_skip(&failures, &staged, &decoded, &skipped);
                    if fields.is_empty() {
                        return Ok(self.give_up(event, &decoded, staged, skipped, failures));
                    }
                    tracing::debug!(
                        table = %event.table,
                        sync_id = %record.id(),
                        ?fields,
                        "retrying record without fields that failed validation"
                    );
                    skipped.extend(fields);
                }
                Err(error) => return Err(error.into()),
            }
        };

        let committed = staged
            .target
            .and_then(|id| self.local.object(id))
            .or(staged.snapshot);
        let Some(object) = committed else {
            return Ok(InboundReport::new(InboundOutcome::Missing));
        };

        if !skipped.is_empty() {
            tracing::warn!(
                table = %event.table,
                sync_id = %record.id(),
                fields = ?skipped,
                "applied record without fields that failed validation"
            );
        }

        let invalid_attributes = self.report_invalid(&decoded, Some(&object));
        self.delegate.synced_from_remote(&object);
        tracing::trace!(table = %event.table, sync_id = %record.id(), created = staged.created, "applied remote record");

        Ok(InboundReport {
            outcome: InboundOutcome::Applied {
                object,
                created: staged.created,
            },
            invalid_attributes,
            skipped_fields: skipped.into_iter().collect(),
            validation_failed: false,
        })
    }

    /// Writes the decoded record into one transaction.
    fn stage(
        &self,
        edit: &mut dyn LocalEdit,
        mapping: &EntityMapping,
        sync_id: &SyncId,
        decoded: &DecodedRecord,
        skipped: &BTreeSet<String>,
        staged: &mut StagedApply,
    ) -> LocalStoreResult<()> {
        let resolver = IdentityResolver::new(&self.config.sync_attribute);
        let (id, created) = match resolver.local_object_for(&*edit, &mapping.entity, sync_id) {
            Some(existing) => (existing.id(), false),
            None => {
                let id = edit.insert(&mapping.entity)?;
                edit.set_attribute(
                    id,
                    &self.config.sync_attribute,
                    AttributeValue::Text(sync_id.as_str().to_string()),
                )?;
                (id, true)
            }
        };
        staged.target = Some(id);
        staged.created = created;

        let before = edit.object(id);

        for (name, value) in &decoded.attributes {
            if skipped.contains(name) {
                continue;
            }
            // Values the remote side cannot hold arrive as null.
            if value.is_null() {
                let kept = before.as_ref().map(|o| o.attribute(name));
                if kept.is_some_and(|v| !v.is_null() && encode_attribute(v).is_none()) {
                    continue;
                }
            }
            edit.set_attribute(id, name, value.clone())?;
        }

        for relationship in &decoded.relationships {
            if skipped.contains(&relationship.name) {
                continue;
            }
            let Some(value) = self.resolve_relationship(edit, relationship, staged)? else {
                continue;
            };
            let current = edit
                .object(id)
                .and_then(|o| o.relationship(&relationship.name).cloned());
            let value = match &current {
                Some(current) => self.keep_local_only_targets(&*edit, current, value),
                None => value,
            };
            let same = match &current {
                Some(current) => *current == value,
                None => value.is_empty(),
            };
            if !same {
                edit.set_relationship(id, &relationship.name, value)?;
            }
        }

        let after = edit.object(id);
        if !created && before == after {
            staged.unchanged = true;
            staged.snapshot = after;
            return Err(LocalStoreError::Aborted("record matches local state".into()));
        }

        if created {
            if let Some(object) = &after {
                if !self.delegate.is_record_syncable(object) {
                    staged.declined = true;
                    return Err(LocalStoreError::Aborted("record declined".into()));
                }
            }
        }

        if mapping.has_synced_flag(self.config) {
            edit.set_attribute(id, &self.config.synced_flag_attribute, AttributeValue::Bool(true))?;
        }
        staged.snapshot = edit.object(id);
        Ok(())
    }

    /// Adds the current targets that never reach the remote record to a
    /// resolved value: objects the delegate declines and objects without an
    /// identifier.
    fn keep_local_only_targets(
        &self,
        edit: &dyn LocalEdit,
        current: &RelationshipValue,
        value: RelationshipValue,
    ) -> RelationshipValue {
        let resolver = IdentityResolver::new(&self.config.sync_attribute);
        let local_only: Vec<ObjectId> = current
            .targets()
            .into_iter()
            .filter(|target| {
                edit.object(*target).is_some_and(|object| {
                    resolver.existing(&object).is_none() || !self.delegate.is_record_syncable(&object)
                })
            })
            .collect();
        if local_only.is_empty() {
            return value;
        }

        match value {
            RelationshipValue::ToOne(None) => RelationshipValue::ToOne(local_only.first().copied()),
            RelationshipValue::ToMany(mut targets) => {
                for target in local_only {
                    if !targets.contains(&target) {
                        targets.push(target);
                    }
                }
                RelationshipValue::ToMany(targets)
            }
            value @ RelationshipValue::ToOne(Some(_)) => value,
        }
    }

    /// Maps relationship targets to local objects, creating placeholders
    /// for identifiers not present locally. Returns `None` if the
    /// destination entity is not registered.
    fn resolve_relationship(
        &self,
        edit: &mut dyn LocalEdit,
        relationship: &DecodedRelationship,
        staged: &mut StagedApply,
    ) -> LocalStoreResult<Option<RelationshipValue>> {
        let Some(destination) = self.registry.mapping_for_entity(&relationship.destination) else {
            tracing::debug!(
                relationship = %relationship.name,
                destination = %relationship.destination,
                "skipping relationship to unregistered entity"
            );
            return Ok(None);
        };

        let value = match &relationship.targets {
            RelationshipTargets::ToOne(None) => RelationshipValue::ToOne(None),
            RelationshipTargets::ToOne(Some(id)) => RelationshipValue::ToOne(Some(
                self.resolve_target(edit, destination, &relationship.name, id, staged)?,
            )),
            RelationshipTargets::ToMany(ids) => {
                let mut targets = Vec::with_capacity(ids.len());
                for id in ids {
                    targets.push(self.resolve_target(edit, destination, &relationship.name, id, staged)?);
                }
                RelationshipValue::ToMany(targets)
            }
        };
        Ok(Some(value))
    }

    fn resolve_target(
        &self,
        edit: &mut dyn LocalEdit,
        destination: &EntityMapping,
        field: &str,
        id: &SyncId,
        staged: &mut StagedApply,
    ) -> LocalStoreResult<ObjectId> {
        let resolver = IdentityResolver::new(&self.config.sync_attribute);
        if let Some(existing) = resolver.local_object_for(&*edit, &destination.entity, id) {
            return Ok(existing.id());
        }

        let placeholder = edit.insert(&destination.entity)?;
        edit.set_attribute(
            placeholder,
            &self.config.sync_attribute,
            AttributeValue::Text(id.as_str().to_string()),
        )?;
        if destination.has_synced_flag(self.config) {
            edit.set_attribute(
                placeholder,
                &self.config.synced_flag_attribute,
                AttributeValue::Bool(true),
            )?;
        }
        staged.placeholders.insert(placeholder, field.to_string());
        tracing::trace!(entity = %destination.entity, sync_id = %id, "created placeholder");
        Ok(placeholder)
    }

    fn report_invalid(&self, decoded: &DecodedRecord, object: Option<&LocalObject>) -> usize {
        let Some(object) = object else {
            return 0;
        };
        for invalid in &decoded.invalid {
            tracing::warn!(
                entity = object.entity(),
                property = %invalid.property,
                expected = %invalid.expected,
                "skipping remote field of unexpected type"
            );
            self.delegate
                .invalid_attribute(object, &invalid.property, &invalid.value, invalid.expected);
        }
        decoded.invalid.len()
    }

    fn give_up(
        &self,
        event: &RemoteEvent,
        decoded: &DecodedRecord,
        staged: StagedApply,
        skipped: BTreeSet<String>,
        failures: Vec<ValidationFailure>,
    ) -> InboundReport {
        tracing::warn!(
            table = %event.table,
            sync_id = %event.record.id(),
            failures = failures.len(),
            "dropping record that failed validation"
        );

        let skipped_fields: Vec<String> = skipped.into_iter().collect();
        let invalid_attributes = self.report_invalid(decoded, staged.snapshot.as_ref());
        if let Some(object) = &staged.snapshot {
            let context = ValidationContext {
                table: event.table.clone(),
                sync_id: event.record.id().clone(),
                skipped_fields: skipped_fields.clone(),
            };
            self.delegate.insert_validation_failed(
                object,
                &LocalStoreError::Validation(failures),
                &context,
            );
        }

        InboundReport {
            outcome: InboundOutcome::Dropped,
            invalid_attributes,
            skipped_fields,
            validation_failed: true,
        }
    }
}

/// Picks the fields to leave out on the next attempt: attributes that
/// failed on the record's object, and relationships whose placeholders
/// failed. Only fields of the decoded record that are not yet skipped count.
fn fields_to_skip(
    failures: &[ValidationFailure],
    staged: &StagedApply,
    decoded: &DecodedRecord,
    skipped: &BTreeSet<String>,
) -> Vec<String> {
    let is_field = |name: &str| {
        decoded.attributes.iter().any(|(n, _)| n == name)
            || decoded.relationships.iter().any(|r| r.name == name)
    };

    let mut fields: Vec<String> = Vec::new();
    for failure in failures {
        let field = if staged.target == Some(failure.object) {
            failure.attribute.clone()
        } else {
            staged.placeholders.get(&failure.object).cloned()
        };
        if let Some(field) = field {
            if is_field(&field) && !skipped.contains(&field) && !fields.contains(&field) {
                fields.push(field);
            }
        }
    }
    fields
}
