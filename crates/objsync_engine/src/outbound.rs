//! Local changes to remote writes.

use crate::config::SyncConfig;
use crate::delegate::{SyncDelegate, ValidationContext, WriteFailure};
use crate::error::SyncResult;
use crate::identity::IdentityResolver;
use crate::mapper::AttributeMapper;
use crate::registry::EntityTableRegistry;
use objsync_model::{AttributeValue, ChangeBatch, RemotePath, RemoteWrite, SyncId};
use objsync_store::{
    LocalChangeSet, LocalObject, LocalStore, LocalStoreError, ObjectId, RemoteStore,
    RemoteStoreResult, ValidationFailure,
};
use std::collections::{BTreeMap, BTreeSet};

/// An object whose write was issued in a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct WrittenObject {
    /// Remote path of the write.
    pub path: RemotePath,
    /// The object after identifier assignment; the last known state for
    /// deletes.
    pub object: LocalObject,
    /// Whether the write is a delete.
    pub deleted: bool,
}

/// Outcome of one remote batch.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteReport {
    /// Index of the batch within its pass.
    pub batch: usize,
    /// Objects written by the batch, in write order.
    pub written: Vec<WrittenObject>,
    /// Result reported by the remote store.
    pub result: RemoteStoreResult<()>,
}

/// Counts of one outbound pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutboundSummary {
    /// Records written.
    pub sets: usize,
    /// Records deleted.
    pub deletes: usize,
    /// Batches issued.
    pub batches: usize,
    /// Changes skipped because their state came from the remote.
    pub echoes_suppressed: usize,
    /// Objects left out because the local store rejected their identifier.
    pub validation_failures: usize,
}

/// Counts of one acknowledged or failed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Acknowledgement {
    /// Records the remote store accepted.
    pub sets: usize,
    /// Deletes the remote store accepted.
    pub deletes: usize,
    /// Writes that failed.
    pub failures: usize,
}

/// Turns local change notifications into batched remote writes.
pub struct OutboundPropagator<'a, L, R> {
    local: &'a L,
    remote: &'a R,
    registry: &'a EntityTableRegistry,
    config: &'a SyncConfig,
    delegate: &'a dyn SyncDelegate,
}

impl<'a, L: LocalStore, R: RemoteStore> OutboundPropagator<'a, L, R> {
    /// Creates a propagator over one snapshot of the engine's state.
    pub fn new(
        local: &'a L,
        remote: &'a R,
        registry: &'a EntityTableRegistry,
        config: &'a SyncConfig,
        delegate: &'a dyn SyncDelegate,
    ) -> Self {
        Self {
            local,
            remote,
            registry,
            config,
            delegate,
        }
    }

    fn is_syncable(&self, object: &LocalObject) -> bool {
        self.registry.table_for(object.entity()).is_some() && self.delegate.is_record_syncable(object)
    }

    fn has_synced_flag(&self, entity: &str) -> bool {
        self.registry
            .mapping_for_entity(entity)
            .is_some_and(|m| m.has_synced_flag(self.config))
    }

    /// Propagates one change notification.
    ///
    /// Inserted and updated objects whose synced flag is set are skipped.
    /// Deletes whose path is in `suppressed_deletes` are skipped and the
    /// path is removed from the set. Each issued batch reports back through
    /// `on_complete`, which may run before this method returns.
    ///
    /// # Errors
    ///
    /// Returns an error if identifiers cannot be stored locally. Nothing is
    /// written remotely in that case.
    pub fn propagate<F>(
        &self,
        changes: &LocalChangeSet,
        suppressed_deletes: &mut BTreeSet<RemotePath>,
        on_complete: F,
    ) -> SyncResult<OutboundSummary>
    where
        F: Fn(WriteReport) + Clone + Send + 'static,
    {
        let mut summary = OutboundSummary::default();
        let resolver = IdentityResolver::new(&self.config.sync_attribute);
        let flag = self.config.synced_flag_attribute.as_str();

        let mut seen = BTreeSet::new();
        let mut candidates = Vec::new();
        for object in changes.inserted.iter().chain(&changes.updated) {
            if !seen.insert(object.id()) || !self.is_syncable(object) {
                continue;
            }
            if object.attribute(flag).as_bool() == Some(true) {
                tracing::trace!(object = %object.id(), "skipping state received from remote");
                summary.echoes_suppressed += 1;
                continue;
            }
            candidates.push(object.clone());
        }

        let mut deletes = Vec::new();
        for object in &changes.deleted {
            let Some(table) = self.registry.table_for(object.entity()) else {
                continue;
            };
            let Some(id) = resolver.existing(object) else {
                tracing::debug!(object = %object.id(), "deleted object was never synced");
                continue;
            };
            let path = RemotePath::new(table, id);
            if suppressed_deletes.remove(&path) {
                tracing::trace!(%path, "skipping delete received from remote");
                summary.echoes_suppressed += 1;
                continue;
            }
            if !self.delegate.is_record_syncable(object) {
                continue;
            }
            deletes.push(WrittenObject {
                path,
                object: object.clone(),
                deleted: true,
            });
        }

        if candidates.is_empty() && deletes.is_empty() {
            return Ok(summary);
        }

        let identifiers = self.assign_identifiers(&candidates, &mut summary)?;

        let mut entries: Vec<(RemoteWrite, WrittenObject)> = Vec::new();
        for object in &candidates {
            let Some(mapping) = self.registry.mapping_for_entity(object.entity()) else {
                continue;
            };
            let Some(id) = identifiers.get(&object.id()).cloned() else {
                tracing::debug!(object = %object.id(), "object has no identifier; not sent");
                continue;
            };

            let mapper = AttributeMapper::new(&mapping.schema, self.config);
            let record = mapper.to_remote_fields(object, id.clone(), |descriptor, target| {
                let resolved = identifiers.get(&target).cloned();
                if resolved.is_none() {
                    tracing::debug!(
                        object = %object.id(),
                        destination = %descriptor.destination,
                        related = %target,
                        "dropping reference to an object outside sync"
                    );
                }
                resolved
            });

            let bytes = record.encoded_len();
            if bytes > self.config.max_record_bytes {
                tracing::warn!(
                    object = %object.id(),
                    bytes,
                    limit = self.config.max_record_bytes,
                    "record exceeds the expected size"
                );
            }

            let path = RemotePath::new(mapping.table.as_str(), id);
            let snapshot = self
                .local
                .object(object.id())
                .unwrap_or_else(|| object.clone());
            entries.push((
                RemoteWrite::Set {
                    path: path.clone(),
                    record,
                },
                WrittenObject {
                    path,
                    object: snapshot,
                    deleted: false,
                },
            ));
        }

        summary.sets = entries.len();
        summary.deletes = deletes.len();
        for deleted in deletes {
            entries.push((
                RemoteWrite::Delete {
                    path: deleted.path.clone(),
                },
                deleted,
            ));
        }

        let (writes, written): (Vec<_>, Vec<_>) = entries.into_iter().unzip();
        let batches = ChangeBatch::partition(
            writes,
            self.config.batch_size,
            self.config.user_id.as_deref(),
        );
        let mut written = written.into_iter();

        for batch in batches {
            let objects: Vec<WrittenObject> = written.by_ref().take(batch.len()).collect();
            let index = batch.index;
            let bytes: usize = batch
                .writes
                .iter()
                .map(|write| match write {
                    RemoteWrite::Set { record, .. } => record.encoded_len(),
                    RemoteWrite::Delete { .. } => 0,
                })
                .sum();
            if bytes > self.config.max_batch_bytes {
                tracing::warn!(
                    batch = index,
                    bytes,
                    limit = self.config.max_batch_bytes,
                    "batch exceeds the remote payload ceiling"
                );
            }

            tracing::debug!(batch = index, writes = batch.len(), bytes, "issuing remote batch");
            let done = on_complete.clone();
            self.remote.write(
                batch,
                Box::new(move |result: RemoteStoreResult<()>| {
                    done(WriteReport {
                        batch: index,
                        written: objects,
                        result,
                    })
                }),
            );
            summary.batches += 1;
        }

        tracing::info!(
            sets = summary.sets,
            deletes = summary.deletes,
            batches = summary.batches,
            "propagated local changes"
        );
        Ok(summary)
    }

    /// Collects the identifiers of the candidates and of the registered
    /// objects they reference, generating missing ones in one transaction.
    ///
    /// Candidates that receive an identifier are marked synced in the same
    /// transaction, so the resulting notification is not sent again.
    /// Referenced objects keep an unwritten flag and go out on the next pass.
    ///
    /// Objects the local store rejects are reported to the delegate and left
    /// without an identifier; the transaction is retried for the others.
    fn assign_identifiers(
        &self,
        candidates: &[LocalObject],
        summary: &mut OutboundSummary,
    ) -> SyncResult<BTreeMap<ObjectId, SyncId>> {
        let resolver = IdentityResolver::new(&self.config.sync_attribute);
        let candidate_ids: BTreeSet<ObjectId> = candidates.iter().map(LocalObject::id).collect();

        let mut identifiers = BTreeMap::new();
        let mut unassigned = Vec::new();
        for object in candidates {
            match resolver.existing(object) {
                Some(id) => {
                    identifiers.insert(object.id(), id);
                }
                None => unassigned.push(object.id()),
            }
        }

        let mut visited = BTreeSet::new();
        let mut unassigned_related = Vec::new();
        for object in candidates {
            let Some(mapping) = self.registry.mapping_for_entity(object.entity()) else {
                continue;
            };
            for (name, descriptor) in mapping.schema.relationships() {
                if self.registry.table_for(&descriptor.destination).is_none() {
                    continue;
                }
                let Some(value) = object.relationship(name) else {
                    continue;
                };
                for target in value.targets() {
                    if candidate_ids.contains(&target) || !visited.insert(target) {
                        continue;
                    }
                    let Some(related) = self.local.object(target) else {
                        continue;
                    };
                    if !self.delegate.is_record_syncable(&related) {
                        continue;
                    }
                    match resolver.existing(&related) {
                        Some(id) => {
                            identifiers.insert(target, id);
                        }
                        None => unassigned_related.push(target),
                    }
                }
            }
        }

        // Generated up front so a rejected object is reported with the
        // identifier it was refused.
        let mut pending: BTreeMap<ObjectId, (SyncId, bool)> = unassigned
            .into_iter()
            .map(|id| (id, (SyncId::generate(), true)))
            .chain(
                unassigned_related
                    .into_iter()
                    .map(|id| (id, (SyncId::generate(), false))),
            )
            .collect();
        let mut rejected: Vec<(ObjectId, SyncId, Vec<ValidationFailure>)> = Vec::new();
        let flag = self.config.synced_flag_attribute.as_str();

        let assigned = loop {
            if pending.is_empty() {
                break Vec::new();
            }
            let result = self.local.transaction(|edit| {
                let mut assigned = Vec::new();
                for (&id, (sync_id, mark_synced)) in &pending {
                    let Some(current) = edit.object(id) else {
                        continue;
                    };
                    resolver.assign(edit, id, sync_id)?;
                    if *mark_synced && self.has_synced_flag(current.entity()) {
                        edit.set_attribute(id, flag, AttributeValue::Bool(true))?;
                    }
                    assigned.push((id, sync_id.clone()));
                }
                Ok(assigned)
            });

            match result {
                Ok(assigned) => break assigned,
                Err(LocalStoreError::Validation(failures)) => {
                    let named: BTreeSet<ObjectId> = failures
                        .iter()
                        .map(|failure| failure.object)
                        .filter(|id| pending.contains_key(id))
                        .collect();
                    if named.is_empty() {
                        return Err(LocalStoreError::Validation(failures).into());
                    }
                    for id in named {
                        if let Some((sync_id, _)) = pending.remove(&id) {
                            let own = failures.iter().filter(|f| f.object == id).cloned().collect();
                            rejected.push((id, sync_id, own));
                        }
                    }
                }
                Err(error) => return Err(error.into()),
            }
        };

        for (id, sync_id, failures) in rejected {
            summary.validation_failures += 1;
            tracing::warn!(object = %id, %sync_id, "local store rejected sync identifier");
            let Some(object) = self.local.object(id) else {
                continue;
            };
            let context = ValidationContext {
                table: self
                    .registry
                    .table_for(object.entity())
                    .unwrap_or_default()
                    .to_string(),
                sync_id,
                skipped_fields: Vec::new(),
            };
            self.delegate.insert_validation_failed(
                &object,
                &LocalStoreError::Validation(failures),
                &context,
            );
        }

        if !assigned.is_empty() {
            tracing::debug!(count = assigned.len(), "assigned sync identifiers");
        }
        identifiers.extend(assigned);
        Ok(identifiers)
    }
}

/// Reports the outcome of a batch to the delegate.
///
/// On failure, objects whose path the error names are reported one by one;
/// the rest of the batch is reported as a whole.
pub fn acknowledge(report: &WriteReport, delegate: &dyn SyncDelegate) -> Acknowledgement {
    let mut ack = Acknowledgement::default();

    match &report.result {
        Ok(()) => {
            for written in &report.written {
                if written.deleted {
                    ack.deletes += 1;
                } else {
                    ack.sets += 1;
                    delegate.synced_to_remote(&written.object);
                }
            }
        }
        Err(error) => {
            tracing::warn!(batch = report.batch, %error, writes = report.written.len(), "remote batch failed");
            let named = error.paths();
            let mut unattributed = Vec::new();
            for written in &report.written {
                if named.contains(&written.path) {
                    delegate.remote_write_failed(&WriteFailure {
                        batch: report.batch,
                        path: written.path.clone(),
                        object: written.object.clone(),
                        deleted: written.deleted,
                        error: error.clone(),
                    });
                } else {
                    unattributed.push(written.path.clone());
                }
            }
            if !unattributed.is_empty() {
                delegate.batch_write_failed(report.batch, &unattributed, error);
            }
            ack.failures = report.written.len();
        }
    }

    ack
}
