//! The sync manager.

use crate::config::SyncConfig;
use crate::delegate::{NoopDelegate, SyncDelegate};
use crate::dispatch::{self, Dispatcher, EngineEvent};
use crate::error::{SyncError, SyncResult};
use crate::inbound::{InboundOutcome, InboundPropagator};
use crate::outbound::{self, OutboundPropagator, WriteReport};
use crate::registry::{describe_entity, EntityMapping, EntityTableRegistry};
use crate::state::{EventFeed, SyncEvent, SyncStats, SyncStatus};
use chrono::Utc;
use objsync_model::{RemoteEvent, RemotePath, SyncId};
use objsync_store::{LocalChangeSet, LocalStore, RemoteStore, SubscriptionId};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// State shared between the manager and its dispatcher thread.
///
/// Configuration, registry and delegate are replaced wholesale on change;
/// the dispatcher takes a snapshot of each per event.
struct Shared<L, R> {
    local: Arc<L>,
    remote: Arc<R>,
    config: RwLock<Arc<SyncConfig>>,
    registry: RwLock<Arc<EntityTableRegistry>>,
    delegate: RwLock<Arc<dyn SyncDelegate>>,
    stats: RwLock<SyncStats>,
    events: EventFeed,
}

impl<L: LocalStore, R: RemoteStore> Shared<L, R> {
    fn config(&self) -> Arc<SyncConfig> {
        self.config.read().clone()
    }

    fn registry(&self) -> Arc<EntityTableRegistry> {
        self.registry.read().clone()
    }

    fn delegate(&self) -> Arc<dyn SyncDelegate> {
        self.delegate.read().clone()
    }

    fn record_error(&self, error: &dyn std::fmt::Display) {
        self.stats.write().last_error = Some(error.to_string());
    }

    fn handle(
        &self,
        event: EngineEvent,
        dispatcher: &Dispatcher,
        suppressed_deletes: &mut BTreeSet<RemotePath>,
    ) {
        match event {
            EngineEvent::Local(changes) => {
                self.handle_local(&changes, dispatcher, suppressed_deletes)
            }
            EngineEvent::Remote(event) => self.handle_remote(&event, suppressed_deletes),
            EngineEvent::WriteCompleted(report) => self.handle_report(&report),
            EngineEvent::Shutdown => {}
        }
    }

    fn handle_local(
        &self,
        changes: &LocalChangeSet,
        dispatcher: &Dispatcher,
        suppressed_deletes: &mut BTreeSet<RemotePath>,
    ) {
        let registry = self.registry();
        let config = self.config();
        let delegate = self.delegate();
        let propagator = OutboundPropagator::new(
            &*self.local,
            &*self.remote,
            &registry,
            &config,
            delegate.as_ref(),
        );

        let completions = dispatcher.clone();
        let result = propagator.propagate(changes, suppressed_deletes, move |report: WriteReport| {
            completions.dispatch(EngineEvent::WriteCompleted(report))
        });

        match result {
            Ok(summary) => {
                let mut stats = self.stats.write();
                stats.batches_issued += summary.batches as u64;
                stats.echoes_suppressed += summary.echoes_suppressed as u64;
                stats.validation_failures += summary.validation_failures as u64;
            }
            Err(error) => {
                tracing::warn!(%error, "outbound propagation failed");
                self.record_error(&error);
            }
        }
    }

    fn handle_remote(&self, event: &RemoteEvent, suppressed_deletes: &mut BTreeSet<RemotePath>) {
        let registry = self.registry();
        let config = self.config();
        let delegate = self.delegate();
        let inbound = InboundPropagator::new(&*self.local, &registry, &config, delegate.as_ref());

        let report = match inbound.apply(event) {
            Ok(report) => report,
            Err(error) => {
                tracing::warn!(table = %event.table, %error, "inbound propagation failed");
                self.record_error(&error);
                return;
            }
        };

        {
            let mut stats = self.stats.write();
            stats.invalid_attributes += report.invalid_attributes as u64;
            if report.validation_failed {
                stats.validation_failures += 1;
            }
            match &report.outcome {
                InboundOutcome::Applied { .. } => stats.records_received += 1,
                InboundOutcome::Deleted { path, .. } => {
                    suppressed_deletes.insert(path.clone());
                    stats.local_deletes += 1;
                }
                _ => {}
            }
        }

        if report.changed_local_store() {
            self.events.emit(SyncEvent::IncomingChanges {
                table: event.table.clone(),
                count: 1,
            });
        }
    }

    fn handle_report(&self, report: &WriteReport) {
        let delegate = self.delegate();
        let ack = outbound::acknowledge(report, delegate.as_ref());

        match &report.result {
            Ok(()) => {
                let now = Utc::now();
                {
                    let mut stats = self.stats.write();
                    stats.records_sent += ack.sets as u64;
                    stats.remote_deletes += ack.deletes as u64;
                    stats.last_sync_time = Some(now);
                }
                self.events.emit(SyncEvent::LastSyncDate(now));
            }
            Err(error) => {
                let mut stats = self.stats.write();
                stats.write_failures += ack.failures as u64;
                stats.last_error = Some(error.to_string());
            }
        }
    }
}

/// Subscriptions and worker of an observing manager.
struct Observer {
    dispatcher: Dispatcher,
    local_subscription: SubscriptionId,
    remote_subscriptions: BTreeMap<String, SubscriptionId>,
    worker: JoinHandle<()>,
}

/// Keeps a local object store and a remote document store in sync.
///
/// The manager owns the entity/table registry, the configuration and the
/// delegate. While observing, it listens to both stores and propagates
/// every change to the other side on a dedicated dispatcher thread.
///
/// All methods may be called from any thread, including from delegate
/// callbacks, except [`SyncManager::wait_idle`].
pub struct SyncManager<L: LocalStore + 'static, R: RemoteStore + 'static> {
    shared: Arc<Shared<L, R>>,
    observer: Mutex<Option<Observer>>,
}

impl<L: LocalStore + 'static, R: RemoteStore + 'static> SyncManager<L, R> {
    /// Creates a manager with the default configuration.
    pub fn new(local: Arc<L>, remote: Arc<R>) -> Self {
        Self::build(local, remote, SyncConfig::default())
    }

    /// Creates a manager with a configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] if the configuration is invalid.
    pub fn with_config(local: Arc<L>, remote: Arc<R>, config: SyncConfig) -> SyncResult<Self> {
        config.validate()?;
        Ok(Self::build(local, remote, config))
    }

    fn build(local: Arc<L>, remote: Arc<R>, config: SyncConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                local,
                remote,
                config: RwLock::new(Arc::new(config)),
                registry: RwLock::new(Arc::new(EntityTableRegistry::new())),
                delegate: RwLock::new(Arc::new(NoopDelegate)),
                stats: RwLock::new(SyncStats::default()),
                events: EventFeed::new(),
            }),
            observer: Mutex::new(None),
        }
    }

    /// Generates a fresh sync identifier.
    pub fn generate_sync_id() -> SyncId {
        SyncId::generate()
    }

    /// Returns the local store.
    pub fn local_store(&self) -> &Arc<L> {
        &self.shared.local
    }

    /// Returns the remote store.
    pub fn remote_store(&self) -> &Arc<R> {
        &self.shared.remote
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    /// Returns the current configuration.
    pub fn config(&self) -> SyncConfig {
        (*self.shared.config()).clone()
    }

    fn update_config<F>(&self, update: F) -> SyncResult<()>
    where
        F: FnOnce(&mut SyncConfig),
    {
        let mut slot = self.shared.config.write();
        let mut next = (**slot).clone();
        update(&mut next);
        next.validate()?;
        *slot = Arc::new(next);
        Ok(())
    }

    fn require_no_mappings(&self, setting: &str) -> SyncResult<()> {
        if self.shared.registry().is_empty() {
            Ok(())
        } else {
            Err(SyncError::InvalidConfig(format!(
                "{setting} must be set before registering tables"
            )))
        }
    }

    /// Sets the name of the sync attribute. Must be called before any table
    /// is registered.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] if tables are registered or the
    /// name is invalid.
    pub fn set_sync_attribute_name(&self, name: impl Into<String>) -> SyncResult<()> {
        self.require_no_mappings("sync attribute")?;
        let name = name.into();
        self.update_config(|config| config.sync_attribute = name)
    }

    /// Sets the name of the synced-flag attribute. Must be called before
    /// any table is registered.
    ///
    /// The local store must clear the same attribute on every commit that
    /// does not write it. For [`MemoryLocalStore`](objsync_store::MemoryLocalStore)
    /// that means building it with `with_synced_flag` using this name;
    /// otherwise local edits made after an inbound apply are never sent.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] if tables are registered or the
    /// name is invalid.
    pub fn set_synced_flag_attribute_name(&self, name: impl Into<String>) -> SyncResult<()> {
        self.require_no_mappings("synced flag")?;
        let name = name.into();
        self.update_config(|config| config.synced_flag_attribute = name)
    }

    /// Sets the number of writes per remote batch.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] for zero.
    pub fn set_batch_size(&self, size: usize) -> SyncResult<()> {
        self.update_config(|config| config.batch_size = size)
    }

    /// Sets the session identifier attached to every batch.
    pub fn set_user_id(&self, user_id: Option<String>) {
        let mut slot = self.shared.config.write();
        let mut next = (**slot).clone();
        next.user_id = user_id;
        *slot = Arc::new(next);
    }

    /// Returns the session identifier.
    pub fn user_id(&self) -> Option<String> {
        self.shared.config().user_id.clone()
    }

    /// Replaces the delegate.
    pub fn set_delegate(&self, delegate: Arc<dyn SyncDelegate>) {
        *self.shared.delegate.write() = delegate;
    }

    /// Removes the delegate.
    pub fn clear_delegate(&self) {
        *self.shared.delegate.write() = Arc::new(NoopDelegate);
    }

    // =========================================================================
    // Registry
    // =========================================================================

    /// Registers `entity` to sync with `table`, replacing any pair that
    /// uses either name.
    ///
    /// While observing, the remote subscriptions follow the change.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the entity is unknown or lacks a
    /// string sync attribute.
    pub fn set_table(&self, entity: &str, table: &str) -> SyncResult<()> {
        let config = self.shared.config();
        let schema = describe_entity(&*self.shared.local, entity, &config)?;

        {
            let mut slot = self.shared.registry.write();
            let mut next = (**slot).clone();
            for displaced in next.insert(EntityMapping::new(entity, table, schema)) {
                tracing::debug!(entity = %displaced.entity, table = %displaced.table, "replaced mapping");
            }
            *slot = Arc::new(next);
        }
        tracing::info!(entity, table, "registered table");

        self.refresh_subscriptions();
        Ok(())
    }

    /// Replaces all registered pairs. Nothing changes if any pair is
    /// invalid.
    ///
    /// # Errors
    ///
    /// Returns the first configuration error found.
    pub fn set_tables<I, E, T>(&self, pairs: I) -> SyncResult<()>
    where
        I: IntoIterator<Item = (E, T)>,
        E: AsRef<str>,
        T: AsRef<str>,
    {
        let config = self.shared.config();
        let mut next = EntityTableRegistry::new();
        for (entity, table) in pairs {
            let entity = entity.as_ref();
            let schema = describe_entity(&*self.shared.local, entity, &config)?;
            next.insert(EntityMapping::new(entity, table.as_ref(), schema));
        }

        *self.shared.registry.write() = Arc::new(next);
        self.refresh_subscriptions();
        Ok(())
    }

    /// Unregisters an entity. Returns false if it was not registered.
    pub fn remove_table(&self, entity: &str) -> bool {
        let removed = {
            let mut slot = self.shared.registry.write();
            let mut next = (**slot).clone();
            let removed = next.remove_entity(entity).is_some();
            if removed {
                *slot = Arc::new(next);
            }
            removed
        };
        if removed {
            tracing::info!(entity, "unregistered table");
            self.refresh_subscriptions();
        }
        removed
    }

    /// Returns the table of an entity.
    pub fn table_for(&self, entity: &str) -> Option<String> {
        self.shared.registry().table_for(entity).map(str::to_string)
    }

    /// Returns the entity of a table.
    pub fn entity_for(&self, table: &str) -> Option<String> {
        self.shared.registry().entity_for(table).map(str::to_string)
    }

    /// Registered table names, sorted.
    pub fn table_ids(&self) -> Vec<String> {
        self.shared.registry().table_ids()
    }

    /// Registered entity names, sorted.
    pub fn entity_names(&self) -> Vec<String> {
        self.shared.registry().entity_names()
    }

    /// All registered pairs keyed by entity name.
    pub fn tables_by_entity_name(&self) -> BTreeMap<String, String> {
        self.shared.registry().tables_by_entity_name()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Subscribes to both stores and starts propagating changes. Does
    /// nothing if already observing.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no table is registered or a store
    /// is unusable, and [`SyncError::Dispatcher`] if the worker thread
    /// cannot be spawned.
    pub fn start_observing(&self) -> SyncResult<()> {
        let mut guard = self.observer.lock();
        if guard.is_some() {
            return Ok(());
        }
        if self.shared.registry().is_empty() {
            return Err(SyncError::NoMappings);
        }
        if !self.shared.local.is_open() {
            return Err(SyncError::LocalStoreUnavailable);
        }
        if !self.shared.remote.is_connected() {
            return Err(SyncError::RemoteStoreUnavailable);
        }

        let (dispatcher, rx) = Dispatcher::channel();
        let shared = Arc::clone(&self.shared);
        let inflight = dispatcher.inflight();
        let worker_dispatcher = dispatcher.clone();
        let worker = thread::Builder::new()
            .name("objsync-dispatch".to_string())
            .spawn(move || {
                let mut suppressed_deletes = BTreeSet::new();
                dispatch::run(rx, inflight, |event| {
                    shared.handle(event, &worker_dispatcher, &mut suppressed_deletes)
                });
            })
            .map_err(|e| SyncError::Dispatcher(e.to_string()))?;

        let local_dispatcher = dispatcher.clone();
        let local_subscription = self
            .shared
            .local
            .subscribe(Box::new(move |changes: &LocalChangeSet| {
                local_dispatcher.dispatch(EngineEvent::Local(changes.clone()))
            }));

        let mut observer = Observer {
            dispatcher,
            local_subscription,
            remote_subscriptions: BTreeMap::new(),
            worker,
        };
        self.reconcile_subscriptions(&mut observer);
        *guard = Some(observer);
        drop(guard);

        tracing::info!(tables = ?self.table_ids(), "started observing");
        self.shared
            .events
            .emit(SyncEvent::StatusChanged(SyncStatus::Observing));
        Ok(())
    }

    /// Unsubscribes from both stores and stops the dispatcher. Events
    /// already queued are handled first; write completions that arrive
    /// later are dropped. Does nothing if not observing.
    pub fn stop_observing(&self) {
        let Some(observer) = self.observer.lock().take() else {
            return;
        };

        self.shared.local.unsubscribe(observer.local_subscription);
        for (_, id) in observer.remote_subscriptions {
            self.shared.remote.unsubscribe(id);
        }
        observer.dispatcher.dispatch(EngineEvent::Shutdown);

        if observer.worker.thread().id() != thread::current().id()
            && observer.worker.join().is_err()
        {
            tracing::error!("dispatcher thread panicked");
        }

        tracing::info!("stopped observing");
        self.shared
            .events
            .emit(SyncEvent::StatusChanged(SyncStatus::Idle));
    }

    /// Returns true while observing.
    pub fn is_observing(&self) -> bool {
        self.observer.lock().is_some()
    }

    /// Returns the current status.
    pub fn status(&self) -> SyncStatus {
        if self.is_observing() {
            SyncStatus::Observing
        } else {
            SyncStatus::Idle
        }
    }

    /// Blocks until every change seen so far, and every change it caused,
    /// has been handled, or the timeout elapses. Returns true if idle.
    ///
    /// Must not be called from a delegate callback.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let inflight = {
            let guard = self.observer.lock();
            match guard.as_ref() {
                Some(observer) => observer.dispatcher.inflight(),
                None => return true,
            }
        };
        inflight.wait_idle(timeout)
    }

    /// Returns a snapshot of the statistics.
    pub fn stats(&self) -> SyncStats {
        self.shared.stats.read().clone()
    }

    /// Returns a receiver for engine events.
    pub fn subscribe_events(&self) -> Receiver<SyncEvent> {
        self.shared.events.subscribe()
    }

    fn refresh_subscriptions(&self) {
        if let Some(observer) = self.observer.lock().as_mut() {
            self.reconcile_subscriptions(observer);
        }
    }

    /// Subscribes to every registered table and drops subscriptions of
    /// tables no longer registered.
    fn reconcile_subscriptions(&self, observer: &mut Observer) {
        let wanted: BTreeSet<String> = self.shared.registry().table_ids().into_iter().collect();
        let remote = &self.shared.remote;

        observer.remote_subscriptions.retain(|table, id| {
            let keep = wanted.contains(table);
            if !keep {
                remote.unsubscribe(*id);
                tracing::debug!(%table, "unsubscribed from table");
            }
            keep
        });

        for table in wanted {
            if observer.remote_subscriptions.contains_key(&table) {
                continue;
            }
            let dispatcher = observer.dispatcher.clone();
            let id = remote.subscribe(
                &table,
                Box::new(move |event: &RemoteEvent| {
                    dispatcher.dispatch(EngineEvent::Remote(event.clone()))
                }),
            );
            tracing::debug!(%table, "subscribed to table");
            observer.remote_subscriptions.insert(table, id);
        }
    }
}

impl<L: LocalStore + 'static, R: RemoteStore + 'static> Drop for SyncManager<L, R> {
    fn drop(&mut self) {
        self.stop_observing();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objsync_model::{AttributeType, EntitySchema};
    use objsync_store::{MemoryLocalStore, MemoryRemoteStore};

    fn manager() -> SyncManager<MemoryLocalStore, MemoryRemoteStore> {
        let local = MemoryLocalStore::new()
            .with_entity(
                EntitySchema::new("Task")
                    .with_attribute("syncID", AttributeType::String)
                    .with_attribute("isSynced", AttributeType::Boolean)
                    .with_attribute("title", AttributeType::String),
            )
            .with_entity(EntitySchema::new("Note").with_attribute("body", AttributeType::String));
        SyncManager::new(Arc::new(local), Arc::new(MemoryRemoteStore::new()))
    }

    #[test]
    fn start_requires_mappings() {
        let manager = manager();
        assert!(matches!(manager.start_observing(), Err(SyncError::NoMappings)));
        assert!(!manager.is_observing());
    }

    #[test]
    fn set_table_validates_entity() {
        let manager = manager();
        assert!(matches!(
            manager.set_table("Note", "notes"),
            Err(SyncError::MissingSyncAttribute { .. })
        ));
        assert!(manager.set_table("Task", "tasks").is_ok());
        assert_eq!(manager.table_for("Task").as_deref(), Some("tasks"));
        assert_eq!(manager.entity_for("tasks").as_deref(), Some("Task"));
    }

    #[test]
    fn set_tables_is_all_or_nothing() {
        let manager = manager();
        manager.set_table("Task", "tasks").unwrap();

        assert!(manager.set_tables([("Task", "todos"), ("Note", "notes")]).is_err());
        assert_eq!(manager.table_ids(), vec!["tasks"]);

        manager.set_tables([("Task", "todos")]).unwrap();
        assert_eq!(manager.table_ids(), vec!["todos"]);
    }

    #[test]
    fn attribute_names_are_fixed_once_tables_exist() {
        let manager = manager();
        manager.set_sync_attribute_name("syncID").unwrap();
        manager.set_table("Task", "tasks").unwrap();
        assert!(matches!(
            manager.set_sync_attribute_name("uuid"),
            Err(SyncError::InvalidConfig(_))
        ));
        assert!(manager.set_batch_size(0).is_err());
        assert!(manager.set_batch_size(5).is_ok());
        assert_eq!(manager.config().batch_size, 5);
    }

    #[test]
    fn observing_lifecycle() {
        let manager = manager();
        manager.set_table("Task", "tasks").unwrap();
        let events = manager.subscribe_events();

        manager.start_observing().unwrap();
        manager.start_observing().unwrap();
        assert_eq!(manager.status(), SyncStatus::Observing);
        assert_eq!(manager.local_store().subscriber_count(), 1);
        assert_eq!(manager.remote_store().subscriber_count(), 1);

        manager.stop_observing();
        manager.stop_observing();
        assert_eq!(manager.status(), SyncStatus::Idle);
        assert_eq!(manager.local_store().subscriber_count(), 0);
        assert_eq!(manager.remote_store().subscriber_count(), 0);

        let statuses: Vec<SyncEvent> = events.try_iter().collect();
        assert_eq!(
            statuses,
            vec![
                SyncEvent::StatusChanged(SyncStatus::Observing),
                SyncEvent::StatusChanged(SyncStatus::Idle),
            ]
        );
    }

    #[test]
    fn registry_changes_follow_remote_subscriptions() {
        let manager = manager();
        manager.set_table("Task", "tasks").unwrap();
        manager.start_observing().unwrap();

        manager.set_table("Task", "todos").unwrap();
        assert_eq!(manager.remote_store().subscriber_count(), 1);

        assert!(manager.remove_table("Task"));
        assert!(!manager.remove_table("Task"));
        assert_eq!(manager.remote_store().subscriber_count(), 0);
        manager.stop_observing();
    }

    #[test]
    fn start_rejects_closed_store() {
        let manager = manager();
        manager.set_table("Task", "tasks").unwrap();
        manager.local_store().close();
        assert!(matches!(
            manager.start_observing(),
            Err(SyncError::LocalStoreUnavailable)
        ));
    }

    #[test]
    fn generated_identifiers_are_unique() {
        let a = SyncManager::<MemoryLocalStore, MemoryRemoteStore>::generate_sync_id();
        let b = SyncManager::<MemoryLocalStore, MemoryRemoteStore>::generate_sync_id();
        assert_ne!(a, b);
    }
}
