//! In-memory remote document store.

use crate::error::{RemoteStoreError, RemoteStoreResult};
use crate::object::SubscriptionId;
use crate::remote::{RemoteChangeListener, RemoteStore, WriteCompletion};
use objsync_model::{
    ChangeBatch, RemoteEvent, RemoteEventKind, RemotePath, RemoteRecord, RemoteWrite, SyncId,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

type Listener = Arc<dyn Fn(&RemoteEvent) + Send + Sync>;

struct TableListener {
    id: SubscriptionId,
    table: String,
    listener: Listener,
}

/// An in-memory remote store.
///
/// Records live in a two-level tree `table/identifier`. Every applied
/// write, including the engine's own, is pushed to the table's
/// subscribers, like a realtime document store echoes local writes.
///
/// Writes complete synchronously: the completion runs before `write`
/// returns, followed by the change events. Failures can be scripted with
/// [`MemoryRemoteStore::fail_next_write`].
pub struct MemoryRemoteStore {
    tables: RwLock<BTreeMap<String, BTreeMap<SyncId, RemoteRecord>>>,
    batches: RwLock<Vec<ChangeBatch>>,
    listeners: RwLock<Vec<TableListener>>,
    scripted_failures: Mutex<VecDeque<RemoteStoreError>>,
    connected: AtomicBool,
    next_subscription: AtomicU64,
}

impl MemoryRemoteStore {
    /// Creates an empty, connected store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(BTreeMap::new()),
            batches: RwLock::new(Vec::new()),
            listeners: RwLock::new(Vec::new()),
            scripted_failures: Mutex::new(VecDeque::new()),
            connected: AtomicBool::new(true),
            next_subscription: AtomicU64::new(1),
        }
    }

    /// Stores a record as another client would, notifying subscribers.
    pub fn put_record(&self, table: &str, record: RemoteRecord) {
        let event = self.apply(
            table,
            RemoteWrite::Set {
                path: RemotePath::new(table, record.id().clone()),
                record,
            },
        );
        if let Some(event) = event {
            self.notify(&event);
        }
    }

    /// Removes a record as another client would, notifying subscribers.
    pub fn remove_record(&self, table: &str, id: &SyncId) {
        let event = self.apply(
            table,
            RemoteWrite::Delete {
                path: RemotePath::new(table, id.clone()),
            },
        );
        if let Some(event) = event {
            self.notify(&event);
        }
    }

    /// Returns the record stored at `table/id`.
    #[must_use]
    pub fn record(&self, table: &str, id: &SyncId) -> Option<RemoteRecord> {
        self.tables
            .read()
            .get(table)
            .and_then(|records| records.get(id))
            .cloned()
    }

    /// Returns all records of a table in identifier order.
    #[must_use]
    pub fn records(&self, table: &str) -> Vec<RemoteRecord> {
        self.tables
            .read()
            .get(table)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns every batch passed to [`RemoteStore::write`], including
    /// failed ones, in issue order.
    #[must_use]
    pub fn batches(&self) -> Vec<ChangeBatch> {
        self.batches.read().clone()
    }

    /// Returns all writes of all issued batches, in issue order.
    #[must_use]
    pub fn writes(&self) -> Vec<RemoteWrite> {
        self.batches
            .read()
            .iter()
            .flat_map(|batch| batch.writes.iter().cloned())
            .collect()
    }

    /// Forgets the issued batches.
    pub fn clear_log(&self) {
        self.batches.write().clear();
    }

    /// Makes the next write fail with `error` without applying it.
    pub fn fail_next_write(&self, error: RemoteStoreError) {
        self.scripted_failures.lock().push_back(error);
    }

    /// Sets the connected state. Writes fail while disconnected.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Returns the number of active subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.listeners.read().len()
    }

    fn apply(&self, table: &str, write: RemoteWrite) -> Option<RemoteEvent> {
        let mut tables = self.tables.write();
        let records = tables.entry(table.to_string()).or_default();

        match write {
            RemoteWrite::Set { path, record } => {
                let kind = if records.contains_key(&path.id) {
                    RemoteEventKind::Modified
                } else {
                    RemoteEventKind::Added
                };
                records.insert(path.id, record.clone());
                Some(RemoteEvent::new(table, kind, record))
            }
            RemoteWrite::Delete { path } => records
                .remove(&path.id)
                .map(|record| RemoteEvent::new(table, RemoteEventKind::Removed, record)),
        }
    }

    fn notify(&self, event: &RemoteEvent) {
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .iter()
            .filter(|l| l.table == event.table)
            .map(|l| Arc::clone(&l.listener))
            .collect();
        for listener in listeners {
            listener(event);
        }
    }

    fn check_write(&self) -> RemoteStoreResult<()> {
        if !self.is_connected() {
            return Err(RemoteStoreError::Disconnected);
        }
        match self.scripted_failures.lock().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl Default for MemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteStore for MemoryRemoteStore {
    fn write(&self, batch: ChangeBatch, on_complete: WriteCompletion) {
        self.batches.write().push(batch.clone());

        if let Err(error) = self.check_write() {
            tracing::debug!(batch = batch.index, %error, "memory remote store rejected batch");
            on_complete(Err(error));
            return;
        }

        let events: Vec<RemoteEvent> = batch
            .writes
            .into_iter()
            .filter_map(|write| {
                let table = write.path().table.clone();
                self.apply(&table, write)
            })
            .collect();

        on_complete(Ok(()));

        for event in &events {
            self.notify(event);
        }
    }

    fn subscribe(&self, table: &str, listener: RemoteChangeListener) -> SubscriptionId {
        let id = SubscriptionId::from_raw(self.next_subscription.fetch_add(1, Ordering::SeqCst));
        self.listeners.write().push(TableListener {
            id,
            table: table.to_string(),
            listener: Arc::from(listener),
        });
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| l.id != id);
        listeners.len() != before
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn id(s: &str) -> SyncId {
        SyncId::parse(s).unwrap()
    }

    fn set(table: &str, record: RemoteRecord) -> RemoteWrite {
        RemoteWrite::Set {
            path: RemotePath::new(table, record.id().clone()),
            record,
        }
    }

    fn collect_events(store: &MemoryRemoteStore, table: &str) -> Arc<Mutex<Vec<RemoteEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        store.subscribe(
            table,
            Box::new(move |event: &RemoteEvent| sink.lock().push(event.clone())),
        );
        seen
    }

    fn write(store: &MemoryRemoteStore, writes: Vec<RemoteWrite>) -> RemoteStoreResult<()> {
        let result = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&result);
        store.write(
            ChangeBatch {
                index: 0,
                user_id: None,
                writes,
            },
            Box::new(move |r: RemoteStoreResult<()>| *slot.lock() = Some(r)),
        );
        let outcome = result.lock().take().expect("completion must run");
        outcome
    }

    #[test]
    fn write_applies_and_echoes() {
        let store = MemoryRemoteStore::new();
        let events = collect_events(&store, "tasks");

        let record = RemoteRecord::new(id("a")).with_field("title", "Buy milk");
        write(&store, vec![set("tasks", record.clone())]).unwrap();

        assert_eq!(store.record("tasks", &id("a")), Some(record));
        let events = events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, RemoteEventKind::Added);
    }

    #[test]
    fn modify_and_remove_events() {
        let store = MemoryRemoteStore::new();
        store.put_record("tasks", RemoteRecord::new(id("a")));
        let events = collect_events(&store, "tasks");

        store.put_record("tasks", RemoteRecord::new(id("a")).with_field("done", true));
        store.remove_record("tasks", &id("a"));
        store.remove_record("tasks", &id("a"));

        let kinds: Vec<_> = events.lock().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![RemoteEventKind::Modified, RemoteEventKind::Removed]);
        assert_eq!(
            events.lock()[1].record.field("done"),
            Some(&json!(true))
        );
    }

    #[test]
    fn listeners_are_scoped_to_their_table() {
        let store = MemoryRemoteStore::new();
        let events = collect_events(&store, "projects");

        store.put_record("tasks", RemoteRecord::new(id("a")));
        assert!(events.lock().is_empty());
    }

    #[test]
    fn scripted_failure_is_not_applied() {
        let store = MemoryRemoteStore::new();
        store.fail_next_write(RemoteStoreError::rejected("quota exceeded"));

        let err = write(&store, vec![set("tasks", RemoteRecord::new(id("a")))]).unwrap_err();
        assert_eq!(err, RemoteStoreError::rejected("quota exceeded"));
        assert!(store.records("tasks").is_empty());
        assert_eq!(store.batches().len(), 1);

        write(&store, vec![set("tasks", RemoteRecord::new(id("a")))]).unwrap();
        assert_eq!(store.records("tasks").len(), 1);
    }

    #[test]
    fn disconnected_store_fails_writes() {
        let store = MemoryRemoteStore::new();
        store.set_connected(false);
        assert_eq!(
            write(&store, vec![set("tasks", RemoteRecord::new(id("a")))]),
            Err(RemoteStoreError::Disconnected)
        );
    }

    #[test]
    fn delete_write() {
        let store = MemoryRemoteStore::new();
        store.put_record("tasks", RemoteRecord::new(id("a")));

        write(
            &store,
            vec![RemoteWrite::Delete {
                path: RemotePath::new("tasks", id("a")),
            }],
        )
        .unwrap();

        assert!(store.record("tasks", &id("a")).is_none());
        assert_eq!(store.writes().len(), 1);
        store.clear_log();
        assert!(store.writes().is_empty());
    }
}
