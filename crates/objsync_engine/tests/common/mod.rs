//! Shared fixtures for the engine integration tests.

#![allow(dead_code)]

use objsync_engine::{
    AttributeType, EntitySchema, LocalObject, LocalStoreError, MemoryLocalStore,
    MemoryRemoteStore, RemotePath, RemoteStoreError, RemoteValue, SyncDelegate, SyncManager,
    ValidationContext, WriteFailure,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

pub type Manager = SyncManager<MemoryLocalStore, MemoryRemoteStore>;

/// Installs a test-writer subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// The model used by most scenarios.
///
/// `Task`, `Project` and `Tag` are synced; `Note` has no sync attribute and
/// is never registered.
pub fn local_store() -> MemoryLocalStore {
    local_store_with_flag("isSynced")
}

/// The same model with the synced flag stored under `flag`.
pub fn local_store_with_flag(flag: &str) -> MemoryLocalStore {
    MemoryLocalStore::new()
        .with_synced_flag(flag)
        .with_entity(
            EntitySchema::new("Task")
                .with_attribute("syncID", AttributeType::String)
                .with_attribute(flag, AttributeType::Boolean)
                .with_attribute("title", AttributeType::String)
                .with_attribute("dueDate", AttributeType::Double)
                .with_attribute("done", AttributeType::Boolean)
                .with_attribute("createdAt", AttributeType::Date)
                .with_to_one("project", "Project")
                .with_to_many("tags", "Tag"),
        )
        .with_entity(
            EntitySchema::new("Project")
                .with_attribute("syncID", AttributeType::String)
                .with_attribute(flag, AttributeType::Boolean)
                .with_attribute("name", AttributeType::String),
        )
        .with_entity(
            EntitySchema::new("Tag")
                .with_attribute("syncID", AttributeType::String)
                .with_attribute(flag, AttributeType::Boolean)
                .with_attribute("name", AttributeType::String),
        )
        .with_entity(EntitySchema::new("Note").with_attribute("body", AttributeType::String))
}

/// A manager observing `local` and `remote` with `Task`, `Project` and
/// `Tag` registered. `flag` renames the synced flag before registration.
pub fn observing_manager(
    local: Arc<MemoryLocalStore>,
    remote: Arc<MemoryRemoteStore>,
    delegate: Arc<RecordingDelegate>,
    flag: Option<&str>,
) -> Manager {
    init_tracing();
    let manager = SyncManager::new(local, remote);
    manager.set_delegate(delegate);
    if let Some(flag) = flag {
        manager.set_synced_flag_attribute_name(flag).unwrap();
    }
    manager
        .set_tables([("Task", "tasks"), ("Project", "projects"), ("Tag", "tags")])
        .unwrap();
    manager.start_observing().unwrap();
    manager
}

/// One manager over fresh in-memory stores.
pub struct Harness {
    pub local: Arc<MemoryLocalStore>,
    pub remote: Arc<MemoryRemoteStore>,
    pub delegate: Arc<RecordingDelegate>,
    pub manager: Manager,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_remote(Arc::new(MemoryRemoteStore::new()))
    }

    /// A harness whose remote store is shared with other harnesses.
    pub fn with_remote(remote: Arc<MemoryRemoteStore>) -> Self {
        Self::build(Arc::new(local_store()), remote, None)
    }

    /// A harness whose store and manager both use `flag` as the synced flag.
    pub fn with_synced_flag(flag: &str) -> Self {
        Self::build(
            Arc::new(local_store_with_flag(flag)),
            Arc::new(MemoryRemoteStore::new()),
            Some(flag),
        )
    }

    fn build(local: Arc<MemoryLocalStore>, remote: Arc<MemoryRemoteStore>, flag: Option<&str>) -> Self {
        let delegate = Arc::new(RecordingDelegate::default());
        let manager = observing_manager(
            Arc::clone(&local),
            Arc::clone(&remote),
            Arc::clone(&delegate),
            flag,
        );
        Self {
            local,
            remote,
            delegate,
            manager,
        }
    }

    /// Waits until every pending change has been handled.
    pub fn settle(&self) {
        assert!(
            self.manager.wait_idle(Duration::from_secs(5)),
            "engine did not settle"
        );
    }

    /// The only local object of `entity`.
    pub fn single(&self, entity: &str) -> LocalObject {
        let objects = self.local.objects(entity);
        assert_eq!(objects.len(), 1, "expected exactly one {entity}");
        objects.into_iter().next().unwrap()
    }
}

/// Records every delegate callback.
#[derive(Default)]
pub struct RecordingDelegate {
    pub from_remote: Mutex<Vec<LocalObject>>,
    pub to_remote: Mutex<Vec<LocalObject>>,
    pub invalid: Mutex<Vec<(String, RemoteValue, AttributeType)>>,
    pub validation: Mutex<Vec<(ValidationContext, LocalStoreError)>>,
    pub write_failures: Mutex<Vec<WriteFailure>>,
    pub batch_failures: Mutex<Vec<(usize, Vec<RemotePath>)>>,
    pub rejected_titles: Mutex<Vec<String>>,
    pub rejected_names: Mutex<Vec<String>>,
}

impl RecordingDelegate {
    /// Marks tasks with this title as not syncable.
    pub fn reject_title(&self, title: &str) {
        self.rejected_titles.lock().push(title.to_string());
    }

    /// Marks projects and tags with this name as not syncable.
    pub fn reject_name(&self, name: &str) {
        self.rejected_names.lock().push(name.to_string());
    }
}

impl SyncDelegate for RecordingDelegate {
    fn insert_validation_failed(
        &self,
        _object: &LocalObject,
        error: &LocalStoreError,
        context: &ValidationContext,
    ) {
        self.validation.lock().push((context.clone(), error.clone()));
    }

    fn synced_from_remote(&self, object: &LocalObject) {
        self.from_remote.lock().push(object.clone());
    }

    fn synced_to_remote(&self, object: &LocalObject) {
        self.to_remote.lock().push(object.clone());
    }

    fn invalid_attribute(
        &self,
        _object: &LocalObject,
        property: &str,
        value: &RemoteValue,
        expected: AttributeType,
    ) {
        self.invalid
            .lock()
            .push((property.to_string(), value.clone(), expected));
    }

    fn is_record_syncable(&self, object: &LocalObject) -> bool {
        let rejected = |value: Option<&str>, list: &Mutex<Vec<String>>| {
            value.is_some_and(|value| list.lock().iter().any(|r| r == value))
        };
        !rejected(object.attribute("title").as_text(), &self.rejected_titles)
            && !rejected(object.attribute("name").as_text(), &self.rejected_names)
    }

    fn remote_write_failed(&self, failure: &WriteFailure) {
        self.write_failures.lock().push(failure.clone());
    }

    fn batch_write_failed(&self, batch: usize, paths: &[RemotePath], _error: &RemoteStoreError) {
        self.batch_failures.lock().push((batch, paths.to_vec()));
    }
}
