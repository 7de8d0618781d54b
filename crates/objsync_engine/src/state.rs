//! Engine status, statistics and the event feed.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::mpsc::{self, Receiver, Sender};

/// Whether the engine is propagating changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// Not subscribed to either store.
    Idle,
    /// Subscribed to both stores and propagating changes.
    Observing,
}

impl SyncStatus {
    /// Returns true while observing.
    pub fn is_observing(&self) -> bool {
        matches!(self, SyncStatus::Observing)
    }
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncStats {
    /// Records acknowledged by the remote store.
    pub records_sent: u64,
    /// Remote deletes acknowledged by the remote store.
    pub remote_deletes: u64,
    /// Inbound records applied to the local store.
    pub records_received: u64,
    /// Local objects deleted because their record was removed remotely.
    pub local_deletes: u64,
    /// Remote batches issued.
    pub batches_issued: u64,
    /// Writes that failed remotely.
    pub write_failures: u64,
    /// Local changes skipped because their state came from the remote.
    pub echoes_suppressed: u64,
    /// Remote fields skipped because of a type mismatch.
    pub invalid_attributes: u64,
    /// Inbound records dropped after failing validation.
    pub validation_failures: u64,
    /// Time of the last acknowledged batch.
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Notifications about engine activity.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// The status changed.
    StatusChanged(SyncStatus),
    /// Inbound changes were applied to the local store.
    IncomingChanges {
        /// Remote table the changes came from.
        table: String,
        /// Number of local objects created, updated or deleted.
        count: usize,
    },
    /// A batch was acknowledged by the remote store.
    LastSyncDate(DateTime<Utc>),
}

/// Distributes [`SyncEvent`]s to subscribers.
///
/// Subscribers whose receiver was dropped are removed on the next emit.
#[derive(Default)]
pub struct EventFeed {
    subscribers: RwLock<Vec<Sender<SyncEvent>>>,
}

impl EventFeed {
    /// Creates a feed without subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a receiver for all future events.
    pub fn subscribe(&self) -> Receiver<SyncEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Sends an event to every live subscriber.
    pub fn emit(&self, event: SyncEvent) {
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Returns the number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_delivers_in_order() {
        let feed = EventFeed::new();
        let rx = feed.subscribe();

        feed.emit(SyncEvent::StatusChanged(SyncStatus::Observing));
        feed.emit(SyncEvent::IncomingChanges {
            table: "tasks".into(),
            count: 2,
        });

        assert_eq!(
            rx.try_recv().unwrap(),
            SyncEvent::StatusChanged(SyncStatus::Observing)
        );
        assert!(matches!(
            rx.try_recv().unwrap(),
            SyncEvent::IncomingChanges { count: 2, .. }
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let feed = EventFeed::new();
        let kept = feed.subscribe();
        drop(feed.subscribe());
        assert_eq!(feed.subscriber_count(), 2);

        feed.emit(SyncEvent::StatusChanged(SyncStatus::Idle));
        assert_eq!(feed.subscriber_count(), 1);
        assert!(kept.try_recv().is_ok());
    }

    #[test]
    fn status_helpers() {
        assert!(SyncStatus::Observing.is_observing());
        assert!(!SyncStatus::Idle.is_observing());
    }
}
