//! Remote store contract.

use crate::error::RemoteStoreResult;
use crate::object::SubscriptionId;
use objsync_model::{ChangeBatch, RemoteEvent};

/// Callback invoked once when a batch write completes or fails.
pub type WriteCompletion = Box<dyn FnOnce(RemoteStoreResult<()>) + Send>;

/// Callback invoked for every change under a subscribed table.
pub type RemoteChangeListener = Box<dyn Fn(&RemoteEvent) + Send + Sync>;

/// A path-addressable remote document store.
///
/// Writes are fire-and-forget: `write` may return before the store has
/// acknowledged the batch, and the completion runs on whatever execution
/// context the store chooses.
pub trait RemoteStore: Send + Sync {
    /// Issues all writes of `batch` as one request.
    fn write(&self, batch: ChangeBatch, on_complete: WriteCompletion);

    /// Subscribes to add/modify/remove events under `table`.
    fn subscribe(&self, table: &str, listener: RemoteChangeListener) -> SubscriptionId;

    /// Removes a subscription. Returns false if it did not exist.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;

    /// Returns true if the store is reachable.
    fn is_connected(&self) -> bool {
        true
    }
}
