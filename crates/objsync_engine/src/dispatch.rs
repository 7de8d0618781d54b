//! Serialized event dispatch.
//!
//! Store listeners and write completions never do work themselves: they
//! enqueue an [`EngineEvent`] and return. A single worker thread drains the
//! queue in order, so propagation never runs inside a store callback and
//! never runs concurrently with itself.

use crate::outbound::WriteReport;
use objsync_model::RemoteEvent;
use objsync_store::LocalChangeSet;
use parking_lot::{Condvar, Mutex};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Work for the dispatcher thread.
#[derive(Debug)]
pub(crate) enum EngineEvent {
    Local(LocalChangeSet),
    Remote(RemoteEvent),
    WriteCompleted(WriteReport),
    Shutdown,
}

/// Counts events that were enqueued but not yet handled.
#[derive(Debug, Default)]
pub(crate) struct Inflight {
    pending: Mutex<usize>,
    idle: Condvar,
}

impl Inflight {
    fn begin(&self) {
        *self.pending.lock() += 1;
    }

    fn finish(&self) {
        let mut pending = self.pending.lock();
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.idle.notify_all();
        }
    }

    fn reset(&self) {
        *self.pending.lock() = 0;
        self.idle.notify_all();
    }

    /// Blocks until no event is pending or the timeout elapses. Returns
    /// true if idle.
    pub(crate) fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut pending = self.pending.lock();
        while *pending > 0 {
            if self.idle.wait_until(&mut pending, deadline).timed_out() {
                return *pending == 0;
            }
        }
        true
    }
}

/// Sending side of the dispatch queue.
#[derive(Debug, Clone)]
pub(crate) struct Dispatcher {
    tx: Sender<EngineEvent>,
    inflight: Arc<Inflight>,
}

impl Dispatcher {
    /// Creates a queue.
    pub(crate) fn channel() -> (Self, Receiver<EngineEvent>) {
        let (tx, rx) = mpsc::channel();
        let dispatcher = Self {
            tx,
            inflight: Arc::new(Inflight::default()),
        };
        (dispatcher, rx)
    }

    /// Enqueues an event. Events sent after the worker exited are dropped.
    pub(crate) fn dispatch(&self, event: EngineEvent) {
        self.inflight.begin();
        if self.tx.send(event).is_err() {
            self.inflight.finish();
            tracing::trace!("dispatcher stopped; dropping event");
        }
    }

    pub(crate) fn inflight(&self) -> Arc<Inflight> {
        Arc::clone(&self.inflight)
    }
}

/// Clears the pending count when the worker exits, including by panic.
struct ResetOnExit(Arc<Inflight>);

impl Drop for ResetOnExit {
    fn drop(&mut self) {
        self.0.reset();
    }
}

/// Drains the queue until [`EngineEvent::Shutdown`]. Events queued behind
/// the shutdown are discarded.
pub(crate) fn run<H>(rx: Receiver<EngineEvent>, inflight: Arc<Inflight>, mut handle: H)
where
    H: FnMut(EngineEvent),
{
    let _reset = ResetOnExit(Arc::clone(&inflight));
    while let Ok(event) = rx.recv() {
        let stop = matches!(event, EngineEvent::Shutdown);
        if !stop {
            handle(event);
        }
        inflight.finish();
        if stop {
            break;
        }
    }
    tracing::debug!("dispatcher stopped");
}
