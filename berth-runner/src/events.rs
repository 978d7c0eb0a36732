//! Run event bus
//!
//! Synchronous in-process fan-out of [`RunEvent`]s to registered listeners.
//! Emission iterates a snapshot of the listener list taken at emit time, so
//! listeners registered afterwards never see the event retroactively. Each
//! callback runs under `catch_unwind`: a panicking listener is logged and
//! never blocks its siblings or the emitting control flow.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use tracing::warn;

use berth_core::domain::event::RunEvent;

/// Callback invoked for every emitted event.
pub type Listener = Arc<dyn Fn(&RunEvent) + Send + Sync>;

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct BusInner {
    next_id: u64,
    listeners: Vec<(SubscriptionId, Listener)>,
}

/// Synchronous publish/subscribe bus for run events.
///
/// Cheap to clone; clones share the same listener list.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener for all subsequent events.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&RunEvent) + Send + Sync + 'static,
    {
        // Listeners run outside this lock, so it cannot be poisoned by
        // a listener panic.
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.next_id += 1;
        let id = SubscriptionId(inner.next_id);
        inner.listeners.push((id, Arc::new(listener)));
        id
    }

    /// Removes a listener. Returns false if the id was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let before = inner.listeners.len();
        inner.listeners.retain(|(lid, _)| *lid != id);
        inner.listeners.len() != before
    }

    /// Delivers an event to every currently registered listener, in
    /// subscription order.
    pub fn emit(&self, event: &RunEvent) {
        let snapshot: Vec<(SubscriptionId, Listener)> = {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.listeners.clone()
        };

        for (id, listener) in snapshot {
            let result = panic::catch_unwind(AssertUnwindSafe(|| listener(event)));
            if result.is_err() {
                warn!(subscription = id.0, "event listener panicked; continuing fan-out");
            }
        }
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .listeners
            .len()
    }
}
