//! Session timer events and the subscription table that delivers them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use super::model::{Phase, Session};

/// Events emitted by the session timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A session was started fresh (not resumed).
    Started(Session),
    /// The phase clock advanced.
    Progress(Session),
    /// A phase reached its target duration.
    PhaseCompleted { session: Session, phase: Phase },
    /// A tick elapsed while waiting between phases.
    DelayElapsed { session: Session, elapsed: Duration },
    /// The session reached its target cycle count and left the store.
    Completed(Session),
}

/// Handle returned by [`EventBus::subscribe`].
pub type SubscriptionId = u64;

type Handler = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

/// Subscription table for session events.
///
/// Handlers run synchronously on the emitting task, so they must not block.
/// Each event reaches every handler registered at emission time exactly once.
#[derive(Default)]
pub struct EventBus {
    handlers: DashMap<SubscriptionId, Handler>,
    next_id: AtomicU64,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers.insert(id, Arc::new(handler));
        id
    }

    /// Remove a handler. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.handlers.remove(&id).is_some()
    }

    /// Deliver an event to every handler.
    pub fn emit(&self, event: &SessionEvent) {
        // Handlers may (un)subscribe re-entrantly; never call them while
        // holding a shard guard.
        let handlers: Vec<Handler> = self
            .handlers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        for handler in handlers {
            handler(event);
        }
    }
}
