//! Per-session-id mutual exclusion.
//!
//! Every mutation of a single session id (store moves, timer start/stop and
//! ticks) runs while holding that id's lock, so a pause or cancel can never
//! interleave with the same session's tick.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::model::{session_key, SessionKey};

/// Registry of async mutexes keyed by session id.
#[derive(Default)]
pub struct SessionLocks {
    locks: DashMap<SessionKey, Arc<Mutex<()>>>,
}

impl SessionLocks {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the lock for an id, creating it on first use.
    pub async fn lock(&self, id: &str) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(session_key(id))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        // The DashMap guard is released above; only the id mutex is awaited.
        mutex.lock_owned().await
    }

    /// Drops lock entries nobody is holding or waiting on.
    pub fn prune(&self) {
        self.locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
    }

    /// Number of tracked ids.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no ids are tracked.
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_id_is_exclusive_case_insensitively() {
        let locks = Arc::new(SessionLocks::new());
        let guard = locks.lock("Focus").await;

        let contender = Arc::clone(&locks);
        let handle = tokio::spawn(async move {
            let _guard = contender.lock("focus").await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        drop(guard);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_different_ids_do_not_block() {
        let locks = SessionLocks::new();
        let _a = locks.lock("a").await;
        let _b = tokio::time::timeout(Duration::from_millis(100), locks.lock("b"))
            .await
            .expect("lock for another id should be free");
    }

    #[tokio::test]
    async fn test_prune_keeps_held_locks() {
        let locks = SessionLocks::new();
        let held = locks.lock("held").await;
        drop(locks.lock("released").await);

        locks.prune();

        assert_eq!(locks.len(), 1);
        drop(held);
        locks.prune();
        assert!(locks.is_empty());
    }
}
