//! Partitioned in-memory session store.
//!
//! Sessions live in one of four partitions keyed by [`SessionStatus`]. Each
//! individual operation is atomic; moving a session between partitions is a
//! `remove` followed by an `add`, performed by a caller that holds the
//! session's id lock (see [`SessionLocks`](super::locks::SessionLocks)).

use std::collections::BTreeMap;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::model::{session_key, Session, SessionKey, SessionStatus};

/// Thread-safe session store using one DashMap per partition.
#[derive(Default)]
pub struct SessionStore {
    executing: DashMap<SessionKey, Session>,
    paused: DashMap<SessionKey, Session>,
    cancelled: DashMap<SessionKey, Session>,
    finished: DashMap<SessionKey, Session>,
}

impl SessionStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn partition_map(&self, status: SessionStatus) -> &DashMap<SessionKey, Session> {
        match status {
            SessionStatus::Executing => &self.executing,
            SessionStatus::Paused => &self.paused,
            SessionStatus::Cancelled => &self.cancelled,
            SessionStatus::Finished => &self.finished,
        }
    }

    /// Inserts a session into a partition.
    ///
    /// Returns false, without mutating anything, if the id is already present
    /// in that partition.
    pub fn add(&self, status: SessionStatus, session: Session) -> bool {
        match self.partition_map(status).entry(session.key()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(session);
                true
            }
        }
    }

    /// Overwrites an existing entry. Updating a missing id is logged and ignored.
    pub fn update(&self, status: SessionStatus, session: Session) {
        match self.partition_map(status).get_mut(&session.key()) {
            Some(mut entry) => *entry = session,
            None => {
                tracing::warn!(
                    session_id = %session.id,
                    partition = %status,
                    "Ignoring update for session missing from partition"
                );
            }
        }
    }

    /// Removes and returns an entry, or `None` if absent.
    pub fn take(&self, status: SessionStatus, id: &str) -> Option<Session> {
        self.partition_map(status)
            .remove(&session_key(id))
            .map(|(_, session)| session)
    }

    /// Removes and returns an entry, or a zero-value session if absent.
    pub fn remove(&self, status: SessionStatus, id: &str) -> Session {
        self.take(status, id).unwrap_or_default()
    }

    /// Returns a copy of an entry.
    pub fn get(&self, status: SessionStatus, id: &str) -> Option<Session> {
        self.partition_map(status)
            .get(&session_key(id))
            .map(|entry| entry.value().clone())
    }

    /// Checks whether an id is present in a partition.
    pub fn contains(&self, status: SessionStatus, id: &str) -> bool {
        self.partition_map(status).contains_key(&session_key(id))
    }

    /// Number of sessions in a partition.
    pub fn len(&self, status: SessionStatus) -> usize {
        self.partition_map(status).len()
    }

    /// Whether a partition is empty.
    pub fn is_empty(&self, status: SessionStatus) -> bool {
        self.partition_map(status).is_empty()
    }

    /// Read-only snapshot of a partition, ordered by key.
    pub fn partition(&self, status: SessionStatus) -> BTreeMap<SessionKey, Session> {
        self.partition_map(status)
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// The first key of a partition in key order.
    pub fn first_key(&self, status: SessionStatus) -> Option<SessionKey> {
        self.partition_map(status)
            .iter()
            .map(|entry| entry.key().clone())
            .min()
    }

    /// Drops terminal sessions that ended at or before `now - older_than`.
    ///
    /// Returns the number of sessions removed. Non-terminal partitions are
    /// never reaped.
    pub fn reap(&self, status: SessionStatus, older_than: Duration, now: u64) -> usize {
        if !status.is_terminal() {
            return 0;
        }

        let cutoff = now.saturating_sub(older_than.as_secs());
        let map = self.partition_map(status);
        let before = map.len();
        map.retain(|_, session| session.ended_at.map_or(true, |ended| ended > cutoff));
        before - map.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(id: &str) -> Session {
        Session {
            id: id.to_string(),
            ..Session::default()
        }
    }

    #[test]
    fn test_add_rejects_duplicate_in_same_partition() {
        let store = SessionStore::new();

        assert!(store.add(SessionStatus::Executing, session("focus")));
        assert!(!store.add(SessionStatus::Executing, session("FOCUS")));
        assert_eq!(store.len(SessionStatus::Executing), 1);
    }

    #[test]
    fn test_same_id_allowed_in_different_partitions() {
        let store = SessionStore::new();

        assert!(store.add(SessionStatus::Executing, session("a")));
        assert!(store.add(SessionStatus::Finished, session("a")));
    }

    #[test]
    fn test_duplicate_add_does_not_overwrite() {
        let store = SessionStore::new();
        let mut original = session("a");
        original.current_cycle = 3;
        store.add(SessionStatus::Paused, original);

        store.add(SessionStatus::Paused, session("a"));

        assert_eq!(
            store.get(SessionStatus::Paused, "a").unwrap().current_cycle,
            3
        );
    }

    #[test]
    fn test_update_overwrites_existing() {
        let store = SessionStore::new();
        store.add(SessionStatus::Executing, session("a"));

        let mut changed = session("A");
        changed.elapsed = Duration::from_secs(7);
        store.update(SessionStatus::Executing, changed);

        assert_eq!(
            store.get(SessionStatus::Executing, "a").unwrap().elapsed,
            Duration::from_secs(7)
        );
    }

    #[test]
    fn test_update_missing_is_noop() {
        let store = SessionStore::new();
        store.update(SessionStatus::Executing, session("ghost"));
        assert!(store.is_empty(SessionStatus::Executing));
    }

    #[test]
    fn test_remove_returns_entry_or_default() {
        let store = SessionStore::new();
        store.add(SessionStatus::Paused, session("a"));

        assert_eq!(store.remove(SessionStatus::Paused, "A").id, "a");
        assert_eq!(store.remove(SessionStatus::Paused, "a"), Session::default());
        assert!(store.take(SessionStatus::Paused, "a").is_none());
    }

    #[test]
    fn test_partition_snapshot_and_first_key() {
        let store = SessionStore::new();
        store.add(SessionStatus::Executing, session("zeta"));
        store.add(SessionStatus::Executing, session("Alpha"));

        let snapshot = store.partition(SessionStatus::Executing);
        let keys: Vec<_> = snapshot.keys().cloned().collect();
        assert_eq!(keys, vec!["alpha".to_string(), "zeta".to_string()]);
        assert_eq!(snapshot["alpha"].id, "Alpha");

        assert_eq!(
            store.first_key(SessionStatus::Executing),
            Some("alpha".to_string())
        );
        assert_eq!(store.first_key(SessionStatus::Paused), None);
    }

    #[test]
    fn test_reap_drops_only_old_terminal_sessions() {
        let store = SessionStore::new();

        let mut old = session("old");
        old.ended_at = Some(1_000);
        let mut recent = session("recent");
        recent.ended_at = Some(1_950);
        store.add(SessionStatus::Finished, old.clone());
        store.add(SessionStatus::Finished, recent);
        store.add(SessionStatus::Executing, old);

        let removed = store.reap(SessionStatus::Finished, Duration::from_secs(100), 2_000);
        assert_eq!(removed, 1);
        assert!(store.contains(SessionStatus::Finished, "recent"));
        assert!(!store.contains(SessionStatus::Finished, "old"));

        assert_eq!(
            store.reap(SessionStatus::Executing, Duration::ZERO, 2_000),
            0
        );
        assert!(store.contains(SessionStatus::Executing, "old"));
    }
}
