//! Per-session periodic clocks.
//!
//! Each running session owns one tokio task driving a `tokio::time::interval`.
//! A tick acquires the session's id lock, re-checks that its clock is still
//! the registered one, then advances the session through
//! [`Session::advance`] and publishes the resulting events on the
//! [`EventBus`].
//!
//! [`SessionTimer::start`] and [`SessionTimer::stop`] expect the caller to
//! hold the id lock for the session they touch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::events::{EventBus, SessionEvent, SubscriptionId};
use super::locks::SessionLocks;
use super::model::{session_key, Session, SessionKey, SessionStatus};
use super::store::SessionStore;

/// Default clock period.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(1000);

/// Why a session is being handed to the timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartKind {
    /// A new session; emits [`SessionEvent::Started`].
    Fresh,
    /// A paused session picking up where it left off; emits nothing.
    Resume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClockMode {
    Realtime,
    Manual,
}

struct ClockHandle {
    token: CancellationToken,
    generation: u64,
}

/// Drives every running session.
pub struct SessionTimer {
    store: Arc<SessionStore>,
    locks: Arc<SessionLocks>,
    events: EventBus,
    clocks: DashMap<SessionKey, ClockHandle>,
    tick_interval: Duration,
    mode: ClockMode,
    next_generation: AtomicU64,
}

impl SessionTimer {
    /// Creates a timer whose clocks tick every `tick_interval`.
    pub fn new(store: Arc<SessionStore>, locks: Arc<SessionLocks>, tick_interval: Duration) -> Self {
        Self::with_mode(store, locks, tick_interval, ClockMode::Realtime)
    }

    /// Creates a timer that registers clocks but never spawns them.
    ///
    /// Sessions only advance through [`SessionTimer::tick`], each call moving
    /// them forward by `tick_interval`.
    pub fn manual(
        store: Arc<SessionStore>,
        locks: Arc<SessionLocks>,
        tick_interval: Duration,
    ) -> Self {
        Self::with_mode(store, locks, tick_interval, ClockMode::Manual)
    }

    fn with_mode(
        store: Arc<SessionStore>,
        locks: Arc<SessionLocks>,
        tick_interval: Duration,
        mode: ClockMode,
    ) -> Self {
        Self {
            store,
            locks,
            events: EventBus::new(),
            clocks: DashMap::new(),
            tick_interval,
            mode,
            next_generation: AtomicU64::new(0),
        }
    }

    /// The clock period.
    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    /// The store clocks persist into.
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// The id locks ticks acquire.
    pub fn locks(&self) -> &Arc<SessionLocks> {
        &self.locks
    }

    /// Registers an event handler.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(handler)
    }

    /// Removes an event handler.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    /// Adds the session to Executing and starts its clock.
    ///
    /// Returns false without side effects if the id is already executing.
    /// The clock runs under a child of `cancellation`.
    pub fn start(
        self: &Arc<Self>,
        mut session: Session,
        kind: StartKind,
        cancellation: &CancellationToken,
    ) -> bool {
        session.status = SessionStatus::Executing;
        session.ended_at = None;
        let key = session.key();

        if !self.store.add(SessionStatus::Executing, session.clone()) {
            debug!(session_id = %session.id, "Session already executing, not starting clock");
            return false;
        }

        let token = cancellation.child_token();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        if let Some(previous) = self.clocks.insert(
            key.clone(),
            ClockHandle {
                token: token.clone(),
                generation,
            },
        ) {
            previous.token.cancel();
        }

        if self.mode == ClockMode::Realtime {
            let timer = Arc::clone(self);
            tokio::spawn(async move {
                timer.run_clock(key, token, generation).await;
            });
        }

        info!(
            session_id = %session.id,
            phase = %session.current_phase,
            cycle = session.current_cycle,
            resumed = kind == StartKind::Resume,
            "Session clock started"
        );

        if kind == StartKind::Fresh {
            self.events.emit(&SessionEvent::Started(session));
        }
        true
    }

    async fn run_clock(&self, key: SessionKey, token: CancellationToken, generation: u64) {
        let period = self.tick_interval;
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {
                    if !self.advance_clock(&key, Some(generation)).await {
                        break;
                    }
                }
            }
        }

        self.clocks
            .remove_if(&key, |_, handle| handle.generation == generation);
        debug!(session_key = %key, generation, "Session clock exited");
    }

    /// Advances a running session by one tick right now.
    ///
    /// Returns false if the session has no registered clock or completed on
    /// this tick.
    pub async fn tick(&self, id: &str) -> bool {
        self.advance_clock(&session_key(id), None).await
    }

    async fn advance_clock(&self, key: &SessionKey, generation: Option<u64>) -> bool {
        let _guard = self.locks.lock(key).await;

        let registered = match self.clocks.get(key) {
            Some(handle) => {
                !handle.token.is_cancelled()
                    && generation.map_or(true, |g| g == handle.generation)
            }
            None => false,
        };
        if !registered {
            return false;
        }

        let Some(mut session) = self.store.get(SessionStatus::Executing, key) else {
            self.release_clock(key);
            return false;
        };

        let outcome = session.advance(self.tick_interval);

        if outcome.completed {
            for event in &outcome.events {
                self.events.emit(event);
            }
            self.store.take(SessionStatus::Executing, key);
            self.release_clock(key);
            info!(
                session_id = %session.id,
                cycles = session.current_cycle,
                "Session completed"
            );
            self.events.emit(&SessionEvent::Completed(session));
            return false;
        }

        self.store.update(SessionStatus::Executing, session);
        for event in &outcome.events {
            self.events.emit(event);
        }
        true
    }

    fn release_clock(&self, key: &SessionKey) {
        if let Some((_, handle)) = self.clocks.remove(key) {
            handle.token.cancel();
        }
    }

    /// Stops the clock for `id`.
    ///
    /// Returns the session as last persisted in Executing; the caller is
    /// responsible for moving it out of that partition.
    pub fn stop(&self, id: &str) -> Option<Session> {
        let key = session_key(id);
        self.release_clock(&key);
        self.store.get(SessionStatus::Executing, &key)
    }

    /// Stops every clock, returning each executing session in its
    /// last-persisted state.
    pub async fn stop_all(&self) -> Vec<Session> {
        let mut keys: Vec<SessionKey> = self
            .clocks
            .iter()
            .map(|entry| entry.key().clone())
            .chain(self.store.partition(SessionStatus::Executing).into_keys())
            .collect();
        keys.sort();
        keys.dedup();

        let mut stopped = Vec::with_capacity(keys.len());
        for key in keys {
            let _guard = self.locks.lock(&key).await;
            if let Some(session) = self.stop(&key) {
                stopped.push(session);
            }
        }

        info!(count = stopped.len(), "Stopped all session clocks");
        stopped
    }

    /// Whether `id` has a registered clock.
    pub fn is_running(&self, id: &str) -> bool {
        self.clocks.contains_key(&session_key(id))
    }

    /// Number of registered clocks.
    pub fn running_count(&self) -> usize {
        self.clocks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::model::{Phase, SessionConfig};
    use std::sync::Mutex;

    const SECOND: Duration = Duration::from_secs(1);

    struct Harness {
        store: Arc<SessionStore>,
        timer: Arc<SessionTimer>,
        events: Arc<Mutex<Vec<SessionEvent>>>,
        token: CancellationToken,
    }

    fn harness() -> Harness {
        let store = Arc::new(SessionStore::new());
        let locks = Arc::new(SessionLocks::new());
        let timer = Arc::new(SessionTimer::manual(Arc::clone(&store), locks, SECOND));
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        timer.subscribe(move |e| sink.lock().unwrap().push(e.clone()));
        Harness {
            store,
            timer,
            events,
            token: CancellationToken::new(),
        }
    }

    fn session(id: &str, focus: u64, brk: u64) -> Session {
        let config = SessionConfig::new(id, Duration::from_secs(focus), Duration::from_secs(brk));
        Session::from_config(id, &config)
    }

    impl Harness {
        async fn ticks(&self, id: &str, n: usize) {
            for _ in 0..n {
                self.timer.tick(id).await;
            }
        }

        fn count(&self, pred: impl Fn(&SessionEvent) -> bool) -> usize {
            self.events.lock().unwrap().iter().filter(|e| pred(e)).count()
        }
    }

    #[tokio::test]
    async fn test_fresh_start_emits_started() {
        let h = harness();

        assert!(h.timer.start(session("a", 10, 5), StartKind::Fresh, &h.token));

        assert!(h.timer.is_running("A"));
        assert!(h.store.contains(SessionStatus::Executing, "a"));
        assert_eq!(h.count(|e| matches!(e, SessionEvent::Started(_))), 1);
    }

    #[tokio::test]
    async fn test_resume_start_emits_nothing() {
        let h = harness();

        assert!(h.timer.start(session("a", 10, 5), StartKind::Resume, &h.token));

        assert!(h.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_start_is_rejected_silently() {
        let h = harness();
        h.timer.start(session("a", 10, 5), StartKind::Fresh, &h.token);

        assert!(!h.timer.start(session("A", 99, 5), StartKind::Fresh, &h.token));

        assert_eq!(h.count(|e| matches!(e, SessionEvent::Started(_))), 1);
        assert_eq!(
            h.store
                .get(SessionStatus::Executing, "a")
                .unwrap()
                .focus_duration,
            Duration::from_secs(10)
        );
    }

    #[tokio::test]
    async fn test_ten_ticks_complete_focus_phase() {
        let h = harness();
        h.timer.start(session("a", 10, 5), StartKind::Fresh, &h.token);

        h.ticks("a", 10).await;

        assert_eq!(
            h.count(|e| matches!(e, SessionEvent::PhaseCompleted { phase: Phase::Focus, .. })),
            1
        );
        let stored = h.store.get(SessionStatus::Executing, "a").unwrap();
        assert_eq!(stored.current_phase, Phase::Break);
        assert_eq!(stored.elapsed, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_progress_is_persisted_before_emission() {
        let h = harness();
        h.timer.start(session("a", 10, 5), StartKind::Fresh, &h.token);

        let store = Arc::clone(&h.store);
        let observed = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&observed);
        h.timer.subscribe(move |e| {
            if let SessionEvent::Progress(s) = e {
                let stored = store.get(SessionStatus::Executing, &s.id).unwrap();
                sink.lock().unwrap().push(stored.elapsed == s.elapsed);
            }
        });

        h.ticks("a", 3).await;
        assert_eq!(*observed.lock().unwrap(), vec![true, true, true]);
    }

    #[tokio::test]
    async fn test_target_cycle_moves_session_out_and_completes_once() {
        let h = harness();
        let mut s = session("a", 2, 2);
        s.target_cycles = 1;
        h.timer.start(s, StartKind::Fresh, &h.token);

        h.ticks("a", 4).await;
        // Further ticks after completion are no-ops.
        assert!(!h.timer.tick("a").await);

        assert!(!h.store.contains(SessionStatus::Executing, "a"));
        assert!(!h.timer.is_running("a"));
        assert_eq!(h.count(|e| matches!(e, SessionEvent::Completed(_))), 1);

        let events = h.events.lock().unwrap();
        assert!(matches!(events.last(), Some(SessionEvent::Completed(s)) if s.current_cycle == 1));
    }

    #[tokio::test]
    async fn test_stop_returns_last_persisted_session() {
        let h = harness();
        h.timer.start(session("a", 10, 5), StartKind::Fresh, &h.token);
        h.ticks("a", 4).await;

        let stopped = h.timer.stop("a").unwrap();

        assert_eq!(stopped.elapsed, Duration::from_secs(4));
        assert!(!h.timer.is_running("a"));
        assert!(!h.timer.tick("a").await);
        // The caller owns the partition move.
        assert!(h.store.contains(SessionStatus::Executing, "a"));
    }

    #[tokio::test]
    async fn test_stop_unknown_returns_none() {
        let h = harness();
        assert!(h.timer.stop("ghost").is_none());
    }

    #[tokio::test]
    async fn test_delay_ticks_emit_delay_elapsed() {
        let h = harness();
        let mut s = session("a", 2, 2);
        s.delay_between_phases = Duration::from_secs(2);
        h.timer.start(s, StartKind::Fresh, &h.token);

        h.ticks("a", 2).await;
        assert_eq!(h.count(|e| matches!(e, SessionEvent::DelayElapsed { .. })), 0);

        h.ticks("a", 2).await;
        assert_eq!(h.count(|e| matches!(e, SessionEvent::DelayElapsed { .. })), 2);

        h.ticks("a", 1).await;
        assert_eq!(h.count(|e| matches!(e, SessionEvent::DelayElapsed { .. })), 2);
        let stored = h.store.get(SessionStatus::Executing, "a").unwrap();
        assert_eq!(stored.current_phase, Phase::Break);
        assert_eq!(stored.elapsed, SECOND);
    }

    #[tokio::test]
    async fn test_stop_all_returns_every_executing_session() {
        let h = harness();
        h.timer.start(session("a", 10, 5), StartKind::Fresh, &h.token);
        h.timer.start(session("b", 10, 5), StartKind::Fresh, &h.token);
        h.ticks("b", 2).await;

        let mut stopped = h.timer.stop_all().await;
        stopped.sort_by(|x, y| x.id.cmp(&y.id));

        assert_eq!(stopped.len(), 2);
        assert_eq!(stopped[1].elapsed, Duration::from_secs(2));
        assert_eq!(h.timer.running_count(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribed_handler_receives_nothing() {
        let h = harness();
        let extra = Arc::new(Mutex::new(0usize));
        let sink = Arc::clone(&extra);
        let id = h.timer.subscribe(move |_| *sink.lock().unwrap() += 1);
        assert!(h.timer.unsubscribe(id));

        h.timer.start(session("a", 10, 5), StartKind::Fresh, &h.token);
        h.ticks("a", 2).await;

        assert_eq!(*extra.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_realtime_clock_advances_and_stops_on_cancel() {
        let store = Arc::new(SessionStore::new());
        let timer = Arc::new(SessionTimer::new(
            Arc::clone(&store),
            Arc::new(SessionLocks::new()),
            Duration::from_millis(10),
        ));
        let token = CancellationToken::new();
        timer.start(session("a", 60, 5), StartKind::Fresh, &token);

        tokio::time::sleep(Duration::from_millis(120)).await;
        let elapsed = store.get(SessionStatus::Executing, "a").unwrap().elapsed;
        assert!(elapsed >= Duration::from_millis(30));

        token.cancel();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!timer.is_running("a"));

        let frozen = store.get(SessionStatus::Executing, "a").unwrap().elapsed;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            store.get(SessionStatus::Executing, "a").unwrap().elapsed,
            frozen
        );
    }
}
