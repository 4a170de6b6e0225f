//! Session command service.
//!
//! Validates session commands, moves sessions between store partitions under
//! their id lock, and turns timer events into output lines and desktop
//! notifications.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::duration::{format_clock, format_compact};
use super::error::SessionError;
use super::events::{SessionEvent, SubscriptionId};
use super::locks::SessionLocks;
use super::model::{
    session_key, unix_now, Phase, Session, SessionKey, SessionStatus, MAX_ID_LEN,
};
use super::store::SessionStore;
use super::templates::ConfigProvider;
use super::timer::{SessionTimer, StartKind};
use crate::lifecycle::Lifecycle;
use crate::notify::{Notification, Notifier, SoundKind};
use crate::output::OutputSink;

/// Default retention for cancelled and finished sessions.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(3600);

/// Default period of the reaper task.
pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(60);

/// Outcome of a session command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationResult {
    pub success: bool,
    pub message: String,
}

impl OperationResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

impl From<Result<String, SessionError>> for OperationResult {
    fn from(result: Result<String, SessionError>) -> Self {
        match result {
            Ok(message) => Self::ok(message),
            Err(e) => Self::failed(e.to_string()),
        }
    }
}

#[derive(Default)]
struct ServiceRuntime {
    subscription: Option<SubscriptionId>,
    token: Option<CancellationToken>,
    notifier_task: Option<JoinHandle<()>>,
    reaper_task: Option<JoinHandle<()>>,
}

/// Owns the session lifecycle: start, pause, resume, cancel.
pub struct SessionService<N: Notifier> {
    store: Arc<SessionStore>,
    locks: Arc<SessionLocks>,
    timer: Arc<SessionTimer>,
    configs: Arc<dyn ConfigProvider>,
    output: Arc<dyn OutputSink>,
    notifier: Arc<N>,
    shutdown: CancellationToken,
    retention: Duration,
    reap_interval: Duration,
    runtime: Mutex<ServiceRuntime>,
}

impl<N: Notifier> SessionService<N> {
    /// Creates a service driving sessions through `timer`.
    ///
    /// Session clocks run under children of `shutdown`.
    pub fn new(
        timer: Arc<SessionTimer>,
        configs: Arc<dyn ConfigProvider>,
        output: Arc<dyn OutputSink>,
        notifier: Arc<N>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store: Arc::clone(timer.store()),
            locks: Arc::clone(timer.locks()),
            timer,
            configs,
            output,
            notifier,
            shutdown,
            retention: DEFAULT_RETENTION,
            reap_interval: DEFAULT_REAP_INTERVAL,
            runtime: Mutex::new(ServiceRuntime::default()),
        }
    }

    /// Sets how long terminal sessions are kept, and how often they are
    /// reaped. A zero retention keeps them forever.
    pub fn with_retention(mut self, retention: Duration, reap_interval: Duration) -> Self {
        self.retention = retention;
        self.reap_interval = reap_interval;
        self
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn timer(&self) -> &Arc<SessionTimer> {
        &self.timer
    }

    /// Starts a session from a template.
    ///
    /// An empty `config_id` selects the default template; an empty `id`
    /// names the session after its template.
    pub async fn start_session(&self, id: &str, config_id: &str) -> OperationResult {
        self.try_start(id.trim(), config_id.trim()).await.into()
    }

    async fn try_start(&self, id: &str, config_id: &str) -> Result<String, SessionError> {
        let config = if config_id.is_empty() {
            self.configs.default_config()
        } else {
            self.configs.lookup(config_id).ok_or_else(|| {
                SessionError::NotFound(format!("No session config with id '{config_id}'"))
            })?
        };

        let id = if id.is_empty() { config.id.as_str() } else { id };
        if id.chars().count() > MAX_ID_LEN {
            return Err(SessionError::Validation(format!(
                "Session id must be at most {MAX_ID_LEN} characters"
            )));
        }
        let key = session_key(id);
        let _guard = self.locks.lock(&key).await;

        if self.store.contains(SessionStatus::Executing, &key)
            || self.store.contains(SessionStatus::Paused, &key)
        {
            return Err(SessionError::Conflict(format!(
                "Session '{id}' already exists"
            )));
        }

        let session = Session::from_config(id, &config);
        if !self.timer.start(session, StartKind::Fresh, &self.shutdown) {
            return Err(SessionError::Conflict(format!(
                "Session '{id}' already exists"
            )));
        }

        info!(session_id = %id, config_id = %config.id, "Session started");
        Ok(format!(
            "Session '{id}' started (focus {}, break {})",
            format_compact(config.focus_duration),
            format_compact(config.break_duration)
        ))
    }

    /// Picks the key a command acts on: the given id, or the first key of
    /// the first non-empty partition in `from`.
    fn target(&self, id: &str, from: &[SessionStatus], label: &str) -> Result<SessionKey, SessionError> {
        let id = id.trim();
        if from.iter().all(|status| self.store.is_empty(*status)) {
            return Err(SessionError::NotFound(format!("No {label} sessions")));
        }
        if !id.is_empty() {
            return Ok(session_key(id));
        }
        from.iter()
            .find_map(|status| self.store.first_key(*status))
            .ok_or_else(|| SessionError::NotFound(format!("No {label} sessions")))
    }

    /// Pauses an executing session, preserving its elapsed time.
    pub async fn pause_session(&self, id: &str) -> OperationResult {
        self.try_pause(id).await.into()
    }

    async fn try_pause(&self, id: &str) -> Result<String, SessionError> {
        let key = self.target(id, &[SessionStatus::Executing], "executing")?;
        let _guard = self.locks.lock(&key).await;

        if !self.store.contains(SessionStatus::Executing, &key) {
            return Err(SessionError::NotFound(format!(
                "No executing session with id '{}'",
                id.trim()
            )));
        }

        self.timer.stop(&key);
        let mut session = self.store.remove(SessionStatus::Executing, &key);
        session.status = SessionStatus::Paused;
        self.store.add(SessionStatus::Paused, session.clone());

        info!(
            session_id = %session.id,
            elapsed_secs = session.elapsed.as_secs(),
            "Session paused"
        );
        Ok(format!(
            "Session '{}' paused at {} {}",
            session.id,
            session.current_phase,
            format_clock(session.elapsed)
        ))
    }

    /// Resumes a paused session from where it stopped.
    pub async fn resume_session(&self, id: &str) -> OperationResult {
        self.try_resume(id).await.into()
    }

    async fn try_resume(&self, id: &str) -> Result<String, SessionError> {
        let key = self.target(id, &[SessionStatus::Paused], "paused")?;
        let _guard = self.locks.lock(&key).await;

        let Some(session) = self.store.take(SessionStatus::Paused, &key) else {
            return Err(SessionError::NotFound(format!(
                "No paused session with id '{}'",
                id.trim()
            )));
        };

        let name = session.id.clone();
        if !self
            .timer
            .start(session.clone(), StartKind::Resume, &self.shutdown)
        {
            self.store.add(SessionStatus::Paused, session);
            return Err(SessionError::Conflict(format!(
                "Session '{name}' is already executing"
            )));
        }

        info!(session_id = %name, "Session resumed");
        Ok(format!(
            "Session '{name}' resumed at {} {}",
            session.current_phase,
            format_clock(session.elapsed)
        ))
    }

    /// Cancels an executing or paused session.
    pub async fn cancel_session(&self, id: &str) -> OperationResult {
        self.try_cancel(id).await.into()
    }

    async fn try_cancel(&self, id: &str) -> Result<String, SessionError> {
        let key = self.target(
            id,
            &[SessionStatus::Executing, SessionStatus::Paused],
            "started",
        )?;
        let _guard = self.locks.lock(&key).await;

        let session = if self.store.contains(SessionStatus::Executing, &key) {
            self.timer.stop(&key);
            self.store.take(SessionStatus::Executing, &key)
        } else {
            self.store.take(SessionStatus::Paused, &key)
        };
        let Some(mut session) = session else {
            return Err(SessionError::NotFound(format!(
                "No started session with id '{}'",
                id.trim()
            )));
        };

        session.mark_ended(SessionStatus::Cancelled);
        record_terminal(&self.store, SessionStatus::Cancelled, session.clone());

        info!(session_id = %session.id, "Session cancelled");
        Ok(format!("Session '{}' cancelled", session.id))
    }

    /// Every known session, grouped by partition and ordered by id.
    pub fn sessions(&self) -> Vec<Session> {
        SessionStatus::ALL
            .iter()
            .flat_map(|status| self.store.partition(*status).into_values())
            .collect()
    }

    /// Lists every known session, one summary per line.
    pub fn list_sessions(&self) -> OperationResult {
        let sessions = self.sessions();
        if sessions.is_empty() {
            return OperationResult::ok("No sessions");
        }
        let lines: Vec<String> = sessions.iter().map(Session::summary).collect();
        OperationResult::ok(lines.join("\n"))
    }

    fn spawn_reaper(&self, token: CancellationToken) -> Option<JoinHandle<()>> {
        if self.retention.is_zero() {
            return None;
        }

        let store = Arc::clone(&self.store);
        let locks = Arc::clone(&self.locks);
        let retention = self.retention;
        let period = self.reap_interval.max(Duration::from_secs(1));
        Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(period) => {
                        let now = unix_now();
                        let removed = store.reap(SessionStatus::Cancelled, retention, now)
                            + store.reap(SessionStatus::Finished, retention, now);
                        if removed > 0 {
                            locks.prune();
                            info!(removed, "Reaped ended sessions");
                        }
                    }
                }
            }
        }))
    }
}

/// Adds a session to a terminal partition, replacing an earlier entry with
/// the same id.
fn record_terminal(store: &SessionStore, status: SessionStatus, session: Session) {
    if !store.add(status, session.clone()) {
        store.update(status, session);
    }
}

/// Turns one timer event into output lines, notifications and store moves.
fn handle_event(
    event: &SessionEvent,
    output: &dyn OutputSink,
    store: &SessionStore,
    notifications: &mpsc::UnboundedSender<Notification>,
) {
    let raise = |notification: Notification| {
        if notifications.send(notification).is_err() {
            debug!("Notifier worker stopped, dropping notification");
        }
    };

    match event {
        SessionEvent::Progress(s) => {
            output.queue_message(format!(
                "[{}] {} {} / {} (cycle {})",
                s.id,
                s.current_phase,
                format_clock(s.elapsed),
                format_clock(s.phase_duration()),
                s.current_cycle + 1
            ));
        }
        SessionEvent::PhaseCompleted { session: s, phase } => {
            output.queue_message(format!(
                "[{}] {} complete (cycle {})",
                s.id,
                phase,
                s.current_cycle + 1
            ));
            raise(match phase {
                Phase::Focus => Notification::new(
                    "Focus complete",
                    format!("{}: time for a {} break", s.id, format_compact(s.break_duration)),
                    SoundKind::FocusComplete,
                ),
                Phase::Break => Notification::new(
                    "Break over",
                    format!("{}: back to focus", s.id),
                    SoundKind::BreakComplete,
                ),
            });
        }
        SessionEvent::DelayElapsed { session: s, elapsed } => {
            output.queue_message(format!(
                "[{}] Waiting {} / {} before {}",
                s.id,
                format_clock(*elapsed),
                format_clock(s.delay_between_phases),
                s.current_phase
            ));
        }
        SessionEvent::Started(s) => {
            output.queue_message(format!("[{}] Session started from '{}'", s.id, s.config_id));
            raise(Notification::new(
                "Session started",
                format!(
                    "{}: focus {}, break {}",
                    s.id,
                    format_compact(s.focus_duration),
                    format_compact(s.break_duration)
                ),
                SoundKind::SessionStart,
            ));
        }
        SessionEvent::Completed(s) => {
            let mut finished = s.clone();
            finished.mark_ended(SessionStatus::Finished);
            record_terminal(store, SessionStatus::Finished, finished);

            output.queue_message(format!(
                "[{}] Session finished after {} cycle(s)",
                s.id, s.current_cycle
            ));
            raise(Notification::new(
                "Session complete",
                format!("{}: {} cycle(s) done", s.id, s.current_cycle),
                SoundKind::SessionComplete,
            ));
        }
    }
}

async fn run_notifier<N: Notifier>(notifier: Arc<N>, mut rx: mpsc::UnboundedReceiver<Notification>) {
    while let Some(notification) = rx.recv().await {
        if let Err(e) = notifier.close_last().await {
            warn!(error = %e, "Failed to close previous notification");
        }
        if let Err(e) = notifier.notify(notification).await {
            warn!(error = %e, "Failed to raise notification");
        }
    }
}

impl<N: Notifier> Lifecycle for SessionService<N> {
    fn name(&self) -> &'static str {
        "sessions"
    }

    async fn start(&self) -> Result<()> {
        let mut runtime = self.runtime.lock().unwrap_or_else(PoisonError::into_inner);
        if runtime.subscription.is_some() {
            bail!("session service already started");
        }

        let token = self.shutdown.child_token();
        let (tx, rx) = mpsc::unbounded_channel();
        runtime.notifier_task = Some(tokio::spawn(run_notifier(Arc::clone(&self.notifier), rx)));

        let output = Arc::clone(&self.output);
        let store = Arc::clone(&self.store);
        runtime.subscription = Some(
            self.timer
                .subscribe(move |event| handle_event(event, output.as_ref(), &store, &tx)),
        );

        runtime.reaper_task = self.spawn_reaper(token.clone());
        runtime.token = Some(token);

        info!(
            retention_secs = self.retention.as_secs(),
            "Session service started"
        );
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let runtime = {
            let mut runtime = self.runtime.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *runtime)
        };

        if let Some(subscription) = runtime.subscription {
            self.timer.unsubscribe(subscription);
        }

        let stopped = self.timer.stop_all().await;
        info!(sessions = stopped.len(), "Session clocks stopped");

        if let Some(token) = runtime.token {
            token.cancel();
        }
        if let Some(task) = runtime.reaper_task {
            let _ = task.await;
        }
        // The worker exits once the unsubscribed handler drops its sender.
        if let Some(task) = runtime.notifier_task {
            if tokio::time::timeout(Duration::from_secs(2), task).await.is_err() {
                warn!("Notifier worker did not drain in time");
            }
        }
        Ok(())
    }
}
