//! Desktop notification boundary.
//!
//! OS-specific delivery lives behind [`Notifier`]. The daemon ships with
//! [`TracingNotifier`], which records notifications as structured log events.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use thiserror::Error;
use tracing::info;

/// Sound cue attached to a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundKind {
    /// A session began.
    SessionStart,
    /// A focus phase ended.
    FocusComplete,
    /// A break phase ended.
    BreakComplete,
    /// The session reached its target cycles.
    SessionComplete,
}

/// A desktop notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub summary: String,
    pub body: String,
    pub sound: SoundKind,
}

impl Notification {
    pub fn new(summary: impl Into<String>, body: impl Into<String>, sound: SoundKind) -> Self {
        Self {
            summary: summary.into(),
            body: body.into(),
            sound,
        }
    }
}

/// Notification delivery errors.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

/// Delivers desktop notifications. Best effort: callers log failures.
pub trait Notifier: Send + Sync + 'static {
    /// Raises a notification.
    fn notify(
        &self,
        notification: Notification,
    ) -> impl Future<Output = Result<(), NotifyError>> + Send;

    /// Closes the most recently raised notification, if any is still shown.
    fn close_last(&self) -> impl Future<Output = Result<(), NotifyError>> + Send;
}

/// Notifier that writes notifications to the log.
#[derive(Debug, Default)]
pub struct TracingNotifier {
    next_id: AtomicU64,
    shown: Mutex<Option<u64>>,
}

impl TracingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of the notification currently shown.
    pub fn current(&self) -> Option<u64> {
        self.shown.lock().ok().and_then(|shown| *shown)
    }
}

impl Notifier for TracingNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            notification_id = id,
            summary = %notification.summary,
            body = %notification.body,
            sound = ?notification.sound,
            "Notification raised"
        );
        let mut shown = self
            .shown
            .lock()
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;
        *shown = Some(id);
        Ok(())
    }

    async fn close_last(&self) -> Result<(), NotifyError> {
        let mut shown = self
            .shown
            .lock()
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;
        if let Some(id) = shown.take() {
            info!(notification_id = id, "Notification closed");
        }
        Ok(())
    }
}
