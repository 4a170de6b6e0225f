//! Session data model and the per-tick phase state machine.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use super::duration::{format_clock, secs};
use super::events::SessionEvent;

/// Normalized, case-insensitive session identifier used as a map key.
pub type SessionKey = String;

/// Longest accepted session or template id, in characters.
pub const MAX_ID_LEN: usize = 64;

/// Build the lookup key for a session id.
pub fn session_key(id: &str) -> SessionKey {
    id.trim().to_lowercase()
}

/// The two interval kinds a cycle alternates between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Phase {
    #[default]
    Focus,
    Break,
}

impl Phase {
    /// The phase that follows this one.
    pub fn next(self) -> Self {
        match self {
            Phase::Focus => Phase::Break,
            Phase::Break => Phase::Focus,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Focus => write!(f, "Focus"),
            Phase::Break => write!(f, "Break"),
        }
    }
}

/// Lifecycle state of a session; each value names one store partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SessionStatus {
    #[default]
    Executing,
    Paused,
    Cancelled,
    Finished,
}

impl SessionStatus {
    /// Every status, in partition order.
    pub const ALL: [SessionStatus; 4] = [
        SessionStatus::Executing,
        SessionStatus::Paused,
        SessionStatus::Cancelled,
        SessionStatus::Finished,
    ];

    /// Whether sessions in this state are only retained for inspection.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Cancelled | SessionStatus::Finished)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionStatus::Executing => "executing",
            SessionStatus::Paused => "paused",
            SessionStatus::Cancelled => "cancelled",
            SessionStatus::Finished => "finished",
        };
        f.write_str(label)
    }
}

/// A named template from which sessions are instantiated.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Template identifier.
    pub id: String,

    /// Number of Focus+Break cycles to run; 0 runs until cancelled.
    #[serde(default)]
    pub target_cycles: u32,

    /// Pause inserted after each phase before the next one starts.
    #[serde(rename = "delay_secs", with = "secs", default)]
    pub delay_between_phases: Duration,

    /// Length of a focus phase.
    #[serde(rename = "focus_secs", with = "secs")]
    pub focus_duration: Duration,

    /// Length of a break phase.
    #[serde(rename = "break_secs", with = "secs")]
    pub break_duration: Duration,
}

impl SessionConfig {
    /// Create a template with no delay and unlimited cycles.
    pub fn new(id: impl Into<String>, focus: Duration, brk: Duration) -> Self {
        Self {
            id: id.into(),
            target_cycles: 0,
            delay_between_phases: Duration::ZERO,
            focus_duration: focus,
            break_duration: brk,
        }
    }

    /// Set the number of cycles, builder style.
    pub fn with_target_cycles(mut self, cycles: u32) -> Self {
        self.target_cycles = cycles;
        self
    }

    /// Set the inter-phase delay, builder style.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_between_phases = delay;
        self
    }
}

/// One running instance of a focus/break schedule.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Session {
    pub id: String,
    pub config_id: String,
    pub target_cycles: u32,
    pub delay_between_phases: Duration,
    pub focus_duration: Duration,
    pub break_duration: Duration,
    pub current_phase: Phase,
    /// Time accumulated in the current phase, or in the current delay.
    pub elapsed: Duration,
    /// Set while waiting out `delay_between_phases`.
    pub in_delay: bool,
    pub current_cycle: u32,
    pub status: SessionStatus,
    /// Unix seconds at which the session reached a terminal state.
    pub ended_at: Option<u64>,
}

/// Result of advancing a session by one tick.
#[derive(Debug, Default)]
pub struct TickOutcome {
    /// Events produced by the tick, in emission order.
    pub events: Vec<SessionEvent>,
    /// The session reached its target cycle count.
    pub completed: bool,
}

impl Session {
    /// Instantiate a session from a template.
    pub fn from_config(id: &str, config: &SessionConfig) -> Self {
        Self {
            id: id.trim().to_string(),
            config_id: config.id.clone(),
            target_cycles: config.target_cycles,
            delay_between_phases: config.delay_between_phases,
            focus_duration: config.focus_duration,
            break_duration: config.break_duration,
            ..Self::default()
        }
    }

    /// Lookup key for this session.
    pub fn key(&self) -> SessionKey {
        session_key(&self.id)
    }

    /// Target length of the current phase.
    pub fn phase_duration(&self) -> Duration {
        match self.current_phase {
            Phase::Focus => self.focus_duration,
            Phase::Break => self.break_duration,
        }
    }

    /// Time left in the current phase.
    pub fn remaining(&self) -> Duration {
        self.phase_duration().saturating_sub(self.elapsed)
    }

    /// Mark the session as having entered a terminal state now.
    pub fn mark_ended(&mut self, status: SessionStatus) {
        self.status = status;
        self.ended_at = Some(unix_now());
    }

    /// Advance the session by one clock interval.
    ///
    /// During a delay only `DelayElapsed` is produced. Otherwise the phase
    /// clock moves forward, and crossing the phase target flips the phase,
    /// counts a cycle after each break, and either completes the session or
    /// enters the delay.
    pub fn advance(&mut self, interval: Duration) -> TickOutcome {
        let mut outcome = TickOutcome::default();
        self.elapsed += interval;

        if self.in_delay {
            outcome.events.push(SessionEvent::DelayElapsed {
                session: self.clone(),
                elapsed: self.elapsed,
            });
            if self.elapsed >= self.delay_between_phases {
                self.in_delay = false;
                self.elapsed = Duration::ZERO;
            }
            return outcome;
        }

        outcome.events.push(SessionEvent::Progress(self.clone()));
        if self.elapsed < self.phase_duration() {
            return outcome;
        }

        let finished = self.current_phase;
        outcome.events.push(SessionEvent::PhaseCompleted {
            session: self.clone(),
            phase: finished,
        });

        self.current_phase = finished.next();
        if finished == Phase::Break {
            self.current_cycle += 1;
        }
        self.elapsed = Duration::ZERO;

        if self.target_cycles != 0 && self.current_cycle >= self.target_cycles {
            outcome.completed = true;
        } else if !self.delay_between_phases.is_zero() {
            self.in_delay = true;
        }

        outcome
    }

    /// One-line human readable summary.
    pub fn summary(&self) -> String {
        let cycles = if self.target_cycles == 0 {
            format!("cycle {}", self.current_cycle + 1)
        } else {
            format!("cycle {}/{}", self.current_cycle + 1, self.target_cycles)
        };
        let position = if self.in_delay {
            format!("waiting {}", format_clock(self.elapsed))
        } else {
            format!(
                "{} {} / {} ({} left)",
                self.current_phase,
                format_clock(self.elapsed),
                format_clock(self.phase_duration()),
                format_clock(self.remaining())
            )
        };
        format!("{} [{}] {}, {}", self.id, self.status, position, cycles)
    }
}

/// Current time in unix seconds.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECOND: Duration = Duration::from_secs(1);

    fn config(focus: u64, brk: u64) -> SessionConfig {
        SessionConfig::new(
            "pomodoro",
            Duration::from_secs(focus),
            Duration::from_secs(brk),
        )
    }

    fn tick_n(session: &mut Session, n: usize) -> Vec<SessionEvent> {
        (0..n).flat_map(|_| session.advance(SECOND).events).collect()
    }

    fn count_phase_completed(events: &[SessionEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, SessionEvent::PhaseCompleted { .. }))
            .count()
    }

    #[test]
    fn test_session_key_is_case_insensitive() {
        assert_eq!(session_key("Deep-Work"), session_key("deep-work"));
        assert_eq!(session_key("  Reading "), "reading");
    }

    #[test]
    fn test_from_config_starts_at_zero() {
        let session = Session::from_config("writing", &config(10, 5).with_target_cycles(2));

        assert_eq!(session.id, "writing");
        assert_eq!(session.config_id, "pomodoro");
        assert_eq!(session.current_phase, Phase::Focus);
        assert_eq!(session.elapsed, Duration::ZERO);
        assert_eq!(session.current_cycle, 0);
        assert_eq!(session.target_cycles, 2);
        assert_eq!(session.status, SessionStatus::Executing);
    }

    #[test]
    fn test_focus_completes_exactly_at_target() {
        let mut session = Session::from_config("s", &config(10, 5));

        let events = tick_n(&mut session, 9);
        assert_eq!(count_phase_completed(&events), 0);
        assert_eq!(session.elapsed, Duration::from_secs(9));

        let outcome = session.advance(SECOND);
        assert_eq!(count_phase_completed(&outcome.events), 1);
        assert!(matches!(
            outcome.events.last(),
            Some(SessionEvent::PhaseCompleted { phase: Phase::Focus, .. })
        ));
        assert_eq!(session.current_phase, Phase::Break);
        assert_eq!(session.elapsed, Duration::ZERO);
        assert_eq!(session.current_cycle, 0);
        assert!(!outcome.completed);
    }

    #[test]
    fn test_every_phase_tick_reports_progress() {
        let mut session = Session::from_config("s", &config(3, 3));
        let events = tick_n(&mut session, 3);

        let progress: Vec<Duration> = events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::Progress(s) => Some(s.elapsed),
                _ => None,
            })
            .collect();
        assert_eq!(
            progress,
            vec![SECOND, Duration::from_secs(2), Duration::from_secs(3)]
        );
    }

    #[test]
    fn test_break_completion_counts_cycle() {
        let mut session = Session::from_config("s", &config(2, 2));
        tick_n(&mut session, 4);

        assert_eq!(session.current_cycle, 1);
        assert_eq!(session.current_phase, Phase::Focus);
    }

    #[test]
    fn test_target_cycles_completes_session() {
        let mut session = Session::from_config("s", &config(2, 2).with_target_cycles(1));

        tick_n(&mut session, 3);
        let outcome = session.advance(SECOND);

        assert!(outcome.completed);
        assert_eq!(session.current_cycle, 1);
    }

    #[test]
    fn test_completion_skips_delay() {
        let mut session = Session::from_config(
            "s",
            &config(1, 1)
                .with_target_cycles(1)
                .with_delay(Duration::from_secs(5)),
        );

        session.advance(SECOND);
        tick_n(&mut session, 5);
        let outcome = session.advance(SECOND);

        assert!(outcome.completed);
        assert!(!session.in_delay);
    }

    #[test]
    fn test_unlimited_cycles_never_complete() {
        let mut session = Session::from_config("s", &config(1, 1));
        for _ in 0..100 {
            assert!(!session.advance(SECOND).completed);
        }
        assert_eq!(session.current_cycle, 50);
    }

    #[test]
    fn test_zero_delay_never_emits_delay_elapsed() {
        let mut session = Session::from_config("s", &config(2, 2));
        let events = tick_n(&mut session, 20);

        assert!(!events
            .iter()
            .any(|e| matches!(e, SessionEvent::DelayElapsed { .. })));
    }

    #[test]
    fn test_delay_emitted_for_each_delay_tick() {
        let mut session =
            Session::from_config("s", &config(2, 2).with_delay(Duration::from_secs(2)));

        tick_n(&mut session, 2);
        assert!(session.in_delay);
        assert_eq!(session.current_phase, Phase::Break);

        let first = session.advance(SECOND);
        assert!(matches!(
            first.events.as_slice(),
            [SessionEvent::DelayElapsed { elapsed, .. }] if *elapsed == SECOND
        ));

        let second = session.advance(SECOND);
        assert!(matches!(
            second.events.as_slice(),
            [SessionEvent::DelayElapsed { elapsed, .. }] if *elapsed == Duration::from_secs(2)
        ));
        assert!(!session.in_delay);
        assert_eq!(session.elapsed, Duration::ZERO);

        let resumed = session.advance(SECOND);
        assert!(matches!(
            resumed.events.as_slice(),
            [SessionEvent::Progress(s)] if s.elapsed == SECOND && s.current_phase == Phase::Break
        ));
    }

    #[test]
    fn test_remaining_and_summary() {
        let mut session = Session::from_config("Reading", &config(60, 30).with_target_cycles(4));
        tick_n(&mut session, 15);

        assert_eq!(session.remaining(), Duration::from_secs(45));
        assert_eq!(
            session.summary(),
            "Reading [executing] Focus 00:15 / 01:00 (00:45 left), cycle 1/4"
        );
    }

    #[test]
    fn test_mark_ended_sets_timestamp() {
        let mut session = Session::from_config("s", &config(1, 1));
        session.mark_ended(SessionStatus::Cancelled);

        assert_eq!(session.status, SessionStatus::Cancelled);
        assert!(session.ended_at.is_some());
        assert!(SessionStatus::Cancelled.is_terminal());
        assert!(!SessionStatus::Paused.is_terminal());
    }
}
