//! Request router for dispatching decoded requests to command handlers.
//!
//! This module provides the `MessageRouter` struct that maps a request's
//! command type onto one of the command families (`session`, `config`),
//! parses the subcommand and its arguments, and runs it behind a boundary
//! that turns unexpected failures into a generic 500 response.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use protocol::messages::{
    ARG_BREAK_DURATION, ARG_DELAY_BETWEEN_PHASES, ARG_FOCUS_DURATION, ARG_SESSION_CONFIG_ID,
    ARG_SESSION_ID, ARG_TARGET_CYCLES, COMMAND_CONFIG, COMMAND_SESSION,
};
use protocol::{Request, Response};
use tracing::{debug, error};

use crate::notify::Notifier;
use crate::session::duration::parse_duration;
use crate::session::templates::describe_config;
use crate::session::{ConfigRegistry, OperationResult, SessionConfig, SessionService};

/// Message returned to clients for any internal failure.
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal error while processing the request";

/// Result type for router operations.
pub type RouterResult = Result<OperationResult, RouterError>;

/// Errors that can occur during request routing.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// The command type names no command family.
    #[error("Unknown command type '{0}'")]
    UnknownCommand(String),

    /// The command family has no such subcommand.
    #[error("Unknown subcommand '{subcommand}' for command '{command}'")]
    UnknownSubcommand { command: String, subcommand: String },

    /// An argument is missing or malformed.
    #[error("{0}")]
    InvalidArgument(String),

    /// Unexpected failure inside a command.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl RouterError {
    /// Whether this error is the client's fault.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, RouterError::Internal(_))
    }
}

/// The command families a request can address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandType {
    Session,
    Config,
}

impl FromStr for CommandType {
    type Err = RouterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        match normalized.as_str() {
            COMMAND_SESSION => Ok(CommandType::Session),
            COMMAND_CONFIG => Ok(CommandType::Config),
            _ => Err(RouterError::UnknownCommand(s.to_string())),
        }
    }
}

/// A parsed `session` subcommand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Start { id: String, config_id: String },
    Pause { id: String },
    Resume { id: String },
    Cancel { id: String },
    List,
}

fn optional(request: &Request, key: &str) -> String {
    request.argument(key).unwrap_or_default().to_string()
}

fn required<'a>(request: &'a Request, key: &str) -> Result<&'a str, RouterError> {
    request
        .argument(key)
        .ok_or_else(|| RouterError::InvalidArgument(format!("Missing argument '{key}'")))
}

fn unknown_subcommand(command: &str, request: &Request) -> RouterError {
    RouterError::UnknownSubcommand {
        command: command.to_string(),
        subcommand: request.subcommand_type.clone(),
    }
}

impl SessionCommand {
    /// Parses the subcommand and arguments of a `session` request.
    pub fn parse(request: &Request) -> Result<Self, RouterError> {
        let subcommand = request.subcommand_type.trim().to_lowercase();
        let command = match subcommand.as_str() {
            "start" => SessionCommand::Start {
                id: optional(request, ARG_SESSION_ID),
                config_id: optional(request, ARG_SESSION_CONFIG_ID),
            },
            "pause" => SessionCommand::Pause {
                id: optional(request, ARG_SESSION_ID),
            },
            "resume" => SessionCommand::Resume {
                id: optional(request, ARG_SESSION_ID),
            },
            "cancel" => SessionCommand::Cancel {
                id: optional(request, ARG_SESSION_ID),
            },
            "list" => SessionCommand::List,
            _ => return Err(unknown_subcommand(COMMAND_SESSION, request)),
        };
        Ok(command)
    }
}

/// A parsed `config` subcommand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    List,
    Show { id: Option<String> },
    Add(SessionConfig),
    Remove { id: String },
    SetDefault { id: String },
}

fn duration_argument(request: &Request, key: &str) -> Result<Option<Duration>, RouterError> {
    request
        .argument(key)
        .map(|raw| {
            parse_duration(raw).ok_or_else(|| {
                RouterError::InvalidArgument(format!("Invalid duration '{raw}' for '{key}'"))
            })
        })
        .transpose()
}

fn required_duration(request: &Request, key: &str) -> Result<Duration, RouterError> {
    duration_argument(request, key)?
        .ok_or_else(|| RouterError::InvalidArgument(format!("Missing argument '{key}'")))
}

impl ConfigCommand {
    /// Parses the subcommand and arguments of a `config` request.
    pub fn parse(request: &Request) -> Result<Self, RouterError> {
        let subcommand = request.subcommand_type.trim().to_lowercase();
        let command = match subcommand.as_str() {
            "list" => ConfigCommand::List,
            "show" => ConfigCommand::Show {
                id: request.argument(ARG_SESSION_CONFIG_ID).map(str::to_string),
            },
            "add" => {
                let id = required(request, ARG_SESSION_CONFIG_ID)?;
                let focus = required_duration(request, ARG_FOCUS_DURATION)?;
                let brk = required_duration(request, ARG_BREAK_DURATION)?;
                let delay = duration_argument(request, ARG_DELAY_BETWEEN_PHASES)?
                    .unwrap_or(Duration::ZERO);
                let cycles = match request.argument(ARG_TARGET_CYCLES) {
                    Some(raw) => raw.parse::<u32>().map_err(|_| {
                        RouterError::InvalidArgument(format!(
                            "Invalid number '{raw}' for '{ARG_TARGET_CYCLES}'"
                        ))
                    })?,
                    None => 0,
                };
                ConfigCommand::Add(
                    SessionConfig::new(id, focus, brk)
                        .with_delay(delay)
                        .with_target_cycles(cycles),
                )
            }
            "remove" => ConfigCommand::Remove {
                id: required(request, ARG_SESSION_CONFIG_ID)?.to_string(),
            },
            "set-default" => ConfigCommand::SetDefault {
                id: required(request, ARG_SESSION_CONFIG_ID)?.to_string(),
            },
            _ => return Err(unknown_subcommand(COMMAND_CONFIG, request)),
        };
        Ok(command)
    }
}

/// Routes requests to the session service and the template registry.
pub struct MessageRouter<N: Notifier> {
    /// Session command handler.
    sessions: Arc<SessionService<N>>,
    /// Template registry for the `config` family.
    configs: Arc<ConfigRegistry>,
}

impl<N: Notifier> MessageRouter<N> {
    /// Create a new router with the given dependencies.
    pub fn new(sessions: Arc<SessionService<N>>, configs: Arc<ConfigRegistry>) -> Self {
        Self { sessions, configs }
    }

    /// Route a request and produce exactly one response.
    pub async fn route(&self, request: &Request) -> Response {
        debug!(
            command = %request.command_type,
            subcommand = %request.subcommand_type,
            "Routing request"
        );
        guarded(self.dispatch(request)).await
    }

    async fn dispatch(&self, request: &Request) -> RouterResult {
        match request.command_type.parse::<CommandType>()? {
            CommandType::Session => self.handle_session(SessionCommand::parse(request)?).await,
            CommandType::Config => self.handle_config(ConfigCommand::parse(request)?),
        }
    }

    async fn handle_session(&self, command: SessionCommand) -> RouterResult {
        let result = match command {
            SessionCommand::Start { id, config_id } => {
                self.sessions.start_session(&id, &config_id).await
            }
            SessionCommand::Pause { id } => self.sessions.pause_session(&id).await,
            SessionCommand::Resume { id } => self.sessions.resume_session(&id).await,
            SessionCommand::Cancel { id } => self.sessions.cancel_session(&id).await,
            SessionCommand::List => self.sessions.list_sessions(),
        };
        Ok(result)
    }

    fn handle_config(&self, command: ConfigCommand) -> RouterResult {
        let default_id = self.configs.default_id();
        let result = match command {
            ConfigCommand::List => {
                let lines: Vec<String> = self
                    .configs
                    .list()
                    .iter()
                    .map(|c| describe_config(c, c.id == default_id))
                    .collect();
                Ok(lines.join("\n"))
            }
            ConfigCommand::Show { id } => self
                .configs
                .show(id.as_deref())
                .map(|c| describe_config(&c, c.id == default_id)),
            ConfigCommand::Add(config) => {
                let id = config.id.clone();
                self.configs
                    .add(config)
                    .map(|()| format!("Session config '{id}' added"))
            }
            ConfigCommand::Remove { id } => self
                .configs
                .remove(&id)
                .map(|_| format!("Session config '{id}' removed")),
            ConfigCommand::SetDefault { id } => self
                .configs
                .set_default(&id)
                .map(|()| format!("Session config '{id}' is now the default")),
        };
        Ok(result.into())
    }
}

/// Run a command future and convert its outcome into a response.
///
/// Client errors become BadRequest. Internal errors and panics are logged in
/// full and reported with a generic 500.
pub async fn guarded<F>(command: F) -> Response
where
    F: Future<Output = RouterResult>,
{
    match AssertUnwindSafe(command).catch_unwind().await {
        Ok(Ok(result)) if result.success => Response::ok(result.message),
        Ok(Ok(result)) => Response::bad_request(result.message),
        Ok(Err(e)) if e.is_client_error() => {
            debug!(error = %e, "Rejected request");
            Response::bad_request(e.to_string())
        }
        Ok(Err(e)) => {
            error!(error = ?e, "Command failed");
            Response::error(INTERNAL_ERROR_MESSAGE)
        }
        Err(panic) => {
            error!(panic = %panic_message(panic.as_ref()), "Command panicked");
            Response::error(INTERNAL_ERROR_MESSAGE)
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::TracingNotifier;
    use crate::output::testing::CapturedOutput;
    use crate::session::{SessionLocks, SessionStatus, SessionStore, SessionTimer};
    use protocol::StatusCode;
    use tokio_util::sync::CancellationToken;

    fn create_test_router() -> MessageRouter<TracingNotifier> {
        let configs = Arc::new(
            ConfigRegistry::new(
                vec![
                    SessionConfig::new("pomodoro", Duration::from_secs(1500), Duration::from_secs(300))
                        .with_target_cycles(4),
                    SessionConfig::new("short", Duration::from_secs(900), Duration::from_secs(180)),
                ],
                "pomodoro",
            )
            .unwrap(),
        );
        let timer = Arc::new(SessionTimer::manual(
            Arc::new(SessionStore::new()),
            Arc::new(SessionLocks::new()),
            Duration::from_secs(1),
        ));
        let service = Arc::new(SessionService::new(
            timer,
            configs.clone(),
            Arc::new(CapturedOutput::default()),
            Arc::new(TracingNotifier::new()),
            CancellationToken::new(),
        ));
        MessageRouter::new(service, configs)
    }

    fn session(sub: &str) -> Request {
        Request::new(COMMAND_SESSION, sub)
    }

    fn config(sub: &str) -> Request {
        Request::new(COMMAND_CONFIG, sub)
    }

    #[test]
    fn test_command_type_is_case_insensitive() {
        assert_eq!("SESSION".parse::<CommandType>().unwrap(), CommandType::Session);
        assert_eq!(" Config ".parse::<CommandType>().unwrap(), CommandType::Config);
        assert!(matches!(
            "timer".parse::<CommandType>(),
            Err(RouterError::UnknownCommand(t)) if t == "timer"
        ));
    }

    #[test]
    fn test_parse_session_start_arguments() {
        let request = session("Start")
            .with_argument(ARG_SESSION_ID, "reading")
            .with_argument(ARG_SESSION_CONFIG_ID, "short");
        assert_eq!(
            SessionCommand::parse(&request).unwrap(),
            SessionCommand::Start {
                id: "reading".to_string(),
                config_id: "short".to_string()
            }
        );

        assert_eq!(
            SessionCommand::parse(&session("pause")).unwrap(),
            SessionCommand::Pause { id: String::new() }
        );
    }

    #[test]
    fn test_parse_config_add() {
        let request = config("add")
            .with_argument(ARG_SESSION_CONFIG_ID, "long")
            .with_argument(ARG_FOCUS_DURATION, "50m")
            .with_argument(ARG_BREAK_DURATION, "10m")
            .with_argument(ARG_DELAY_BETWEEN_PHASES, "30")
            .with_argument(ARG_TARGET_CYCLES, "2");

        let ConfigCommand::Add(parsed) = ConfigCommand::parse(&request).unwrap() else {
            panic!("expected add command");
        };
        assert_eq!(parsed.id, "long");
        assert_eq!(parsed.focus_duration, Duration::from_secs(3000));
        assert_eq!(parsed.break_duration, Duration::from_secs(600));
        assert_eq!(parsed.delay_between_phases, Duration::from_secs(30));
        assert_eq!(parsed.target_cycles, 2);
    }

    #[test]
    fn test_parse_config_add_rejects_bad_arguments() {
        let missing = config("add")
            .with_argument(ARG_SESSION_CONFIG_ID, "long")
            .with_argument(ARG_FOCUS_DURATION, "50m");
        assert!(matches!(
            ConfigCommand::parse(&missing),
            Err(RouterError::InvalidArgument(m)) if m.contains(ARG_BREAK_DURATION)
        ));

        let malformed = missing.clone().with_argument(ARG_BREAK_DURATION, "ten");
        assert!(matches!(
            ConfigCommand::parse(&malformed),
            Err(RouterError::InvalidArgument(m)) if m.contains("ten")
        ));

        let cycles = missing
            .with_argument(ARG_BREAK_DURATION, "5m")
            .with_argument(ARG_TARGET_CYCLES, "-1");
        assert!(ConfigCommand::parse(&cycles).is_err());
    }

    #[tokio::test]
    async fn test_route_unknown_command() {
        let router = create_test_router();
        let response = router.route(&Request::new("timer", "start")).await;

        assert_eq!(response.status_code, StatusCode::BadRequest);
        assert!(!response.success);
        assert!(response.message.contains("timer"));
    }

    #[tokio::test]
    async fn test_route_unknown_subcommand() {
        let router = create_test_router();
        let response = router.route(&session("explode")).await;

        assert_eq!(response.status_code, StatusCode::BadRequest);
        assert!(response.message.contains("explode"));
    }

    #[tokio::test]
    async fn test_route_session_start_and_pause() {
        let router = create_test_router();

        let response = router
            .route(&session("start").with_argument(ARG_SESSION_CONFIG_ID, "short"))
            .await;
        assert_eq!(response.status_code, StatusCode::Ok);
        assert!(response.success);
        assert!(router
            .sessions
            .store()
            .contains(SessionStatus::Executing, "short"));

        let response = router
            .route(&session("pause").with_argument(ARG_SESSION_ID, "short"))
            .await;
        assert!(response.success);
        assert!(router.sessions.store().contains(SessionStatus::Paused, "short"));
    }

    #[tokio::test]
    async fn test_route_session_failure_is_bad_request() {
        let router = create_test_router();
        let response = router
            .route(&session("cancel").with_argument(ARG_SESSION_ID, "ghost"))
            .await;

        assert_eq!(response.status_code, StatusCode::BadRequest);
        assert!(!response.success);
    }

    #[tokio::test]
    async fn test_route_config_family() {
        let router = create_test_router();

        let response = router.route(&config("list")).await;
        assert!(response.success);
        assert_eq!(response.message.lines().count(), 2);
        assert!(response.message.contains("pomodoro: focus 25m, break 5m, delay 0s, 4 cycles (default)"));

        let response = router
            .route(
                &config("add")
                    .with_argument(ARG_SESSION_CONFIG_ID, "long")
                    .with_argument(ARG_FOCUS_DURATION, "50m")
                    .with_argument(ARG_BREAK_DURATION, "10m"),
            )
            .await;
        assert!(response.success, "{}", response.message);

        let response = router
            .route(&config("set-default").with_argument(ARG_SESSION_CONFIG_ID, "long"))
            .await;
        assert!(response.success);

        let response = router.route(&config("show")).await;
        assert!(response.message.starts_with("long:"));

        let response = router
            .route(&session("start").with_argument(ARG_SESSION_ID, "essay"))
            .await;
        assert!(response.success);
        let started = router
            .sessions
            .store()
            .get(SessionStatus::Executing, "essay")
            .unwrap();
        assert_eq!(started.config_id, "long");

        let response = router
            .route(&config("remove").with_argument(ARG_SESSION_CONFIG_ID, "long"))
            .await;
        assert_eq!(response.status_code, StatusCode::BadRequest);
    }

    #[tokio::test]
    async fn test_route_config_add_zero_duration_rejected() {
        let router = create_test_router();
        let response = router
            .route(
                &config("add")
                    .with_argument(ARG_SESSION_CONFIG_ID, "broken")
                    .with_argument(ARG_FOCUS_DURATION, "0")
                    .with_argument(ARG_BREAK_DURATION, "5m"),
            )
            .await;

        assert_eq!(response.status_code, StatusCode::BadRequest);
        assert!(response.message.contains("focus"));
    }

    #[tokio::test]
    async fn test_guarded_internal_error_is_generic_500() {
        let response = guarded(async { Err(RouterError::Internal(anyhow::anyhow!("disk on fire"))) }).await;

        assert_eq!(response.status_code, StatusCode::Error);
        assert!(!response.success);
        assert_eq!(response.message, INTERNAL_ERROR_MESSAGE);
    }

    #[tokio::test]
    async fn test_guarded_panic_is_generic_500() {
        let response = guarded(async {
            if true {
                panic!("boom");
            }
            Ok(OperationResult::ok("unreachable"))
        })
        .await;

        assert_eq!(response.status_code, StatusCode::Error);
        assert_eq!(response.message, INTERNAL_ERROR_MESSAGE);
    }
}
