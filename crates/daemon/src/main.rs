//! Cadence Daemon
//!
//! Runs focus/break sessions and serves local clients over a Unix socket.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use daemon::config::{default_config_path, Config};
use daemon::ipc::pidfile::{remove_pid_file, write_pid_file};
use daemon::ipc::{get_daemon_pid, IpcClient, DEFAULT_TIMEOUT_SECS};
use daemon::orchestrator::{DaemonOrchestrator, OrchestratorEvent};
use protocol::messages::{
    ARG_BREAK_DURATION, ARG_DELAY_BETWEEN_PHASES, ARG_FOCUS_DURATION, ARG_SESSION_CONFIG_ID,
    ARG_SESSION_ID, ARG_TARGET_CYCLES,
};
use protocol::{Request, Response, COMMAND_CONFIG, COMMAND_SESSION};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Cadence Daemon - focus/break session timer.
#[derive(Parser, Debug)]
#[command(name = "cadenced")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for the daemon.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the Cadence daemon in the foreground
    Start,

    /// Stop the running daemon
    Stop {
        /// Force immediate termination (SIGKILL)
        #[arg(long, short)]
        force: bool,
    },

    /// Show daemon status
    Status,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long, short)]
        force: bool,
    },

    /// Control sessions
    #[command(subcommand)]
    Session(SessionCommands),

    /// Manage session templates
    #[command(subcommand)]
    Config(ConfigCommands),
}

/// Subcommands for session control.
#[derive(Subcommand, Debug, Clone)]
pub enum SessionCommands {
    /// Start a session from a template
    Start {
        /// Session ID (defaults to the template ID)
        id: Option<String>,

        /// Template to start from (defaults to the default template)
        #[arg(long, short)]
        template: Option<String>,
    },

    /// Pause an executing session
    Pause {
        /// Session ID (defaults to the first executing session)
        id: Option<String>,
    },

    /// Resume a paused session
    Resume {
        /// Session ID (defaults to the first paused session)
        id: Option<String>,
    },

    /// Cancel a started session
    Cancel {
        /// Session ID (defaults to the first executing, then paused, session)
        id: Option<String>,
    },

    /// List all sessions
    List,
}

/// Subcommands for template management.
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    /// List all templates
    List,

    /// Show one template
    Show {
        /// Template ID (defaults to the default template)
        id: Option<String>,
    },

    /// Add a template
    Add {
        /// Template ID
        id: String,

        /// Focus duration, e.g. 25m or 1h30m
        #[arg(long)]
        focus: String,

        /// Break duration, e.g. 5m
        #[arg(long = "break")]
        break_duration: String,

        /// Pause between phases, e.g. 10s
        #[arg(long)]
        delay: Option<String>,

        /// Number of cycles (0 = unlimited)
        #[arg(long)]
        cycles: Option<u32>,
    },

    /// Remove a template
    Remove {
        /// Template ID
        id: String,
    },

    /// Make a template the default
    SetDefault {
        /// Template ID
        id: String,
    },
}

fn with_optional(request: Request, key: &str, value: Option<&str>) -> Request {
    match value {
        Some(value) => request.with_argument(key, value),
        None => request,
    }
}

impl SessionCommands {
    /// Build the request sent to the daemon.
    pub fn to_request(&self) -> Request {
        match self {
            SessionCommands::Start { id, template } => with_optional(
                with_optional(
                    Request::new(COMMAND_SESSION, "start"),
                    ARG_SESSION_ID,
                    id.as_deref(),
                ),
                ARG_SESSION_CONFIG_ID,
                template.as_deref(),
            ),
            SessionCommands::Pause { id } => with_optional(
                Request::new(COMMAND_SESSION, "pause"),
                ARG_SESSION_ID,
                id.as_deref(),
            ),
            SessionCommands::Resume { id } => with_optional(
                Request::new(COMMAND_SESSION, "resume"),
                ARG_SESSION_ID,
                id.as_deref(),
            ),
            SessionCommands::Cancel { id } => with_optional(
                Request::new(COMMAND_SESSION, "cancel"),
                ARG_SESSION_ID,
                id.as_deref(),
            ),
            SessionCommands::List => Request::new(COMMAND_SESSION, "list"),
        }
    }
}

impl ConfigCommands {
    /// Build the request sent to the daemon.
    pub fn to_request(&self) -> Request {
        match self {
            ConfigCommands::List => Request::new(COMMAND_CONFIG, "list"),
            ConfigCommands::Show { id } => with_optional(
                Request::new(COMMAND_CONFIG, "show"),
                ARG_SESSION_CONFIG_ID,
                id.as_deref(),
            ),
            ConfigCommands::Add {
                id,
                focus,
                break_duration,
                delay,
                cycles,
            } => {
                let request = Request::new(COMMAND_CONFIG, "add")
                    .with_argument(ARG_SESSION_CONFIG_ID, id.as_str())
                    .with_argument(ARG_FOCUS_DURATION, focus.as_str())
                    .with_argument(ARG_BREAK_DURATION, break_duration.as_str());
                let request = with_optional(request, ARG_DELAY_BETWEEN_PHASES, delay.as_deref());
                let cycles = cycles.map(|c| c.to_string());
                with_optional(request, ARG_TARGET_CYCLES, cycles.as_deref())
            }
            ConfigCommands::Remove { id } => Request::new(COMMAND_CONFIG, "remove")
                .with_argument(ARG_SESSION_CONFIG_ID, id.as_str()),
            ConfigCommands::SetDefault { id } => Request::new(COMMAND_CONFIG, "set-default")
                .with_argument(ARG_SESSION_CONFIG_ID, id.as_str()),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Init { force } = cli.command {
        let path = cli.config.clone().unwrap_or_else(default_config_path);
        init_config(&path, force)?;
        println!("Configuration written to {}", path.display());
        return Ok(());
    }

    // Load configuration
    let mut config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default()?
    };

    // Apply environment variable overrides
    config.apply_env_overrides();

    // Validate configuration
    config.validate()?;

    let log_to_file = matches!(cli.command, Commands::Start);
    let _log_guard = init_tracing(&config, cli.verbose, log_to_file)?;

    match cli.command {
        Commands::Start => run_daemon(config).await,
        Commands::Stop { force } => {
            tracing::info!("Stopping daemon (force: {})", force);
            match stop_daemon(&config, force).await {
                Ok(pid) => {
                    println!("Daemon stopped (PID {})", pid);
                    Ok(())
                }
                Err(e) => {
                    eprintln!("Failed to stop daemon: {:#}", e);
                    if !force {
                        eprintln!("Try: cadenced stop --force");
                    }
                    std::process::exit(1);
                }
            }
        }
        Commands::Status => match get_daemon_pid(&config.pid_file_path()) {
            Some(pid) => {
                println!("Daemon Status: running");
                println!("  PID:    {}", pid);
                println!("  Socket: {}", config.socket_path().display());
                Ok(())
            }
            None => {
                println!("Daemon Status: stopped");
                std::process::exit(1);
            }
        },
        Commands::Init { .. } => Ok(()),
        Commands::Session(cmd) => run_client(&config, cmd.to_request()).await,
        Commands::Config(cmd) => run_client(&config, cmd.to_request()).await,
    }
}

/// Write the default configuration to `path`, refusing to clobber an
/// existing file unless `force` is set.
fn init_config(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    Config::default().save(path)
}

/// Install the tracing subscriber.
///
/// Console logs go to stderr so stdout carries only session progress. The
/// returned guard flushes the file writer and must live until exit.
fn init_tracing(
    config: &Config,
    verbose: bool,
    log_to_file: bool,
) -> anyhow::Result<Option<WorkerGuard>> {
    let level = if verbose {
        "debug".to_string()
    } else {
        config.daemon.log_level.to_lowercase()
    };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&level))
        .with_context(|| format!("Invalid log level: {}", level))?;

    let console = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let (file, guard) = if log_to_file && config.daemon.log_to_file {
        let log_dir = config.log_dir();
        std::fs::create_dir_all(&log_dir)
            .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;
        let appender = tracing_appender::rolling::daily(&log_dir, "cadenced.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(writer);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .init();

    Ok(guard)
}

/// Run the daemon in the foreground until a signal or a fatal failure.
async fn run_daemon(config: Config) -> anyhow::Result<()> {
    let pid_path = config.pid_file_path();

    // Check for existing daemon BEFORE starting
    if let Some(pid) = get_daemon_pid(&pid_path) {
        eprintln!("Error: Daemon already running (PID: {})", pid);
        eprintln!();
        eprintln!("To stop the existing daemon, run:");
        eprintln!("  cadenced stop");
        std::process::exit(1);
    }

    let orchestrator = DaemonOrchestrator::new(config)?;

    write_pid_file(&pid_path)
        .with_context(|| format!("Failed to write PID file: {}", pid_path.display()))?;
    tracing::info!(pid = std::process::id(), "Cadence daemon starting");

    let mut events = orchestrator.subscribe();
    let event_logger = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                OrchestratorEvent::StateChanged(state) => {
                    tracing::info!("Orchestrator state: {:?}", state);
                }
                OrchestratorEvent::ComponentStarted { name } => {
                    tracing::debug!("Component started: {}", name);
                }
                OrchestratorEvent::ComponentStopped { name } => {
                    tracing::debug!("Component stopped: {}", name);
                }
                OrchestratorEvent::Error { message } => {
                    tracing::error!("Orchestrator error: {}", message);
                }
            }
        }
    });

    let result = match orchestrator.start().await {
        Ok(()) => {
            orchestrator
                .run_until_shutdown(wait_for_shutdown_signal())
                .await
        }
        Err(e) => Err(e),
    };

    event_logger.abort();
    remove_pid_file(&pid_path);

    match &result {
        Ok(()) => tracing::info!("Cadence daemon exited"),
        Err(e) => tracing::error!("Cadence daemon failed: {:#}", e),
    }
    result
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) =
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            (Err(e), _) | (_, Err(e)) => {
                tracing::error!("Failed to register signal handlers: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        }
    }
}

/// Signal the daemon named by the PID file and wait for it to exit.
///
/// Returns the PID that was stopped.
async fn stop_daemon(config: &Config, force: bool) -> anyhow::Result<u32> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let pid_path = config.pid_file_path();
    let pid = get_daemon_pid(&pid_path)
        .context("Daemon is not running (no live PID file)")?;
    let raw = i32::try_from(pid).with_context(|| format!("Invalid PID: {}", pid))?;

    let signal = if force { Signal::SIGKILL } else { Signal::SIGTERM };
    kill(Pid::from_raw(raw), signal)
        .with_context(|| format!("Failed to signal daemon (PID {})", pid))?;
    tracing::debug!("Sent {:?} to daemon (PID {})", signal, pid);

    if force {
        // A killed daemon leaves its files behind.
        let _ = std::fs::remove_file(&pid_path);
        let _ = std::fs::remove_file(config.socket_path());
        return Ok(pid);
    }

    wait_for_exit(&pid_path, Duration::from_secs(10)).await?;
    Ok(pid)
}

async fn wait_for_exit(pid_path: &Path, timeout: Duration) -> anyhow::Result<()> {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if get_daemon_pid(pid_path).is_none() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    anyhow::bail!("Timeout waiting for daemon to exit ({}s)", timeout.as_secs())
}

/// Send one request to the daemon and print its answer.
///
/// Exits with status 1 when the daemon reports failure.
async fn run_client(config: &Config, request: Request) -> anyhow::Result<()> {
    let response = send_request(&config.socket_path(), &request).await?;
    if response.success {
        println!("{}", response.message);
        Ok(())
    } else {
        eprintln!("{}", response.message);
        std::process::exit(1);
    }
}

async fn send_request(socket_path: &Path, request: &Request) -> anyhow::Result<Response> {
    let mut client =
        IpcClient::connect_with_timeout(socket_path, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .await
            .with_context(|| {
                format!(
                    "Cannot connect to daemon at {} (is it running?)",
                    socket_path.display()
                )
            })?;

    let response = client.send(request).await.context("Request failed")?;

    if let Err(e) = client.disconnect().await {
        tracing::debug!("Disconnect failed: {}", e);
    }
    Ok(response)
}
