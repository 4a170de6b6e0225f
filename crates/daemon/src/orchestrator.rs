//! Daemon orchestrator for wiring together all components.
//!
//! This module provides the `DaemonOrchestrator` that builds the session
//! engine, the request router and the IPC transport from a [`Config`], and
//! starts and stops them in a fixed order.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::ipc::TransportHost;
use crate::lifecycle::Lifecycle;
use crate::notify::TracingNotifier;
use crate::output::StdoutQueue;
use crate::router::MessageRouter;
use crate::session::{ConfigRegistry, SessionLocks, SessionService, SessionStore, SessionTimer};

/// Daemon orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    /// Initial state, not started.
    Stopped,
    /// Starting up, initializing components.
    Starting,
    /// Running and accepting connections.
    Running,
    /// Shutting down gracefully.
    ShuttingDown,
}

/// Events emitted by the orchestrator.
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    /// Orchestrator state changed.
    StateChanged(OrchestratorState),
    /// A component finished starting.
    ComponentStarted { name: &'static str },
    /// A component finished stopping.
    ComponentStopped { name: &'static str },
    /// Error occurred.
    Error { message: String },
}

/// Daemon orchestrator that manages all subsystems.
pub struct DaemonOrchestrator {
    /// Configuration.
    config: Config,
    /// Current state.
    state: Arc<RwLock<OrchestratorState>>,
    /// Session templates.
    configs: Arc<ConfigRegistry>,
    /// Progress line sink.
    output: Arc<StdoutQueue>,
    /// Session engine.
    sessions: Arc<SessionService<TracingNotifier>>,
    /// Message router.
    router: Arc<MessageRouter<TracingNotifier>>,
    /// Local socket transport.
    transport: TransportHost<TracingNotifier>,
    /// Root cancellation token for graceful shutdown.
    shutdown_token: CancellationToken,
    /// Event sender.
    event_tx: broadcast::Sender<OrchestratorEvent>,
}

impl DaemonOrchestrator {
    /// Creates a new daemon orchestrator.
    pub fn new(config: Config) -> Result<Self> {
        let shutdown_token = CancellationToken::new();

        let configs = Arc::new(config.session_registry()?);
        info!(
            templates = configs.list().len(),
            default = %configs.default_id(),
            "Loaded session templates"
        );

        let timer = Arc::new(SessionTimer::new(
            Arc::new(SessionStore::new()),
            Arc::new(SessionLocks::new()),
            config.tick_interval(),
        ));

        let output = Arc::new(StdoutQueue::new());
        let sessions = Arc::new(
            SessionService::new(
                timer,
                configs.clone(),
                output.clone(),
                Arc::new(TracingNotifier::new()),
                shutdown_token.clone(),
            )
            .with_retention(config.retention(), config.reap_interval()),
        );

        let router = Arc::new(MessageRouter::new(
            Arc::clone(&sessions),
            Arc::clone(&configs),
        ));

        let transport = TransportHost::new(
            config.socket_path(),
            Arc::clone(&router),
            config.ipc.max_restart_attempts,
            shutdown_token.clone(),
        );

        let (event_tx, _) = broadcast::channel(64);

        Ok(Self {
            config,
            state: Arc::new(RwLock::new(OrchestratorState::Stopped)),
            configs,
            output,
            sessions,
            router,
            transport,
            shutdown_token,
            event_tx,
        })
    }

    /// Returns the current state.
    pub async fn state(&self) -> OrchestratorState {
        *self.state.read().await
    }

    /// Returns a receiver for orchestrator events.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.event_tx.subscribe()
    }

    /// Starts output, sessions and transport, in that order.
    ///
    /// If a component fails to start, the ones already running are stopped
    /// again and the orchestrator returns to `Stopped`.
    pub async fn start(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state != OrchestratorState::Stopped {
                anyhow::bail!("Orchestrator is already running");
            }
            *state = OrchestratorState::Starting;
        }
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Starting));

        info!("Starting daemon orchestrator...");

        if let Err(e) = self.start_components().await {
            error!("Failed to start daemon: {:#}", e);
            self.emit_event(OrchestratorEvent::Error {
                message: format!("{e:#}"),
            });
            *self.state.write().await = OrchestratorState::Stopped;
            self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Stopped));
            return Err(e);
        }

        *self.state.write().await = OrchestratorState::Running;
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Running));

        info!(
            socket = %self.transport.socket_path().display(),
            "Daemon orchestrator started successfully"
        );
        Ok(())
    }

    async fn start_components(&self) -> Result<()> {
        self.start_component(self.output.as_ref()).await?;

        if let Err(e) = self.start_component(self.sessions.as_ref()).await {
            self.stop_component(self.output.as_ref()).await;
            return Err(e);
        }

        if let Err(e) = self.start_component(&self.transport).await {
            self.stop_component(self.sessions.as_ref()).await;
            self.stop_component(self.output.as_ref()).await;
            return Err(e);
        }

        Ok(())
    }

    async fn start_component<C: Lifecycle>(&self, component: &C) -> Result<()> {
        component
            .start()
            .await
            .with_context(|| format!("Failed to start {}", component.name()))?;
        debug!(component = component.name(), "Component started");
        self.emit_event(OrchestratorEvent::ComponentStarted {
            name: component.name(),
        });
        Ok(())
    }

    async fn stop_component<C: Lifecycle>(&self, component: &C) {
        match component.stop().await {
            Ok(()) => {
                debug!(component = component.name(), "Component stopped");
                self.emit_event(OrchestratorEvent::ComponentStopped {
                    name: component.name(),
                });
            }
            Err(e) => {
                warn!(component = component.name(), "Error stopping component: {:#}", e);
                self.emit_event(OrchestratorEvent::Error {
                    message: format!("{e:#}"),
                });
            }
        }
    }

    /// Stops the daemon orchestrator gracefully.
    ///
    /// Cancels the root token, then stops transport, sessions and output.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state == OrchestratorState::Stopped {
                return Ok(());
            }
            if *state == OrchestratorState::ShuttingDown {
                anyhow::bail!("Orchestrator is already shutting down");
            }
            *state = OrchestratorState::ShuttingDown;
        }
        self.emit_event(OrchestratorEvent::StateChanged(
            OrchestratorState::ShuttingDown,
        ));

        info!("Stopping daemon orchestrator...");

        self.shutdown_token.cancel();

        self.stop_component(&self.transport).await;
        self.stop_component(self.sessions.as_ref()).await;
        self.stop_component(self.output.as_ref()).await;

        *self.state.write().await = OrchestratorState::Stopped;
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Stopped));

        info!("Daemon orchestrator stopped");
        Ok(())
    }

    /// Runs until `signal` resolves or the root token is cancelled, then
    /// stops everything.
    ///
    /// Returns an error when the transport gave up.
    pub async fn run_until_shutdown<F>(&self, signal: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            _ = signal => info!("Shutdown signal received"),
            _ = self.shutdown_token.cancelled() => warn!("Shutdown requested internally"),
        }

        self.stop().await?;

        match self.transport.failure() {
            Some(failure) => Err(anyhow::Error::new(failure).context("IPC transport failed")),
            None => Ok(()),
        }
    }

    /// Emits an orchestrator event.
    fn emit_event(&self, event: OrchestratorEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Returns the configuration the daemon was built from.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the session service.
    pub fn sessions(&self) -> &Arc<SessionService<TracingNotifier>> {
        &self.sessions
    }

    /// Returns the template registry.
    pub fn configs(&self) -> &Arc<ConfigRegistry> {
        &self.configs
    }

    /// Returns the message router.
    pub fn router(&self) -> &Arc<MessageRouter<TracingNotifier>> {
        &self.router
    }

    /// Path of the listening socket.
    pub fn socket_path(&self) -> &Path {
        self.transport.socket_path()
    }

    /// Returns the shutdown token for external tasks to observe shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }
}
