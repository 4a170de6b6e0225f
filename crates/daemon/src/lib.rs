//! # Cadence Daemon Library
//!
//! This crate provides the daemon side of Cadence, a local focus/break
//! session timer driven by a separate client process.
//!
//! ## Overview
//!
//! The daemon runs any number of independent sessions. Each one alternates
//! Focus and Break phases on its own clock, optionally waiting a fixed delay
//! between phases, until it completes its target number of cycles or is
//! cancelled. Clients start, pause, resume and cancel sessions, and manage
//! the session templates, over a length-prefixed JSON protocol on a Unix
//! socket.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Daemon Orchestrator                         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────────┐   │
//! │  │  Transport   │─▶│   Message    │─▶│   Session Service    │   │
//! │  │    Host      │  │   Router     │  │  (store + timer)     │   │
//! │  └──────────────┘  └──────────────┘  └──────────────────────┘   │
//! │                                                │                │
//! │                               ┌────────────────┴─────────┐      │
//! │                               │  Output sink / Notifier  │      │
//! │                               └──────────────────────────┘      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use daemon::{Config, DaemonOrchestrator};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!
//!     let orchestrator = DaemonOrchestrator::new(config)?;
//!     orchestrator.start().await?;
//!
//!     orchestrator
//!         .run_until_shutdown(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`session`]: Session model, store, timer, service and templates
//! - [`router`]: Request routing to the command families
//! - [`ipc`]: Unix socket transport, client and PID file
//! - [`notify`]: Desktop notification interface
//! - [`output`]: Progress line sink
//! - [`lifecycle`]: Start/stop contract for components
//! - [`orchestrator`]: Main daemon coordinator

pub mod config;
pub mod ipc;
pub mod lifecycle;
pub mod notify;
pub mod orchestrator;
pub mod output;
pub mod router;
pub mod session;

// Re-export protocol for convenience
pub use protocol;

// Re-export config types for convenience
pub use config::{Config, ConfigError};

// Re-export session types for convenience
pub use session::{
    ConfigRegistry, Phase, Session, SessionConfig, SessionError, SessionService, SessionStatus,
    SessionStore, SessionTimer,
};

// Re-export router types for convenience
pub use router::{MessageRouter, RouterError, RouterResult};

// Re-export collaborator interfaces
pub use lifecycle::Lifecycle;
pub use notify::{Notification, Notifier, TracingNotifier};
pub use output::{OutputSink, StdoutQueue};

// Re-export orchestrator types for convenience
pub use orchestrator::{DaemonOrchestrator, OrchestratorEvent, OrchestratorState};
