//! Transport host: the accept loop that feeds requests to the router.
//!
//! Connections are served one at a time, to completion, in accept order. A
//! failing socket is rebound up to `max_restart_attempts` consecutive times;
//! after that the host gives up and cancels the daemon's shutdown token.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use anyhow::Result;
use protocol::Response;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::server::{IpcConnection, IpcError, IpcServer};
use crate::lifecycle::Lifecycle;
use crate::notify::Notifier;
use crate::router::{MessageRouter, INTERNAL_ERROR_MESSAGE};

/// Pause between a transport failure and the rebind.
const RESTART_BACKOFF: Duration = Duration::from_millis(100);

/// Fatal transport failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The socket kept failing.
    #[error("transport failed {attempts} times in a row, last error: {last_error}")]
    RestartsExhausted { attempts: u32, last_error: String },
}

/// How a connection ended.
enum ConnectionEnd {
    /// The client disconnected.
    Closed,
    /// Shutdown was requested mid-connection.
    Cancelled,
}

struct HostInner<N: Notifier> {
    socket_path: PathBuf,
    router: Arc<MessageRouter<N>>,
    max_restart_attempts: u32,
    shutdown: CancellationToken,
    failure: OnceLock<TransportError>,
}

/// Owns the listening socket and the accept loop.
pub struct TransportHost<N: Notifier> {
    inner: Arc<HostInner<N>>,
    stop_token: Mutex<Option<CancellationToken>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<N: Notifier> TransportHost<N> {
    /// Creates a host. `shutdown` is cancelled if the transport fails for good.
    pub fn new(
        socket_path: impl Into<PathBuf>,
        router: Arc<MessageRouter<N>>,
        max_restart_attempts: u32,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(HostInner {
                socket_path: socket_path.into(),
                router,
                max_restart_attempts,
                shutdown,
                failure: OnceLock::new(),
            }),
            stop_token: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// Path of the listening socket.
    pub fn socket_path(&self) -> &Path {
        &self.inner.socket_path
    }

    /// The fatal error that stopped the host, if any.
    pub fn failure(&self) -> Option<TransportError> {
        self.inner.failure.get().cloned()
    }

    /// Runs the accept loop until `token` is cancelled or restarts run out.
    pub async fn run(&self, token: CancellationToken) -> Result<(), TransportError> {
        self.inner.run(token).await
    }
}

impl<N: Notifier> HostInner<N> {
    async fn run(&self, token: CancellationToken) -> Result<(), TransportError> {
        let mut failures = 0u32;

        loop {
            if token.is_cancelled() {
                return Ok(());
            }

            let outcome = match IpcServer::bind(&self.socket_path).await {
                Ok(server) => {
                    info!(socket = %self.socket_path.display(), "IPC server listening");
                    self.serve(&server, &token, &mut failures).await
                }
                Err(e) => Err(IpcError::Io(e)),
            };

            match outcome {
                Ok(()) => return Ok(()),
                Err(e) => {
                    failures += 1;
                    if failures > self.max_restart_attempts {
                        let err = TransportError::RestartsExhausted {
                            attempts: failures,
                            last_error: e.to_string(),
                        };
                        error!(error = %err, "Giving up on IPC transport");
                        return Err(err);
                    }
                    warn!(
                        error = %e,
                        attempt = failures,
                        max = self.max_restart_attempts,
                        "IPC transport failed, restarting"
                    );
                }
            }

            tokio::select! {
                _ = token.cancelled() => return Ok(()),
                _ = tokio::time::sleep(RESTART_BACKOFF) => {}
            }
        }
    }

    /// Accepts and serves connections until cancelled or an I/O error.
    async fn serve(
        &self,
        server: &IpcServer,
        token: &CancellationToken,
        failures: &mut u32,
    ) -> Result<(), IpcError> {
        loop {
            let conn = tokio::select! {
                _ = token.cancelled() => return Ok(()),
                accepted = server.accept() => accepted?,
            };
            debug!("Client connected");

            match self.serve_connection(conn, token).await? {
                ConnectionEnd::Closed => {
                    debug!("Client disconnected");
                    *failures = 0;
                }
                ConnectionEnd::Cancelled => return Ok(()),
            }
        }
    }

    async fn serve_connection(
        &self,
        mut conn: IpcConnection,
        token: &CancellationToken,
    ) -> Result<ConnectionEnd, IpcError> {
        loop {
            let read = tokio::select! {
                _ = token.cancelled() => return Ok(ConnectionEnd::Cancelled),
                read = conn.read_request() => read,
            };

            let response = match read {
                Ok(Some(request)) => self.router.route(&request).await,
                Ok(None) => return Ok(ConnectionEnd::Closed),
                Err(e) if e.is_malformed_payload() => {
                    warn!(error = %e, "Rejecting malformed request");
                    Response::bad_request(format!("Malformed request: {e}"))
                }
                Err(e) => return Err(e),
            };

            match conn.send_response(&response).await {
                Ok(()) => {}
                Err(IpcError::Protocol(e)) => {
                    // Nothing was written, so the stream is still aligned.
                    error!(error = %e, "Response could not be framed");
                    conn.send_response(&Response::error(INTERNAL_ERROR_MESSAGE))
                        .await?;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl<N: Notifier> Lifecycle for TransportHost<N> {
    fn name(&self) -> &'static str {
        "transport"
    }

    async fn start(&self) -> Result<()> {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.is_some() {
            anyhow::bail!("transport host already started");
        }

        let token = self.inner.shutdown.child_token();
        let inner = Arc::clone(&self.inner);
        let run_token = token.clone();
        *task = Some(tokio::spawn(async move {
            if let Err(e) = inner.run(run_token).await {
                let _ = inner.failure.set(e);
                inner.shutdown.cancel();
            }
        }));
        *self
            .stop_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(token);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let token = self
            .stop_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(token) = token {
            token.cancel();
        }

        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            let _ = task.await;
        }

        if self.inner.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.inner.socket_path) {
                warn!(error = %e, "Failed to remove IPC socket");
            }
        }
        Ok(())
    }
}
