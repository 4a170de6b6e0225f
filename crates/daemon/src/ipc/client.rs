//! IPC Client for communicating with the daemon via Unix Domain Sockets.
//!
//! The client connects to the daemon's Unix socket and sends requests,
//! receiving one response per request.

use std::io;
use std::path::Path;
use std::time::Duration;

use protocol::framing::Frame;
use protocol::{FrameCodec, Request, Response};
use tokio::net::UnixStream;

use super::server::{read_frame, write_frame, IpcError};

/// Default timeout for client operations in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// A client for communicating with the daemon via IPC.
pub struct IpcClient {
    stream: UnixStream,
    timeout: Duration,
}

fn timed_out(what: &str) -> IpcError {
    IpcError::Io(io::Error::new(io::ErrorKind::TimedOut, what.to_string()))
}

impl IpcClient {
    /// Connect to the daemon at the specified socket path.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    /// This typically indicates that the daemon is not running.
    pub async fn connect(path: &Path) -> Result<Self, IpcError> {
        Self::connect_with_timeout(path, Duration::from_secs(DEFAULT_TIMEOUT_SECS)).await
    }

    /// Connect to the daemon with a custom timeout.
    ///
    /// The timeout applies to the connect itself and to every later
    /// request/response exchange.
    pub async fn connect_with_timeout(path: &Path, timeout: Duration) -> Result<Self, IpcError> {
        let stream = tokio::time::timeout(timeout, UnixStream::connect(path))
            .await
            .map_err(|_| timed_out("connection timed out"))??;

        Ok(Self { stream, timeout })
    }

    /// Set the timeout for operations.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Send a request to the daemon and wait for its response.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The request cannot be framed or sent
    /// - The daemon closes the connection without answering
    /// - The response cannot be decoded
    /// - The operation times out
    pub async fn send(&mut self, request: &Request) -> Result<Response, IpcError> {
        tokio::time::timeout(self.timeout, self.send_internal(request))
            .await
            .map_err(|_| timed_out("operation timed out"))?
    }

    async fn send_internal(&mut self, request: &Request) -> Result<Response, IpcError> {
        write_frame(&mut self.stream, &request.to_frame_bytes()?).await?;

        let payload = read_frame(&mut self.stream).await?.ok_or_else(|| {
            IpcError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "daemon closed connection",
            ))
        })?;
        Ok(Response::from_json(&payload)?)
    }

    /// Tell the daemon this client is done, then close the connection.
    pub async fn disconnect(mut self) -> Result<(), IpcError> {
        let bytes = FrameCodec::new().encode(&Frame::disconnect())?;
        write_frame(&mut self.stream, &bytes).await
    }
}
