//! IPC Server for handling client connections via Unix Domain Sockets.
//!
//! The server listens on a Unix socket and accepts one connection at a time.
//! Every message in either direction is a 2-byte big-endian length prefix
//! followed by a UTF-8 JSON payload.

use std::io;
use std::path::Path;

use protocol::framing::{decode_length, LENGTH_PREFIX_SIZE};
use protocol::{ProtocolError, Request, Response};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

/// A server that listens for IPC connections on a Unix Domain Socket.
pub struct IpcServer {
    listener: UnixListener,
}

impl IpcServer {
    /// Bind the server to the specified socket path.
    ///
    /// This will create the socket file and any necessary parent directories.
    /// If a socket file already exists at the path, it will be removed first.
    /// The socket is made accessible to the owning user only.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The parent directories cannot be created
    /// - The existing socket cannot be removed
    /// - The socket cannot be bound
    pub async fn bind(path: &Path) -> Result<Self, io::Error> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
                restrict_permissions(parent, 0o700)?;
            }
        }

        if path.exists() {
            std::fs::remove_file(path)?;
        }

        let listener = UnixListener::bind(path)?;
        restrict_permissions(path, 0o600)?;

        Ok(Self { listener })
    }

    /// Accept a new incoming connection.
    ///
    /// This method blocks until a client connects.
    pub async fn accept(&self) -> Result<IpcConnection, io::Error> {
        let (stream, _addr) = self.listener.accept().await?;
        Ok(IpcConnection::new(stream))
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

/// Reads one length-prefixed payload.
///
/// Returns `None` when the peer closes the stream before a prefix, or sends
/// a zero-length frame.
pub(crate) async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, IpcError>
where
    R: AsyncReadExt + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    let first = reader.read(&mut prefix[..1]).await?;
    if first == 0 {
        return Ok(None);
    }
    reader.read_exact(&mut prefix[1..]).await?;

    let len = decode_length(prefix);
    if len == 0 {
        return Ok(None);
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

/// Writes a framed message and flushes.
pub(crate) async fn write_frame<W>(writer: &mut W, bytes: &[u8]) -> Result<(), IpcError>
where
    W: AsyncWriteExt + Unpin,
{
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// A connection to an IPC client.
///
/// This struct wraps a Unix stream and provides methods for reading
/// requests and sending responses using the length-prefixed protocol.
pub struct IpcConnection {
    reader: BufReader<tokio::io::ReadHalf<UnixStream>>,
    writer: tokio::io::WriteHalf<UnixStream>,
}

impl IpcConnection {
    /// Create a new IPC connection from a Unix stream.
    fn new(stream: UnixStream) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
        }
    }

    /// Read the next request from the client.
    ///
    /// Returns `None` if the client has disconnected.
    ///
    /// # Errors
    ///
    /// Returns [`IpcError::Io`] if the stream fails or ends mid-frame, and
    /// [`IpcError::Protocol`] if the payload is not a valid request.
    pub async fn read_request(&mut self) -> Result<Option<Request>, IpcError> {
        match read_frame(&mut self.reader).await? {
            Some(payload) => Ok(Some(Request::from_json(&payload)?)),
            None => Ok(None),
        }
    }

    /// Send a response to the client.
    ///
    /// # Errors
    ///
    /// Returns an error if the response cannot be framed or sent.
    pub async fn send_response(&mut self, response: &Response) -> Result<(), IpcError> {
        let bytes = response.to_frame_bytes()?;
        write_frame(&mut self.writer, &bytes).await
    }
}

/// Errors that can occur during IPC communication.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A message could not be framed or decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl IpcError {
    /// Whether the error came from a well-framed but undecodable payload.
    ///
    /// The stream is still aligned on a frame boundary, so the connection can
    /// keep serving.
    pub fn is_malformed_payload(&self) -> bool {
        matches!(self, IpcError::Protocol(ProtocolError::Deserialization(_)))
    }
}
