//! Unix Domain Socket IPC module for client-daemon communication.
//!
//! ## Overview
//!
//! Every message is a 2-byte big-endian length prefix followed by that many
//! bytes of UTF-8 JSON. A zero length tells the daemon the client is done.
//! The daemon serves one client at a time and answers every request with
//! exactly one response.
//!
//! ## Socket Path
//!
//! - Primary: `$XDG_RUNTIME_DIR/cadence/daemon.sock`
//! - Fallback: `/tmp/cadence-$UID/daemon.sock`
//!
//! ## Example
//!
//! ```rust,no_run
//! use daemon::ipc::{IpcClient, get_socket_path};
//! use protocol::Request;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = IpcClient::connect(&get_socket_path()).await?;
//!     let response = client.send(&Request::new("session", "list")).await?;
//!     println!("{}", response.message);
//!     client.disconnect().await?;
//!     Ok(())
//! }
//! ```

mod client;
pub mod host;
pub mod pidfile;
mod server;

pub use client::{IpcClient, DEFAULT_TIMEOUT_SECS};
pub use host::{TransportError, TransportHost};
pub use pidfile::get_daemon_pid;
pub use server::{IpcConnection, IpcError, IpcServer};

use std::path::PathBuf;

/// Get the default socket path for IPC communication.
///
/// 1. If `$XDG_RUNTIME_DIR` is set: `$XDG_RUNTIME_DIR/cadence/daemon.sock`
/// 2. Otherwise: `/tmp/cadence-$UID/daemon.sock`
#[cfg(unix)]
pub fn get_socket_path() -> PathBuf {
    use std::os::unix::fs::MetadataExt;

    match std::env::var("XDG_RUNTIME_DIR") {
        Ok(runtime_dir) if !runtime_dir.is_empty() => {
            PathBuf::from(runtime_dir).join("cadence").join("daemon.sock")
        }
        _ => {
            // Get UID by checking metadata of a file we own
            let uid = std::fs::metadata("/proc/self")
                .map(|m| m.uid())
                .unwrap_or(0);

            PathBuf::from(format!("/tmp/cadence-{}", uid)).join("daemon.sock")
        }
    }
}

/// Non-Unix platforms are not supported for Unix Domain Sockets.
#[cfg(not(unix))]
pub fn get_socket_path() -> PathBuf {
    PathBuf::from("/tmp/cadence-unsupported/daemon.sock")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn with_runtime_dir<T>(value: Option<&str>, f: impl FnOnce() -> T) -> T {
        let original = std::env::var("XDG_RUNTIME_DIR").ok();
        // SAFETY: env-mutating tests are serialized
        unsafe {
            match value {
                Some(v) => std::env::set_var("XDG_RUNTIME_DIR", v),
                None => std::env::remove_var("XDG_RUNTIME_DIR"),
            }
        }
        let result = f();
        // SAFETY: env-mutating tests are serialized
        unsafe {
            match original {
                Some(v) => std::env::set_var("XDG_RUNTIME_DIR", v),
                None => std::env::remove_var("XDG_RUNTIME_DIR"),
            }
        }
        result
    }

    #[test]
    #[serial]
    fn test_get_socket_path_with_xdg_runtime_dir() {
        let path = with_runtime_dir(Some("/run/user/1000"), get_socket_path);
        assert_eq!(path, PathBuf::from("/run/user/1000/cadence/daemon.sock"));
    }

    #[test]
    #[serial]
    fn test_get_socket_path_without_xdg_runtime_dir() {
        let path = with_runtime_dir(None, get_socket_path);
        let path = path.to_string_lossy().into_owned();
        assert!(path.starts_with("/tmp/cadence-"));
        assert!(path.ends_with("/daemon.sock"));
    }

    #[test]
    #[serial]
    fn test_socket_path_is_absolute() {
        let path = get_socket_path();
        assert!(path.is_absolute());
        assert!(path.extension().map(|e| e == "sock").unwrap_or(false));
    }
}
