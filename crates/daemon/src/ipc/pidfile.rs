//! PID file utilities for daemon running detection.
//!
//! This module provides functions to check if a daemon is already running
//! by examining the PID file and verifying the process exists.
//!
//! The PID file lives in the daemon data directory, see
//! [`Config::pid_file_path`](crate::config::Config::pid_file_path).

use std::fs;
use std::io;
use std::path::Path;

/// File name of the PID file inside the data directory.
pub const PID_FILE_NAME: &str = "daemon.pid";

/// Get the PID of the running daemon recorded at `pid_path`, if any.
///
/// Stale or unreadable PID files are removed.
pub fn get_daemon_pid(pid_path: &Path) -> Option<u32> {
    let pid_str = fs::read_to_string(pid_path).ok()?;

    let pid: u32 = match pid_str.trim().parse() {
        Ok(p) => p,
        Err(_) => {
            cleanup_stale_pid_file(pid_path);
            return None;
        }
    };

    if is_process_running(pid) {
        Some(pid)
    } else {
        cleanup_stale_pid_file(pid_path);
        None
    }
}

/// Record the current process as the daemon.
pub fn write_pid_file(pid_path: &Path) -> io::Result<()> {
    if let Some(parent) = pid_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(pid_path, format!("{}\n", std::process::id()))
}

/// Remove the PID file if it names the current process.
pub fn remove_pid_file(pid_path: &Path) {
    let ours = fs::read_to_string(pid_path)
        .ok()
        .and_then(|s| s.trim().parse::<u32>().ok())
        == Some(std::process::id());
    if ours {
        cleanup_stale_pid_file(pid_path);
    }
}

/// Check if a process with the given PID is running.
///
/// On Linux, this checks if `/proc/{pid}/stat` exists.
/// On other Unix systems, this sends signal 0.
fn is_process_running(pid: u32) -> bool {
    #[cfg(target_os = "linux")]
    {
        let proc_path = format!("/proc/{}/stat", pid);
        Path::new(&proc_path).exists()
    }

    #[cfg(all(unix, not(target_os = "linux")))]
    {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        i32::try_from(pid)
            .map(|pid| kill(Pid::from_raw(pid), None).is_ok())
            .unwrap_or(false)
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

fn cleanup_stale_pid_file(path: &Path) {
    let _ = fs::remove_file(path);
}
