//! Unix Domain Socket IPC module for CLI-daemon communication.
//!
//! The running daemon answers status queries, session listings and stop
//! requests on a local socket. Messages are newline-delimited JSON objects.
//!
//! ## Socket Path
//!
//! - Primary: `$XDG_RUNTIME_DIR/remotectl/daemon.sock`
//! - Fallback: `/tmp/remotectl-$UID/daemon.sock`
//!
//! ## Example
//!
//! ```rust,no_run
//! use daemon::ipc::{get_socket_path, ControlClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ControlClient::new(get_socket_path());
//!     let status = client.status().await?;
//!     println!("{} session(s), up {}s", status.session_count, status.uptime_secs);
//!     Ok(())
//! }
//! ```

mod client;
mod messages;
mod server;

pub use client::{ControlClient, DaemonStatus, DEFAULT_CONTROL_TIMEOUT};
pub use messages::{IpcRequest, IpcResponse, IpcSessionInfo};
pub use server::{IpcConnection, IpcError, IpcServer};

use std::path::PathBuf;

/// Get the socket path for IPC communication.
///
/// 1. If `$XDG_RUNTIME_DIR` is set: `$XDG_RUNTIME_DIR/remotectl/daemon.sock`
/// 2. Otherwise: `/tmp/remotectl-$UID/daemon.sock`
pub fn get_socket_path() -> PathBuf {
    use std::os::unix::fs::MetadataExt;

    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(runtime_dir)
            .join("remotectl")
            .join("daemon.sock")
    } else {
        // UID of the owner of our own /proc entry
        let uid = std::fs::metadata("/proc/self")
            .map(|m| m.uid())
            .unwrap_or(0);

        PathBuf::from(format!("/tmp/remotectl-{}", uid)).join("daemon.sock")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn restore_runtime_dir(original: Option<String>) {
        // SAFETY: serialized with every other test touching the environment
        unsafe {
            match original {
                Some(val) => std::env::set_var("XDG_RUNTIME_DIR", val),
                None => std::env::remove_var("XDG_RUNTIME_DIR"),
            }
        }
    }

    #[test]
    #[serial]
    fn test_get_socket_path_with_xdg_runtime_dir() {
        let original = std::env::var("XDG_RUNTIME_DIR").ok();

        // SAFETY: serialized with every other test touching the environment
        unsafe {
            std::env::set_var("XDG_RUNTIME_DIR", "/run/user/1000");
        }
        let path = get_socket_path();
        assert_eq!(path, PathBuf::from("/run/user/1000/remotectl/daemon.sock"));

        restore_runtime_dir(original);
    }

    #[test]
    #[serial]
    fn test_get_socket_path_without_xdg_runtime_dir() {
        let original = std::env::var("XDG_RUNTIME_DIR").ok();

        // SAFETY: serialized with every other test touching the environment
        unsafe {
            std::env::remove_var("XDG_RUNTIME_DIR");
        }
        let path = get_socket_path();
        assert!(path.to_str().unwrap().starts_with("/tmp/remotectl-"));
        assert!(path.to_str().unwrap().ends_with("/daemon.sock"));

        restore_runtime_dir(original);
    }

    #[test]
    #[serial]
    fn test_socket_path_is_absolute_sock_file() {
        let path = get_socket_path();
        assert!(path.is_absolute());
        assert!(path.extension().map(|e| e == "sock").unwrap_or(false));
    }
}
