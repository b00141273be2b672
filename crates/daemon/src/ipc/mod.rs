//! Unix Domain Socket IPC module for CLI-daemon communication.
//!
//! This module provides the local control channel between the CLI and the
//! daemon using Unix Domain Sockets.
//!
//! ## Overview
//!
//! The IPC system uses a JSON newline-delimited protocol. Each message is a
//! single JSON object followed by a newline. A connection whose first request
//! is `Subscribe` becomes a stream of `StateChanged` lines instead.
//!
//! ## Socket Path
//!
//! The socket path follows the XDG Base Directory Specification:
//! - Primary: `$XDG_RUNTIME_DIR/meshtether/daemon.sock`
//! - Fallback: `/tmp/meshtether-$UID/daemon.sock`
//!
//! ## Example
//!
//! ```rust,no_run
//! use meshtether::ipc::{get_socket_path, IpcClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = IpcClient::connect(&get_socket_path()).await?;
//!     println!("{:?}", client.toggle().await?);
//!     Ok(())
//! }
//! ```

mod client;
mod handler;
mod messages;
pub mod pidfile;
mod server;

pub use client::IpcClient;
pub use handler::{run_control_server, serve_connection, ControlHandler};
pub use messages::{IpcRequest, IpcResponse};
pub use pidfile::{get_daemon_pid, get_pid_file_path, is_daemon_running, PidFile};
pub use server::{IpcConnection, IpcError, IpcServer};

use std::path::PathBuf;

/// Get the socket path for IPC communication.
///
/// 1. If `$XDG_RUNTIME_DIR` is set: `$XDG_RUNTIME_DIR/meshtether/daemon.sock`
/// 2. Otherwise: `/tmp/meshtether-$UID/daemon.sock`
pub fn get_socket_path() -> PathBuf {
    use std::os::unix::fs::MetadataExt;

    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(runtime_dir)
            .join("meshtether")
            .join("daemon.sock")
    } else {
        // UID of the owner of our own /proc entry
        let uid = std::fs::metadata("/proc/self")
            .map(|m| m.uid())
            .unwrap_or(0);

        PathBuf::from(format!("/tmp/meshtether-{}", uid)).join("daemon.sock")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_get_socket_path_with_xdg_runtime_dir() {
        let original = std::env::var("XDG_RUNTIME_DIR").ok();

        std::env::set_var("XDG_RUNTIME_DIR", "/run/user/1000");
        let path = get_socket_path();
        assert_eq!(path, PathBuf::from("/run/user/1000/meshtether/daemon.sock"));

        match original {
            Some(val) => std::env::set_var("XDG_RUNTIME_DIR", val),
            None => std::env::remove_var("XDG_RUNTIME_DIR"),
        }
    }

    #[test]
    #[serial]
    fn test_get_socket_path_without_xdg_runtime_dir() {
        let original = std::env::var("XDG_RUNTIME_DIR").ok();

        std::env::remove_var("XDG_RUNTIME_DIR");
        let path = get_socket_path();
        let path_str = path.to_string_lossy();
        assert!(path_str.starts_with("/tmp/meshtether-"));
        assert!(path_str.ends_with("/daemon.sock"));

        if let Some(val) = original {
            std::env::set_var("XDG_RUNTIME_DIR", val);
        }
    }

    #[test]
    #[serial]
    fn test_socket_path_ends_with_sock() {
        let path = get_socket_path();
        assert!(path.is_absolute());
        assert!(path.extension().is_some_and(|e| e == "sock"));
    }
}
