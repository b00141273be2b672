//! PID file utilities for daemon running detection.
//!
//! The running daemon holds a [`PidFile`] for its lifetime; the CLI reads it
//! to tell whether a daemon is already up.
//!
//! ## PID File Location
//!
//! The PID file is stored at:
//! - `$XDG_DATA_HOME/meshtether/daemon.pid` if XDG_DATA_HOME is set
//! - `~/.local/share/meshtether/daemon.pid` otherwise

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Get the path to the daemon PID file.
pub fn get_pid_file_path() -> PathBuf {
    let data_dir = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".local/share")
        });
    data_dir.join("meshtether").join("daemon.pid")
}

/// Check if a daemon process is currently running.
pub fn is_daemon_running() -> bool {
    get_daemon_pid().is_some()
}

/// Get the PID of the running daemon, if any.
///
/// Stale PID files are removed.
pub fn get_daemon_pid() -> Option<u32> {
    read_live_pid(&get_pid_file_path())
}

fn read_live_pid(pid_path: &Path) -> Option<u32> {
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

/// Check if a process with the given PID is running.
///
/// Checks for `/proc/{pid}/stat`.
fn is_process_running(pid: u32) -> bool {
    Path::new(&format!("/proc/{}/stat", pid)).exists()
}

fn cleanup_stale_pid_file(path: &Path) {
    let _ = fs::remove_file(path);
}

/// PID file owned by the running daemon. Removed on drop.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Writes the current process ID to `path`.
    ///
    /// Fails with [`io::ErrorKind::AlreadyExists`] if another live daemon
    /// owns the file.
    pub fn create(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        if let Some(pid) = read_live_pid(&path) {
            if pid != std::process::id() {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("daemon already running with PID {}", pid),
                ));
            }
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, format!("{}\n", std::process::id()))?;
        tracing::debug!("Wrote PID file {:?}", path);
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        cleanup_stale_pid_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_pid_file_path_structure() {
        let path = get_pid_file_path();
        assert!(path.ends_with("meshtether/daemon.pid"));
    }

    #[test]
    fn test_is_process_running_current() {
        assert!(is_process_running(std::process::id()));
    }

    #[test]
    fn test_is_process_running_invalid() {
        assert!(!is_process_running(4_000_000_000));
    }

    #[test]
    fn test_stale_pid_file_is_removed() {
        let temp_dir = tempfile::tempdir().unwrap();
        let pid_file = temp_dir.path().join("daemon.pid");
        fs::write(&pid_file, "4000000000\n").unwrap();

        assert_eq!(read_live_pid(&pid_file), None);
        assert!(!pid_file.exists(), "Stale PID file should be cleaned up");
    }

    #[test]
    fn test_garbage_pid_file_is_removed() {
        let temp_dir = tempfile::tempdir().unwrap();
        let pid_file = temp_dir.path().join("daemon.pid");
        fs::write(&pid_file, "not a pid").unwrap();

        assert_eq!(read_live_pid(&pid_file), None);
        assert!(!pid_file.exists());
    }

    #[test]
    fn test_pid_file_lifecycle() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("nested").join("daemon.pid");

        let guard = PidFile::create(&path).unwrap();
        assert_eq!(read_live_pid(guard.path()), Some(std::process::id()));

        drop(guard);
        assert!(!path.exists());
    }

    #[test]
    fn test_pid_file_refuses_live_foreign_pid() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("daemon.pid");
        // PID 1 is always alive.
        fs::write(&path, "1\n").unwrap();

        let err = PidFile::create(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert!(path.exists());
    }
}
