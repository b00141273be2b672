//! Configuration management for the MeshTether daemon.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/meshtether/config.toml`.
//!
//! Daemon configuration is distinct from user preferences: the config file
//! describes how the daemon runs (paths, worker command, timeouts), while the
//! [`PreferenceStore`](crate::prefs::PreferenceStore) holds the settings a user
//! toggles at runtime (interfaces, notification options).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("startup_timeout_secs must be between 0 and 600 seconds, got {0}")]
    InvalidStartupTimeout(u64),

    #[error("channel_capacity must be between 1 and 65536, got {0}")]
    InvalidChannelCapacity(usize),

    #[error("worker command must not be empty")]
    EmptyWorkerCommand,

    #[error("access_token must not be empty when set")]
    EmptyAccessToken,

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Upper bound for the worker startup timeout.
const MAX_STARTUP_TIMEOUT_SECS: u64 = 600;

/// Main configuration structure for the MeshTether daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General daemon configuration.
    pub daemon: DaemonConfig,

    /// Tethering worker configuration.
    pub worker: WorkerConfig,

    /// State broadcast configuration.
    pub broadcast: BroadcastConfig,
}

/// General daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Directory for daemon data (preferences, logs).
    pub data_dir: PathBuf,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Also write a daily rotated log file under `data_dir/logs`.
    pub log_to_file: bool,
}

/// Configuration for the supervised tethering worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    /// Program that brings tethering up and reports progress on stdout.
    pub command: String,

    /// Arguments passed to `command`.
    pub args: Vec<String>,

    /// Optional program run to tear tethering down. When unset the worker
    /// process is terminated instead.
    pub stop_command: Option<String>,

    /// Seconds to wait for the worker to report that it started before the
    /// startup is treated as failed (0 = wait forever).
    pub startup_timeout_secs: u64,
}

/// Configuration for the external state broadcast.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Capability token subscribers must present. Generated at startup when
    /// unset.
    pub access_token: Option<String>,

    /// Capacity of the broadcast channel; slow subscribers lag beyond it.
    pub channel_capacity: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: "info".to_string(),
            log_to_file: false,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            command: "/usr/lib/meshtether/tether".to_string(),
            args: vec!["start".to_string()],
            stop_command: None,
            startup_timeout_secs: 30,
        }
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            access_token: None,
            channel_capacity: 64,
        }
    }
}

impl WorkerConfig {
    /// Startup timeout as a duration, `None` when disabled.
    pub fn startup_timeout(&self) -> Option<Duration> {
        (self.startup_timeout_secs > 0).then(|| Duration::from_secs(self.startup_timeout_secs))
    }
}

impl DaemonConfig {
    /// Path of the preference file inside the data directory.
    pub fn prefs_path(&self) -> PathBuf {
        self.data_dir.join("prefs.json")
    }

    /// Directory for rotated log files.
    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("meshtether")
        .join("config.toml")
}

/// Returns the default data directory path.
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("meshtether")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - MESHTETHER_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - MESHTETHER_WORKER_COMMAND: Override the worker program
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("MESHTETHER_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.daemon.log_level = level;
            }
        }

        if let Ok(command) = std::env::var("MESHTETHER_WORKER_COMMAND") {
            if !command.is_empty() {
                tracing::info!("Overriding worker command from environment: {}", command);
                self.worker.command = command;
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker.startup_timeout_secs > MAX_STARTUP_TIMEOUT_SECS {
            return Err(ConfigError::InvalidStartupTimeout(
                self.worker.startup_timeout_secs,
            ));
        }

        if self.broadcast.channel_capacity == 0 || self.broadcast.channel_capacity > 65536 {
            return Err(ConfigError::InvalidChannelCapacity(
                self.broadcast.channel_capacity,
            ));
        }

        if self.worker.command.trim().is_empty() {
            return Err(ConfigError::EmptyWorkerCommand);
        }

        if let Some(token) = &self.broadcast.access_token {
            if token.trim().is_empty() {
                return Err(ConfigError::EmptyAccessToken);
            }
        }

        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
