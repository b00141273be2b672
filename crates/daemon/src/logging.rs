//! Logging configuration using tracing.
//!
//! Logs always go to stderr. With `daemon.log_to_file` they are also written
//! to a daily rotated file under `<data_dir>/logs/`. `RUST_LOG` overrides the
//! configured level.

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::Config;

/// Base name of the rotated log files.
pub const LOG_FILE_NAME: &str = "meshtether.log";

/// Builds the filter: `RUST_LOG` if set, otherwise `level`.
pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

fn file_writer(log_dir: &Path) -> Result<RollingFileAppender> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;
    Ok(RollingFileAppender::new(
        Rotation::DAILY,
        log_dir,
        LOG_FILE_NAME,
    ))
}

/// Installs the global subscriber.
///
/// `verbose` forces the `debug` level. The returned guard flushes the log
/// file and must be held until exit.
pub fn init(config: &Config, verbose: bool) -> Result<Option<WorkerGuard>> {
    let level = if verbose {
        "debug"
    } else {
        config.daemon.log_level.as_str()
    };

    let (file_layer, guard) = if config.daemon.log_to_file {
        let (writer, guard) = tracing_appender::non_blocking(file_writer(&config.daemon.log_dir())?);
        let layer = fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(env_filter(level))
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    if config.daemon.log_to_file {
        tracing::debug!("Log directory: {}", config.daemon.log_dir().display());
    }
    Ok(guard)
}
