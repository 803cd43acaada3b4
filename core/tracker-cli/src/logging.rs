//! File logging for the CLI.
//!
//! Stdout carries rendered snapshots, so diagnostics go to a daily rolling
//! file under `~/.locotrack/logs/`. If the directory cannot be created the CLI
//! runs without logging rather than failing.

use fs_err as fs;
use std::env;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const LOG_FILE_PREFIX: &str = "locotrack.log";
const DEBUG_ENV: &str = "LOCOTRACK_DEBUG_LOG";

/// Keeps the non-blocking writer alive; dropping it flushes pending lines.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

pub fn init() -> Option<LoggingGuard> {
    let log_dir = default_log_dir()?;
    init_in(&log_dir).ok()
}

fn init_in(log_dir: &Path) -> Result<LoggingGuard, String> {
    fs::create_dir_all(log_dir).map_err(|err| format!("Failed to create log directory: {}", err))?;

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (writer, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(file_layer)
        .try_init()
        .map_err(|err| format!("Failed to install subscriber: {}", err))?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

fn env_filter() -> EnvFilter {
    let debug_enabled = env::var(DEBUG_ENV)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

pub fn default_log_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".locotrack").join("logs"))
}
