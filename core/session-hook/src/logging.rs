//! Diagnostic logging for session-hook.
//!
//! stdout and stderr belong to the host protocol, so diagnostics go to a
//! daily-rolling file under `CLAUDE_LOG_DIR` (default `~/.claude/logs`).
//! `RUST_LOG` wins over `CLAUDE_DEBUG_LEVEL` when both are set.

use std::path::PathBuf;

use session_core::config::{DEBUG_LEVEL_ENV, LOG_DIR_ENV};
use session_core::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const LOG_FILE_PREFIX: &str = "session-hook.log";

/// Installs the file subscriber. The returned guard flushes pending lines on drop.
///
/// Returns `None` (and logs nothing) when no log directory is usable; a hook
/// must never fail because its diagnostics can't be written.
pub fn init() -> Option<WorkerGuard> {
    let dir = log_dir()?;
    fs_err::create_dir_all(&dir).ok()?;

    let appender = tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false)
        .try_init()
        .ok()?;

    Some(guard)
}

fn log_dir() -> Option<PathBuf> {
    match std::env::var_os(LOG_DIR_ENV) {
        Some(dir) if !dir.is_empty() => Some(PathBuf::from(dir)),
        _ => dirs::home_dir().map(|home| home.join(".claude").join("logs")),
    }
}

fn default_directive() -> &'static str {
    let level = std::env::var(DEBUG_LEVEL_ENV)
        .ok()
        .and_then(|raw| raw.parse::<Level>().ok())
        .unwrap_or(Level::Warn);
    match level {
        Level::Debug => "debug",
        Level::Info => "info",
        Level::Warn => "warn",
        Level::Error | Level::Fatal => "error",
    }
}
