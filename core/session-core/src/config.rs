//! Environment-derived hook configuration.
//!
//! Hooks are configured only through the environment the host (or a parent
//! hook) hands them:
//!
//! | Variable | Meaning | Default |
//! |----------|---------|---------|
//! | `CLAUDE_SESSION_PID` | root PID, the session key | parent PID |
//! | `CLAUDE_MARKETPLACE_ROOT` / `CLAUDE_PLUGIN_ROOT` | where sibling scripts live | none |
//! | `CLAUDE_DEBUG_LEVEL` | `DEBUG`, `INFO`, `WARN`, `ERROR` | `WARN` |
//! | `CLAUDE_SESSION_DIR` | state directory | `<tmp>/claude-marketplace` |
//! | `CLAUDE_LOCK_TIMEOUT` | lock wait in seconds | `5` |
//! | `CLAUDE_HOOK_DIALECT` | `json` or `legacy` | `json` |
//! | `CLAUDE_LOG_DIR` | diagnostic log directory | `~/.claude/logs` |
//!
//! Malformed values are logged and replaced by the default; a typo in the
//! environment must not take every hook down with it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::journal::Level;
use crate::lock::{LockManager, LockPolicy, DEFAULT_LOCK_TIMEOUT};
use crate::response::Dialect;
use crate::storage::StorageConfig;
use crate::types::SessionKey;

pub const SESSION_PID_ENV: &str = "CLAUDE_SESSION_PID";
pub const MARKETPLACE_ROOT_ENV: &str = "CLAUDE_MARKETPLACE_ROOT";
pub const PLUGIN_ROOT_ENV: &str = "CLAUDE_PLUGIN_ROOT";
pub const DEBUG_LEVEL_ENV: &str = "CLAUDE_DEBUG_LEVEL";
pub const SESSION_DIR_ENV: &str = "CLAUDE_SESSION_DIR";
pub const LOCK_TIMEOUT_ENV: &str = "CLAUDE_LOCK_TIMEOUT";
pub const DIALECT_ENV: &str = "CLAUDE_HOOK_DIALECT";
pub const LOG_DIR_ENV: &str = "CLAUDE_LOG_DIR";

/// Where the session key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    /// Inherited `CLAUDE_SESSION_PID`.
    Environment,
    /// The process that spawned this hook.
    ParentProcess,
    /// Nothing usable: this invocation is its own single-shot session.
    SingleShot,
}

#[derive(Debug, Clone)]
pub struct HookConfig {
    pub session_pid: Option<u32>,
    pub marketplace_root: Option<PathBuf>,
    pub debug_level: Level,
    pub storage: StorageConfig,
    pub lock_timeout: Duration,
    pub dialect: Dialect,
    pub log_dir: Option<PathBuf>,
}

impl Default for HookConfig {
    fn default() -> Self {
        HookConfig {
            session_pid: None,
            marketplace_root: None,
            debug_level: Level::Warn,
            storage: StorageConfig::default(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            dialect: Dialect::default(),
            log_dir: None,
        }
    }
}

impl HookConfig {
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .filter(|(_, value)| !value.trim().is_empty())
            .collect();
        let defaults = HookConfig::default();

        let session_pid = vars.get(SESSION_PID_ENV).and_then(|raw| {
            match raw.trim().parse::<u32>() {
                Ok(pid) if pid > 0 => Some(pid),
                _ => {
                    tracing::warn!(value = %raw, "Ignoring invalid {}", SESSION_PID_ENV);
                    None
                }
            }
        });

        let marketplace_root = vars
            .get(MARKETPLACE_ROOT_ENV)
            .or_else(|| vars.get(PLUGIN_ROOT_ENV))
            .map(PathBuf::from);

        let debug_level = parse_or_default(&vars, DEBUG_LEVEL_ENV, defaults.debug_level);
        let dialect = parse_or_default(&vars, DIALECT_ENV, defaults.dialect);

        let storage = vars
            .get(SESSION_DIR_ENV)
            .map(|dir| StorageConfig::with_root(PathBuf::from(dir)))
            .unwrap_or(defaults.storage);

        let lock_timeout = vars
            .get(LOCK_TIMEOUT_ENV)
            .and_then(|raw| parse_lock_timeout(raw))
            .unwrap_or(defaults.lock_timeout);

        HookConfig {
            session_pid,
            marketplace_root,
            debug_level,
            storage,
            lock_timeout,
            dialect,
            log_dir: vars.get(LOG_DIR_ENV).map(PathBuf::from),
        }
    }

    pub fn lock_manager(&self, policy: LockPolicy) -> LockManager {
        LockManager::new(self.lock_timeout, policy)
    }

    /// Resolves the session key: inherited root PID, else parent PID, else
    /// this process on its own.
    pub fn resolve_session_key(&self) -> (SessionKey, KeySource) {
        if let Some(pid) = self.session_pid {
            return (SessionKey::from_pid(pid), KeySource::Environment);
        }
        match parent_pid() {
            Some(ppid) if ppid > 1 => (SessionKey::from_pid(ppid), KeySource::ParentProcess),
            _ => (
                SessionKey::from_pid(std::process::id()),
                KeySource::SingleShot,
            ),
        }
    }
}

fn parse_or_default<T>(vars: &HashMap<String, String>, name: &str, default: T) -> T
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match vars.get(name) {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|err: T::Err| {
            tracing::warn!(value = %raw, error = %err, "Ignoring invalid {}", name);
            default
        }),
    }
}

/// Seconds as a float. Negative, non-finite and unrepresentable values are rejected.
fn parse_lock_timeout(raw: &str) -> Option<Duration> {
    let parsed = raw
        .trim()
        .parse::<f64>()
        .map_err(|e| e.to_string())
        .and_then(|secs| Duration::try_from_secs_f64(secs).map_err(|e| e.to_string()));
    match parsed {
        Ok(timeout) => Some(timeout),
        Err(err) => {
            tracing::warn!(value = %raw, error = %err, "Ignoring invalid {}", LOCK_TIMEOUT_ENV);
            None
        }
    }
}

fn parent_pid() -> Option<u32> {
    #[cfg(unix)]
    {
        // SAFETY: getppid() has no failure modes and touches no memory.
        Some(unsafe { libc::getppid() } as u32)
    }
    #[cfg(not(unix))]
    {
        None
    }
}
