//! Error types for session-core operations.

use std::path::PathBuf;
use std::time::Duration;

use crate::lifecycle::LifecycleState;

/// All errors that can occur while touching shared session state.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    // ─────────────────────────────────────────────────────────────────────
    // Locking
    // ─────────────────────────────────────────────────────────────────────
    #[error("Timed out after {timeout:?} waiting for lock {path}")]
    LockTimeout { path: PathBuf, timeout: Duration },

    // ─────────────────────────────────────────────────────────────────────
    // Session document
    // ─────────────────────────────────────────────────────────────────────
    #[error("Session file is corrupt: {path}: {details}")]
    CorruptSession { path: PathBuf, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // Hook lifecycle
    // ─────────────────────────────────────────────────────────────────────
    #[error("Illegal lifecycle transition: cannot {action} while {state:?}")]
    IllegalTransition {
        state: LifecycleState,
        action: &'static str,
    },

    #[error("Fatal hook error [{code}]: {message}")]
    Fatal { code: String, message: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    // ─────────────────────────────────────────────────────────────────────
    // I/O
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

impl SessionError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        SessionError::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        SessionError::Json {
            context: context.into(),
            source,
        }
    }

    /// Stable code used when the error is written to the error journal.
    pub fn code(&self) -> &str {
        match self {
            SessionError::LockTimeout { .. } => "LOCK_TIMEOUT",
            SessionError::CorruptSession { .. } => "CORRUPT_SESSION",
            SessionError::IllegalTransition { .. } => "ILLEGAL_TRANSITION",
            SessionError::Fatal { code, .. } => code,
            SessionError::Config(_) => "CONFIG",
            SessionError::Io { .. } => "IO",
            SessionError::Json { .. } => "JSON",
        }
    }

    /// Process status a hook should exit with when this error ends the invocation.
    ///
    /// Fatal errors block (2); everything else is reported as a warning (1).
    pub fn exit_code(&self) -> i32 {
        match self {
            SessionError::Fatal { .. } => 2,
            _ => 1,
        }
    }
}

/// Convenience type alias for Results using SessionError.
pub type Result<T> = std::result::Result<T, SessionError>;

impl From<SessionError> for String {
    fn from(err: SessionError) -> String {
        err.to_string()
    }
}
