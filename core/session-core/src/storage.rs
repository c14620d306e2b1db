//! Storage configuration and path management for session state.
//!
//! All file path decisions live here so the store, the lock manager and the
//! journal agree on where a session's files are.
//!
//! ```text
//! <state_dir>/
//! ├── claude-session-<pid>.json            # session document
//! ├── claude-session-<pid>.json.lock       # flock target
//! └── claude-session-<pid>.errors.jsonl    # error journal
//! ```

use std::path::{Path, PathBuf};

use crate::types::SessionKey;

const STATE_DIR_NAME: &str = "claude-marketplace";
const FILE_PREFIX: &str = "claude-session-";

/// Central configuration for session storage paths.
///
/// Production code uses `StorageConfig::default()` which points into the
/// system temp directory. Tests use `StorageConfig::with_root(temp_dir)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: std::env::temp_dir().join(STATE_DIR_NAME),
        }
    }
}

impl StorageConfig {
    /// Creates a StorageConfig with a custom root directory.
    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path to the session document for `key`.
    pub fn session_file(&self, key: SessionKey) -> PathBuf {
        self.root.join(format!("{FILE_PREFIX}{key}.json"))
    }

    /// Path to the error journal for `key`.
    pub fn journal_file(&self, key: SessionKey) -> PathBuf {
        self.root.join(format!("{FILE_PREFIX}{key}.errors.jsonl"))
    }
}

/// Returns the sibling lock file for a resource (`<path>.lock`).
pub fn lock_path_for(resource: &Path) -> PathBuf {
    let mut name = resource.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}
