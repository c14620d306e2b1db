//! Append-only JSON-Lines error journal.
//!
//! One JSON object per line. No lock is taken: each entry is serialized up
//! front and handed to a single `write` on an `O_APPEND` descriptor, which the
//! platform applies atomically for writes this small. Interleaving between
//! concurrent hooks is possible at line granularity, never inside a line.
//!
//! The core only ever appends. Rotation and retention belong to whoever owns
//! the state directory.

use std::fmt;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, SessionError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
            Level::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEBUG" | "TRACE" => Ok(Level::Debug),
            "INFO" => Ok(Level::Info),
            "WARN" | "WARNING" => Ok(Level::Warn),
            "ERROR" => Ok(Level::Error),
            "FATAL" => Ok(Level::Fatal),
            other => Err(format!("unknown level: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    pub plugin: String,
    pub hook: String,
    pub code: String,
    pub message: String,
    #[serde(default = "empty_object")]
    pub context: Value,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl JournalEntry {
    pub fn new(
        level: Level,
        plugin: &str,
        hook: &str,
        code: &str,
        message: impl Into<String>,
    ) -> Self {
        JournalEntry {
            timestamp: Utc::now(),
            level,
            plugin: plugin.to_string(),
            hook: hook.to_string(),
            code: code.to_string(),
            message: message.into(),
            context: empty_object(),
        }
    }

    /// Attaches structured context. Non-object values are wrapped as `{"value": ...}`.
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = match context {
            Value::Object(_) => context,
            Value::Null => empty_object(),
            other => serde_json::json!({ "value": other }),
        };
        self
    }
}

#[derive(Debug, Clone)]
pub struct ErrorJournal {
    path: PathBuf,
    threshold: Level,
}

impl ErrorJournal {
    pub fn new(path: PathBuf, threshold: Level) -> Self {
        ErrorJournal { path, threshold }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn threshold(&self) -> Level {
        self.threshold
    }

    /// Appends one entry. Returns `false` when the entry was below the threshold.
    ///
    /// FATAL entries are always written.
    pub fn append(&self, entry: &JournalEntry) -> Result<bool> {
        if entry.level < self.threshold && entry.level != Level::Fatal {
            return Ok(false);
        }

        let mut line = serde_json::to_string(entry)
            .map_err(|e| SessionError::json("Failed to serialize journal entry", e))?;
        line.push('\n');

        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent)
                .map_err(|e| SessionError::io("Failed to create journal directory", e))?;
        }

        let mut file = fs_err::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| SessionError::io("Failed to open error journal", e))?;
        file.write_all(line.as_bytes())
            .map_err(|e| SessionError::io("Failed to append to error journal", e))?;
        Ok(true)
    }

    /// Records a FATAL entry and returns the error the caller must exit with.
    pub fn fatal(
        &self,
        plugin: &str,
        hook: &str,
        code: &str,
        message: &str,
        context: Value,
    ) -> SessionError {
        let entry =
            JournalEntry::new(Level::Fatal, plugin, hook, code, message).with_context(context);
        if let Err(err) = self.append(&entry) {
            tracing::error!(error = %err, code = %code, "Failed to journal fatal error");
        }
        tracing::error!(
            plugin = %plugin,
            hook = %hook,
            code = %code,
            message = %message,
            "Fatal hook error"
        );
        SessionError::Fatal {
            code: code.to_string(),
            message: message.to_string(),
        }
    }

    /// Reads every well-formed entry. Malformed lines are skipped.
    pub fn entries(&self) -> Result<Vec<JournalEntry>> {
        let file = match fs_err::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SessionError::io("Failed to open error journal", e)),
        };

        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| SessionError::io("Failed to read error journal", e))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<JournalEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(err) => tracing::debug!(error = %err, "Skipping malformed journal line"),
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::thread;
    use tempfile::tempdir;

    #[test]
    fn test_level_parsing() {
        assert_eq!("debug".parse::<Level>().unwrap(), Level::Debug);
        assert_eq!("WARNING".parse::<Level>().unwrap(), Level::Warn);
        assert_eq!(" Error ".parse::<Level>().unwrap(), Level::Error);
        assert!("loud".parse::<Level>().is_err());
        assert!(Level::Debug < Level::Fatal);
    }

    #[test]
    fn test_append_writes_one_line_per_entry() {
        let temp = tempdir().unwrap();
        let journal = ErrorJournal::new(temp.path().join("errors.jsonl"), Level::Debug);

        journal
            .append(&JournalEntry::new(Level::Warn, "swift", "pre", "W001", "first"))
            .unwrap();
        journal
            .append(
                &JournalEntry::new(Level::Error, "swift", "post", "E001", "second")
                    .with_context(json!({"file": "App.swift"})),
            )
            .unwrap();

        let raw = fs_err::read_to_string(journal.path()).unwrap();
        assert_eq!(raw.lines().count(), 2);

        let first: Value = serde_json::from_str(raw.lines().next().unwrap()).unwrap();
        assert_eq!(first["level"], "WARN");
        assert_eq!(first["code"], "W001");
        assert_eq!(first["context"], json!({}));

        let entries = journal.entries().unwrap();
        assert_eq!(entries[1].context, json!({"file": "App.swift"}));
    }

    #[test]
    fn test_below_threshold_is_skipped() {
        let temp = tempdir().unwrap();
        let journal = ErrorJournal::new(temp.path().join("errors.jsonl"), Level::Error);

        let written = journal
            .append(&JournalEntry::new(Level::Info, "p", "h", "I001", "noise"))
            .unwrap();
        assert!(!written);
        assert!(journal.entries().unwrap().is_empty());
    }

    #[test]
    fn test_fatal_always_journals_and_returns_fatal_error() {
        let temp = tempdir().unwrap();
        let journal = ErrorJournal::new(temp.path().join("errors.jsonl"), Level::Fatal);

        let err = journal.fatal("swift", "pre", "F001", "cannot continue", json!({"step": 2}));
        assert!(matches!(err, SessionError::Fatal { ref code, .. } if code == "F001"));
        assert_eq!(err.exit_code(), 2);

        let entries = journal.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].level, Level::Fatal);
        assert_eq!(entries[0].context, json!({"step": 2}));
    }

    #[test]
    fn test_scalar_context_is_wrapped() {
        let entry = JournalEntry::new(Level::Info, "p", "h", "c", "m").with_context(json!(5));
        assert_eq!(entry.context, json!({"value": 5}));
    }

    #[test]
    fn test_entries_skip_malformed_lines() {
        let temp = tempdir().unwrap();
        let journal = ErrorJournal::new(temp.path().join("errors.jsonl"), Level::Debug);
        journal
            .append(&JournalEntry::new(Level::Warn, "p", "h", "W", "ok"))
            .unwrap();
        let mut file = fs_err::OpenOptions::new()
            .append(true)
            .open(journal.path())
            .unwrap();
        file.write_all(b"{truncated\n").unwrap();

        assert_eq!(journal.entries().unwrap().len(), 1);
    }

    #[test]
    fn test_missing_journal_reads_empty() {
        let temp = tempdir().unwrap();
        let journal = ErrorJournal::new(temp.path().join("none.jsonl"), Level::Debug);
        assert!(journal.entries().unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_appends_keep_lines_intact() {
        let temp = tempdir().unwrap();
        let journal = Arc::new(ErrorJournal::new(
            temp.path().join("errors.jsonl"),
            Level::Debug,
        ));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let journal = Arc::clone(&journal);
                thread::spawn(move || {
                    for j in 0..25 {
                        journal
                            .append(&JournalEntry::new(
                                Level::Warn,
                                "p",
                                "h",
                                &format!("W{i}-{j}"),
                                "concurrent",
                            ))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let raw = fs_err::read_to_string(journal.path()).unwrap();
        assert_eq!(raw.lines().count(), 200);
        assert_eq!(journal.entries().unwrap().len(), 200);
    }
}
