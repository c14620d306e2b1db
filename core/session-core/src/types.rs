//! Serialized session document types.
//!
//! ```json
//! {
//!   "created_at": "2026-10-19T08:30:12.412093Z",
//!   "plugins": {
//!     "swift-lint": {
//!       "data": { "last_file": "Sources/App.swift" },
//!       "recommendations_shown": { "prefer-observable": true },
//!       "validations_passed": { "concurrency:Sources/App.swift": true }
//!     }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identity of a session: the PID of the root process that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey(u32);

impl SessionKey {
    pub fn from_pid(pid: u32) -> Self {
        SessionKey(pid)
    }

    pub fn pid(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The whole on-disk session file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDocument {
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub plugins: BTreeMap<String, PluginState>,
}

impl SessionDocument {
    pub fn new() -> Self {
        SessionDocument {
            created_at: Utc::now(),
            plugins: BTreeMap::new(),
        }
    }

    /// Returns the plugin's namespace, if it has been written to.
    pub fn plugin(&self, name: &str) -> Option<&PluginState> {
        self.plugins.get(name)
    }

    /// Returns the plugin's namespace, creating an empty one on first use.
    pub fn plugin_mut(&mut self, name: &str) -> &mut PluginState {
        self.plugins.entry(name.to_string()).or_default()
    }
}

impl Default for SessionDocument {
    fn default() -> Self {
        SessionDocument::new()
    }
}

/// One plugin's slice of the session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginState {
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub recommendations_shown: BTreeMap<String, bool>,
    #[serde(default)]
    pub validations_passed: BTreeMap<String, bool>,
}

/// The two boolean tables each plugin namespace carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagTable {
    Recommendations,
    Validations,
}

impl PluginState {
    pub fn flags(&self, table: FlagTable) -> &BTreeMap<String, bool> {
        match table {
            FlagTable::Recommendations => &self.recommendations_shown,
            FlagTable::Validations => &self.validations_passed,
        }
    }

    pub fn flags_mut(&mut self, table: FlagTable) -> &mut BTreeMap<String, bool> {
        match table {
            FlagTable::Recommendations => &mut self.recommendations_shown,
            FlagTable::Validations => &mut self.validations_passed,
        }
    }

    pub fn flag(&self, table: FlagTable, key: &str) -> bool {
        self.flags(table).get(key).copied().unwrap_or(false)
    }
}

/// Looks up a dot-separated path (`"a.b.c"`) inside a JSON object.
///
/// Any missing or non-object segment yields `None`.
pub fn lookup_path<'a>(root: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = root.get(first)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Writes `value` at a dot-separated path, creating intermediate objects.
///
/// An intermediate that exists but is not an object is replaced by one.
pub fn insert_path(root: &mut Map<String, Value>, path: &str, value: Value) {
    let segments: Vec<&str> = path.split('.').collect();
    let (last, parents) = match segments.split_last() {
        Some(split) => split,
        None => return,
    };

    let mut current = root;
    for segment in parents {
        let slot = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        current = match slot.as_object_mut() {
            Some(map) => map,
            None => return,
        };
    }
    current.insert(last.to_string(), value);
}
