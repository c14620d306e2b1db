//! File-backed session state shared by every hook of a session.
//!
//! # Locking Discipline
//!
//! Every public operation is one lock cycle: take the sibling `.lock`, read the
//! whole document, operate on it in memory, write it back (mutations only),
//! release. Readers lock too, so they never see a half-written file. Holding
//! the lock across the whole read-modify-write keeps sibling keys written by
//! other processes intact.
//!
//! # Atomic Writes
//!
//! Uses temp file + rename in the same directory, so the document on disk is
//! always either the previous or the next complete version.
//!
//! # Corrupt Files
//!
//! A present but unparseable document is reported as
//! [`SessionError::CorruptSession`]. It is never reset, since resetting would
//! silently throw away other writers' data.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tempfile::NamedTempFile;

use crate::error::{Result, SessionError};
use crate::lock::LockManager;
use crate::storage::{lock_path_for, StorageConfig};
use crate::types::{insert_path, lookup_path, FlagTable, SessionDocument, SessionKey};

/// Handle to one session's document on disk.
#[derive(Debug, Clone)]
pub struct SessionStore {
    key: SessionKey,
    path: PathBuf,
    locks: LockManager,
}

impl SessionStore {
    pub fn open(storage: &StorageConfig, key: SessionKey, locks: LockManager) -> Self {
        SessionStore {
            key,
            path: storage.session_file(key),
            locks,
        }
    }

    pub fn key(&self) -> SessionKey {
        self.key
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Loads or creates the session and makes sure `plugin` has a namespace.
    pub fn init(&self, plugin: &str) -> Result<SessionDocument> {
        let doc = self.update(|doc| {
            doc.plugin_mut(plugin);
            doc.clone()
        })?;
        tracing::debug!(
            session = %self.key,
            plugin = %plugin,
            plugins = doc.plugins.len(),
            "Session initialized"
        );
        Ok(doc)
    }

    /// Reads one key from the plugin's `data` map.
    pub fn get_value(&self, plugin: &str, key: &str) -> Result<Option<Value>> {
        self.read(|doc| {
            doc.plugin(plugin)
                .and_then(|state| state.data.get(key))
                .cloned()
        })
        .map(Option::flatten)
    }

    /// Overwrites one key in the plugin's `data` map.
    pub fn set_value(&self, plugin: &str, key: &str, value: Value) -> Result<()> {
        self.update(|doc| {
            doc.plugin_mut(plugin).data.insert(key.to_string(), value);
        })?;
        tracing::debug!(session = %self.key, plugin = %plugin, key = %key, "Value stored");
        Ok(())
    }

    /// Removes one key from the plugin's `data` map, returning the old value.
    pub fn remove_value(&self, plugin: &str, key: &str) -> Result<Option<Value>> {
        self.update(|doc| doc.plugin_mut(plugin).data.remove(key))
    }

    /// Reads a dot-separated path (`"a.b.c"`) inside the plugin's `data` map.
    pub fn get_nested(&self, plugin: &str, path: &str) -> Result<Option<Value>> {
        self.read(|doc| {
            doc.plugin(plugin)
                .and_then(|state| lookup_path(&state.data, path))
                .cloned()
        })
        .map(Option::flatten)
    }

    /// Writes a dot-separated path, creating missing intermediate objects.
    pub fn set_nested(&self, plugin: &str, path: &str, value: Value) -> Result<()> {
        self.update(|doc| insert_path(&mut doc.plugin_mut(plugin).data, path, value))
    }

    pub fn flag(&self, plugin: &str, table: FlagTable, key: &str) -> Result<bool> {
        self.read(|doc| {
            doc.plugin(plugin)
                .map(|state| state.flag(table, key))
                .unwrap_or(false)
        })
        .map(|found| found.unwrap_or(false))
    }

    pub fn set_flag(&self, plugin: &str, table: FlagTable, key: &str) -> Result<()> {
        self.update(|doc| {
            doc.plugin_mut(plugin)
                .flags_mut(table)
                .insert(key.to_string(), true);
        })
    }

    /// Sets a flag and reports whether it was already set, in one lock cycle.
    pub fn test_and_set_flag(&self, plugin: &str, table: FlagTable, key: &str) -> Result<bool> {
        self.update(|doc| {
            doc.plugin_mut(plugin)
                .flags_mut(table)
                .insert(key.to_string(), true)
                .unwrap_or(false)
        })
    }

    /// Time since the session document was created.
    ///
    /// A session that does not exist yet has age zero.
    pub fn age(&self) -> Result<Duration> {
        let created_at = self.read(|doc| doc.created_at)?;
        Ok(created_at
            .and_then(|created| Utc::now().signed_duration_since(created).to_std().ok())
            .unwrap_or_default())
    }

    /// Returns the whole document, if the session exists.
    pub fn snapshot(&self) -> Result<Option<SessionDocument>> {
        self.read(|doc| doc.clone())
    }

    /// Deletes the session file and its lock file.
    ///
    /// The lock file is unlinked while still locked; waiters on the old file
    /// notice and move to a fresh one.
    pub fn clear(&self) -> Result<()> {
        let guard = self.locks.acquire(&self.path)?;
        remove_if_present(&self.path)?;
        remove_if_present(&lock_path_for(&self.path))?;
        guard.release();
        tracing::info!(session = %self.key, "Session cleared");
        Ok(())
    }

    fn read<T>(&self, f: impl FnOnce(&SessionDocument) -> T) -> Result<Option<T>> {
        let _guard = self.locks.acquire(&self.path)?;
        Ok(self.load()?.as_ref().map(f))
    }

    fn update<T>(&self, f: impl FnOnce(&mut SessionDocument) -> T) -> Result<T> {
        let _guard = self.locks.acquire(&self.path)?;
        let mut doc = self.load()?.unwrap_or_default();
        let out = f(&mut doc);
        self.save(&doc)?;
        Ok(out)
    }

    fn load(&self) -> Result<Option<SessionDocument>> {
        let content = match fs_err::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SessionError::io("Failed to read session file", e)),
        };

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| SessionError::CorruptSession {
                path: self.path.clone(),
                details: e.to_string(),
            })
    }

    fn save(&self, doc: &SessionDocument) -> Result<()> {
        let content = serde_json::to_string_pretty(doc)
            .map_err(|e| SessionError::json("Failed to serialize session", e))?;

        let parent_dir = self.path.parent().ok_or_else(|| {
            SessionError::Config(format!(
                "Session file has no parent directory: {}",
                self.path.display()
            ))
        })?;
        fs_err::create_dir_all(parent_dir)
            .map_err(|e| SessionError::io("Failed to create state directory", e))?;

        let mut temp_file = NamedTempFile::new_in(parent_dir)
            .map_err(|e| SessionError::io("Failed to create temp session file", e))?;
        temp_file
            .write_all(content.as_bytes())
            .map_err(|e| SessionError::io("Failed to write temp session file", e))?;
        temp_file
            .flush()
            .map_err(|e| SessionError::io("Failed to flush temp session file", e))?;
        temp_file
            .persist(&self.path)
            .map_err(|e| SessionError::io("Failed to replace session file", e.error))?;
        Ok(())
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs_err::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SessionError::io("Failed to remove session file", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LockPolicy;
    use serde_json::json;
    use std::sync::Arc;
    use std::thread;
    use tempfile::{tempdir, TempDir};

    fn store_in(temp: &TempDir, pid: u32) -> SessionStore {
        SessionStore::open(
            &StorageConfig::with_root(temp.path().to_path_buf()),
            SessionKey::from_pid(pid),
            LockManager::new(Duration::from_secs(5), LockPolicy::FailClosed),
        )
    }

    #[test]
    fn test_init_creates_document_with_namespace() {
        let temp = tempdir().unwrap();
        let store = store_in(&temp, 100);
        assert!(!store.exists());

        let doc = store.init("plugin-a").unwrap();
        assert!(store.exists());
        assert_eq!(doc.plugin("plugin-a"), Some(&Default::default()));
    }

    #[test]
    fn test_init_two_plugins_share_one_document() {
        let temp = tempdir().unwrap();
        let store = store_in(&temp, 100);
        store.init("plugin-a").unwrap();
        let doc = store.init("plugin-b").unwrap();

        assert!(doc.plugin("plugin-a").is_some());
        assert!(doc.plugin("plugin-b").is_some());
    }

    #[test]
    fn test_init_preserves_created_at() {
        let temp = tempdir().unwrap();
        let store = store_in(&temp, 100);
        let first = store.init("plugin-a").unwrap();
        let second = store.init("plugin-a").unwrap();
        assert_eq!(first.created_at, second.created_at);
    }

    #[test]
    fn test_get_value_without_session_is_absent() {
        let temp = tempdir().unwrap();
        let store = store_in(&temp, 100);
        assert_eq!(store.get_value("plugin-a", "missing").unwrap(), None);
        assert!(!store.exists(), "pure reads must not create the session");
    }

    #[test]
    fn test_get_value_missing_namespace_is_absent() {
        let temp = tempdir().unwrap();
        let store = store_in(&temp, 100);
        store.init("plugin-a").unwrap();
        assert_eq!(store.get_value("plugin-b", "key").unwrap(), None);
    }

    #[test]
    fn test_set_then_get_value() {
        let temp = tempdir().unwrap();
        let store = store_in(&temp, 100);
        store.set_value("plugin-a", "count", json!(3)).unwrap();
        assert_eq!(store.get_value("plugin-a", "count").unwrap(), Some(json!(3)));
    }

    #[test]
    fn test_set_value_last_writer_wins() {
        let temp = tempdir().unwrap();
        let store = store_in(&temp, 100);
        store.set_value("plugin-a", "mode", json!("fast")).unwrap();
        store.set_value("plugin-a", "mode", json!("slow")).unwrap();
        assert_eq!(
            store.get_value("plugin-a", "mode").unwrap(),
            Some(json!("slow"))
        );
    }

    #[test]
    fn test_set_value_keeps_sibling_keys() {
        let temp = tempdir().unwrap();
        let store = store_in(&temp, 100);
        store.set_value("plugin-a", "one", json!(1)).unwrap();
        store.set_value("plugin-a", "two", json!(2)).unwrap();
        assert_eq!(store.get_value("plugin-a", "one").unwrap(), Some(json!(1)));
    }

    #[test]
    fn test_remove_value() {
        let temp = tempdir().unwrap();
        let store = store_in(&temp, 100);
        store.set_value("plugin-a", "gone", json!(true)).unwrap();
        assert_eq!(
            store.remove_value("plugin-a", "gone").unwrap(),
            Some(json!(true))
        );
        assert_eq!(store.get_value("plugin-a", "gone").unwrap(), None);
    }

    #[test]
    fn test_nested_round_trip() {
        let temp = tempdir().unwrap();
        let store = store_in(&temp, 100);
        store
            .set_nested("plugin-a", "files.main.checked", json!(true))
            .unwrap();

        assert_eq!(
            store.get_nested("plugin-a", "files.main.checked").unwrap(),
            Some(json!(true))
        );
        assert_eq!(
            store.get_value("plugin-a", "files").unwrap(),
            Some(json!({"main": {"checked": true}}))
        );
        assert_eq!(store.get_nested("plugin-a", "files.other").unwrap(), None);
    }

    #[test]
    fn test_sessions_are_isolated() {
        let temp = tempdir().unwrap();
        let first = store_in(&temp, 100);
        let second = store_in(&temp, 200);

        first.set_value("plugin-a", "key", json!("first")).unwrap();
        assert_eq!(second.get_value("plugin-a", "key").unwrap(), None);
        assert_ne!(first.path(), second.path());
    }

    #[test]
    fn test_age_is_monotonic() {
        let temp = tempdir().unwrap();
        let store = store_in(&temp, 100);
        store.init("plugin-a").unwrap();

        let first = store.age().unwrap();
        thread::sleep(Duration::from_millis(20));
        let second = store.age().unwrap();
        assert!(second > first);
    }

    #[test]
    fn test_age_without_session_is_zero() {
        let temp = tempdir().unwrap();
        let store = store_in(&temp, 100);
        assert_eq!(store.age().unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_clear_removes_session_and_lock() {
        let temp = tempdir().unwrap();
        let store = store_in(&temp, 100);
        store.set_value("plugin-a", "key", json!(1)).unwrap();
        store.clear().unwrap();

        assert!(!store.exists());
        assert!(!lock_path_for(store.path()).exists());

        let doc = store.init("plugin-a").unwrap();
        assert!(doc.plugin("plugin-a").unwrap().data.is_empty());
    }

    #[test]
    fn test_clear_while_waiter_blocked_keeps_single_holder() {
        let temp = tempdir().unwrap();
        let store = Arc::new(store_in(&temp, 100));
        store.set_value("plugin-a", "key", json!(1)).unwrap();
        let locks = LockManager::new(Duration::from_secs(5), LockPolicy::FailClosed);

        let held = locks.acquire(store.path()).unwrap();
        let (held_tx, held_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let waiter_path = store.path().to_path_buf();
        let waiter = thread::spawn(move || {
            let guard = locks.acquire(&waiter_path).unwrap();
            held_tx.send(guard.is_held()).unwrap();
            release_rx.recv().unwrap();
        });
        thread::sleep(Duration::from_millis(50));

        let clearing = Arc::clone(&store);
        let clearer = thread::spawn(move || clearing.clear());
        thread::sleep(Duration::from_millis(50));
        held.release();

        // Whichever of waiter and clear wins, the waiter must end up alone.
        assert!(held_rx.recv_timeout(Duration::from_secs(5)).unwrap());
        let contender = LockManager::new(Duration::from_millis(100), LockPolicy::FailClosed);
        assert!(matches!(
            contender.acquire(store.path()),
            Err(SessionError::LockTimeout { .. })
        ));

        release_tx.send(()).unwrap();
        waiter.join().unwrap();
        clearer.join().unwrap().unwrap();
    }

    #[test]
    fn test_clear_without_session_is_ok() {
        let temp = tempdir().unwrap();
        store_in(&temp, 100).clear().unwrap();
    }

    #[test]
    fn test_corrupt_document_is_reported() {
        let temp = tempdir().unwrap();
        let store = store_in(&temp, 100);
        fs_err::create_dir_all(temp.path()).unwrap();
        fs_err::write(store.path(), "{not json").unwrap();

        assert!(matches!(
            store.init("plugin-a"),
            Err(SessionError::CorruptSession { .. })
        ));
        assert!(matches!(
            store.get_value("plugin-a", "key"),
            Err(SessionError::CorruptSession { .. })
        ));
        assert_eq!(
            fs_err::read_to_string(store.path()).unwrap(),
            "{not json",
            "corrupt document must be left untouched"
        );
    }

    #[test]
    fn test_lock_released_after_corrupt_read() {
        let temp = tempdir().unwrap();
        let store = store_in(&temp, 100);
        fs_err::write(store.path(), "").unwrap();
        assert!(store.get_value("plugin-a", "key").is_err());

        let guard = LockManager::new(Duration::from_millis(100), LockPolicy::FailClosed)
            .acquire(store.path())
            .unwrap();
        assert!(guard.is_held());
    }

    #[test]
    fn test_concurrent_writers_lose_nothing() {
        let temp = tempdir().unwrap();
        let store = Arc::new(store_in(&temp, 100));

        let handles: Vec<_> = (1..=10)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    store
                        .set_value("plugin-a", &format!("counter_{i}"), json!(i))
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        for i in 1..=10 {
            assert_eq!(
                store
                    .get_value("plugin-a", &format!("counter_{i}"))
                    .unwrap(),
                Some(json!(i))
            );
        }
    }

    #[test]
    fn test_test_and_set_flag_reports_previous_state() {
        let temp = tempdir().unwrap();
        let store = store_in(&temp, 100);
        assert!(!store
            .test_and_set_flag("plugin-a", FlagTable::Recommendations, "tip")
            .unwrap());
        assert!(store
            .test_and_set_flag("plugin-a", FlagTable::Recommendations, "tip")
            .unwrap());
        assert!(!store
            .flag("plugin-a", FlagTable::Validations, "tip")
            .unwrap());
    }
}
