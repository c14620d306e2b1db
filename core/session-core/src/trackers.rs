//! Once-per-session flags layered on [`SessionStore`].
//!
//! - [`RecommendationTracker`]: "show this advice once per session"
//! - [`ValidationTracker`]: "skip re-validating a file that already passed"

use crate::error::Result;
use crate::store::SessionStore;
use crate::types::FlagTable;

#[derive(Debug, Clone, Copy)]
pub struct RecommendationTracker<'a> {
    store: &'a SessionStore,
}

impl<'a> RecommendationTracker<'a> {
    pub fn new(store: &'a SessionStore) -> Self {
        RecommendationTracker { store }
    }

    pub fn has_shown(&self, plugin: &str, key: &str) -> Result<bool> {
        self.store.flag(plugin, FlagTable::Recommendations, key)
    }

    pub fn mark_shown(&self, plugin: &str, key: &str) -> Result<()> {
        self.store.set_flag(plugin, FlagTable::Recommendations, key)
    }

    /// Returns true only for the first caller in the session.
    ///
    /// Check and mark happen under one lock, so two concurrent hooks cannot
    /// both show the same recommendation.
    pub fn show_once(&self, plugin: &str, key: &str) -> Result<bool> {
        let already_shown = self
            .store
            .test_and_set_flag(plugin, FlagTable::Recommendations, key)?;
        Ok(!already_shown)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ValidationTracker<'a> {
    store: &'a SessionStore,
}

impl<'a> ValidationTracker<'a> {
    pub fn new(store: &'a SessionStore) -> Self {
        ValidationTracker { store }
    }

    pub fn has_passed(&self, plugin: &str, check: &str, subject: &str) -> Result<bool> {
        self.store
            .flag(plugin, FlagTable::Validations, &validation_key(check, subject))
    }

    pub fn mark_passed(&self, plugin: &str, check: &str, subject: &str) -> Result<()> {
        self.store
            .set_flag(plugin, FlagTable::Validations, &validation_key(check, subject))
    }
}

/// Composite key for a `(check, subject)` pair.
pub fn validation_key(check: &str, subject: &str) -> String {
    format!("{check}:{subject}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::{LockManager, LockPolicy};
    use crate::storage::StorageConfig;
    use crate::types::SessionKey;
    use std::time::Duration;
    use tempfile::tempdir;

    fn store(root: &std::path::Path) -> SessionStore {
        SessionStore::open(
            &StorageConfig::with_root(root.to_path_buf()),
            SessionKey::from_pid(7),
            LockManager::new(Duration::from_secs(5), LockPolicy::FailClosed),
        )
    }

    #[test]
    fn test_mark_shown_is_idempotent() {
        let temp = tempdir().unwrap();
        let store = store(temp.path());
        let tracker = RecommendationTracker::new(&store);

        assert!(!tracker.has_shown("swift", "prefer-observable").unwrap());
        tracker.mark_shown("swift", "prefer-observable").unwrap();
        let after_one = store.snapshot().unwrap();
        tracker.mark_shown("swift", "prefer-observable").unwrap();
        let after_two = store.snapshot().unwrap();

        assert!(tracker.has_shown("swift", "prefer-observable").unwrap());
        assert_eq!(after_one, after_two);
    }

    #[test]
    fn test_recommendations_are_scoped_per_plugin() {
        let temp = tempdir().unwrap();
        let store = store(temp.path());
        let tracker = RecommendationTracker::new(&store);

        tracker.mark_shown("swift", "tip").unwrap();
        assert!(!tracker.has_shown("rust", "tip").unwrap());
    }

    #[test]
    fn test_show_once_only_first_time() {
        let temp = tempdir().unwrap();
        let store = store(temp.path());
        let tracker = RecommendationTracker::new(&store);

        assert!(tracker.show_once("swift", "tip").unwrap());
        assert!(!tracker.show_once("swift", "tip").unwrap());
        assert!(tracker.has_shown("swift", "tip").unwrap());
    }

    #[test]
    fn test_validation_keyed_by_check_and_subject() {
        let temp = tempdir().unwrap();
        let store = store(temp.path());
        let tracker = ValidationTracker::new(&store);

        tracker
            .mark_passed("swift", "concurrency", "Sources/App.swift")
            .unwrap();

        assert!(tracker
            .has_passed("swift", "concurrency", "Sources/App.swift")
            .unwrap());
        assert!(!tracker
            .has_passed("swift", "concurrency", "Sources/Other.swift")
            .unwrap());
        assert!(!tracker
            .has_passed("swift", "deprecations", "Sources/App.swift")
            .unwrap());
    }

    #[test]
    fn test_flags_do_not_leak_into_data() {
        let temp = tempdir().unwrap();
        let store = store(temp.path());
        RecommendationTracker::new(&store)
            .mark_shown("swift", "tip")
            .unwrap();
        assert_eq!(store.get_value("swift", "tip").unwrap(), None);
    }
}
