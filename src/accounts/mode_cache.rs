//! Last-known home directory modes of locked-out accounts.
//!
//! When a stale home directory is locked, its permission bits are recorded
//! here so they can be put back if the account is provisioned again. The
//! file is best-effort state: a missing or unreadable file is an empty cache.

use crate::utils::{atomic_write, now_iso};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

/// Username to permission bits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeCache {
    #[serde(default)]
    modes: BTreeMap<String, u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<String>,
}

impl ModeCache {
    #[must_use]
    pub fn get(&self, username: &str) -> Option<u32> {
        self.modes.get(username).copied()
    }

    pub fn insert(&mut self, username: impl Into<String>, mode: u32) {
        self.modes.insert(username.into(), mode & 0o7777);
    }

    /// Merge freshly recorded entries, replacing older ones for the same user.
    pub fn merge(&mut self, entries: BTreeMap<String, u32>) {
        for (username, mode) in entries {
            self.insert(username, mode);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.modes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modes.is_empty()
    }

    /// Load the cache, treating a missing or corrupt file as empty.
    pub async fn load(path: &Path) -> Self {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) => {
                debug!("Unable to read mode cache {}: {e}", path.display());
                return Self::default();
            }
        };
        match serde_json::from_str(&content) {
            Ok(cache) => cache,
            Err(e) => {
                warn!("Ignoring corrupt mode cache {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Persist the cache. Failures are logged and otherwise ignored.
    pub async fn save(&mut self, path: &Path) {
        self.updated_at = Some(now_iso());
        let content = match serde_json::to_string_pretty(self) {
            Ok(content) => content,
            Err(e) => {
                warn!("Unable to serialize mode cache: {e}");
                return;
            }
        };
        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                warn!("Unable to create {}: {e}", parent.display());
                return;
            }
        }
        if let Err(e) = atomic_write(path, &content, 0o600).await {
            warn!("Unable to write mode cache {}: {e}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let temp = TempDir::new().unwrap();
        let cache = ModeCache::load(&temp.path().join("modes.json")).await;
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_empty() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("modes.json");
        std::fs::write(&path, "\u{80}not json").unwrap();
        assert!(ModeCache::load(&path).await.is_empty());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("state").join("modes.json");

        let mut cache = ModeCache::default();
        cache.insert("alice", 0o40751);
        cache.save(&path).await;

        let loaded = ModeCache::load(&path).await;
        assert_eq!(loaded.get("alice"), Some(0o751), "file type bits are stripped");
        assert!(loaded.updated_at.is_some());
    }

    #[tokio::test]
    async fn test_save_to_unwritable_location_is_ignored() {
        let mut cache = ModeCache::default();
        cache.insert("alice", 0o755);
        cache.save(Path::new("/proc/acctsync/modes.json")).await;
    }

    #[test]
    fn test_merge_replaces_existing_entries() {
        let mut cache = ModeCache::default();
        cache.insert("alice", 0o755);
        cache.insert("bob", 0o700);
        cache.merge(BTreeMap::from([("alice".to_string(), 0o750), ("carol".to_string(), 0o711)]));
        assert_eq!(cache.get("alice"), Some(0o750));
        assert_eq!(cache.get("bob"), Some(0o700));
        assert_eq!(cache.get("carol"), Some(0o711));
        assert_eq!(cache.len(), 3);
    }
}
