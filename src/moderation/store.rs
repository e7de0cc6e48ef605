//! Violation and upload stores
//!
//! Records live in memory and are written to YAML files under the data
//! directory after every change. The in-memory tables are authoritative: a
//! failed write is logged and the change stands. A store without a data
//! directory never touches the disk, which is what tests use.

use crate::ERROR_TARGET;
use crate::moderation::{StoreResult, ViolationRecord};
use crate::protocol::{RoomId, UserId};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

const VIOLATIONS_FILE: &str = "violations.yaml";
const UPLOADS_FILE: &str = "uploads.yaml";

/// Per (user, room) violation counters
#[async_trait]
pub trait ViolationStore: Send + Sync {
    /// Current count, 0 when there is no record
    async fn get_count(&self, user_id: &UserId, room_id: &RoomId) -> StoreResult<u32>;

    /// Create the record if needed and count one violation, returning the new count
    async fn upsert_increment(&self, user_id: &UserId, room_id: &RoomId) -> StoreResult<u32>;

    /// Remove the record, returning whether one existed
    async fn delete(&self, user_id: &UserId, room_id: &RoomId) -> StoreResult<bool>;
}

/// A cached upload of a local file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadEntry {
    pub path: String,
    pub content_uri: String,
}

/// Bot storage: violation records and the upload cache
#[derive(Default)]
pub struct Storage {
    violations: DashMap<(UserId, RoomId), ViolationRecord>,
    uploads: DashMap<String, String>,
    data_dir: Option<PathBuf>,
    /// Serializes file writes so snapshots land in order
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("violations", &self.violations.len())
            .field("uploads", &self.uploads.len())
            .field("data_dir", &self.data_dir)
            .finish_non_exhaustive()
    }
}

impl Storage {
    /// Storage that is never persisted
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load storage from `data_dir`, creating the directory if needed
    ///
    /// Missing files are treated as empty.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created or an existing
    /// file cannot be read or parsed.
    pub async fn load(data_dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let data_dir = data_dir.into();
        tokio::fs::create_dir_all(&data_dir).await?;

        let storage = Self {
            data_dir: Some(data_dir.clone()),
            ..Self::default()
        };

        if let Some(records) = read_yaml::<Vec<ViolationRecord>>(&data_dir.join(VIOLATIONS_FILE)).await? {
            for record in records {
                storage
                    .violations
                    .insert((record.user_id.clone(), record.room_id.clone()), record);
            }
        }

        if let Some(entries) = read_yaml::<Vec<UploadEntry>>(&data_dir.join(UPLOADS_FILE)).await? {
            for entry in entries {
                storage.uploads.insert(entry.path, entry.content_uri);
            }
        }

        info!(
            violations = storage.violations.len(),
            uploads = storage.uploads.len(),
            data_dir = %data_dir.display(),
            "Storage loaded"
        );
        Ok(storage)
    }

    /// All violation records
    #[must_use]
    pub fn violations(&self) -> Vec<ViolationRecord> {
        self.violations
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Get a violation record
    #[must_use]
    pub fn get_violation(&self, user_id: &UserId, room_id: &RoomId) -> Option<ViolationRecord> {
        self.violations
            .get(&(user_id.clone(), room_id.clone()))
            .map(|entry| entry.value().clone())
    }

    /// Content URI of a previously uploaded file
    #[must_use]
    pub fn content_uri(&self, path: &str) -> Option<String> {
        self.uploads.get(path).map(|entry| entry.value().clone())
    }

    /// Remember the content URI of an uploaded file
    ///
    /// # Errors
    /// Returns an error if the upload cache cannot be written.
    pub async fn set_content_uri(&self, path: &str, content_uri: &str) -> StoreResult<()> {
        debug!(path, content_uri, "Caching upload");
        self.uploads.insert(path.to_string(), content_uri.to_string());
        self.save_uploads().await
    }

    /// Write the violation table, logging instead of failing
    async fn persist_violations(&self) {
        if let Err(e) = self.save_violations().await {
            error!(
                target: ERROR_TARGET,
                records = self.violations.len(),
                "Failed to persist violations: {e}"
            );
        }
    }

    async fn save_violations(&self) -> StoreResult<()> {
        let Some(data_dir) = &self.data_dir else {
            return Ok(());
        };

        let _guard = self.write_lock.lock().await;
        let mut records = self.violations();
        records.sort_by(|a, b| (&a.room_id, &a.user_id).cmp(&(&b.room_id, &b.user_id)));
        let yaml = serde_yaml::to_string(&records)?;
        tokio::fs::write(data_dir.join(VIOLATIONS_FILE), yaml).await?;
        Ok(())
    }

    async fn save_uploads(&self) -> StoreResult<()> {
        let Some(data_dir) = &self.data_dir else {
            return Ok(());
        };

        let _guard = self.write_lock.lock().await;
        let mut entries: Vec<UploadEntry> = self
            .uploads
            .iter()
            .map(|entry| UploadEntry {
                path: entry.key().clone(),
                content_uri: entry.value().clone(),
            })
            .collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        let yaml = serde_yaml::to_string(&entries)?;
        tokio::fs::write(data_dir.join(UPLOADS_FILE), yaml).await?;
        Ok(())
    }
}

#[async_trait]
impl ViolationStore for Storage {
    async fn get_count(&self, user_id: &UserId, room_id: &RoomId) -> StoreResult<u32> {
        Ok(self
            .get_violation(user_id, room_id)
            .map_or(0, |record| record.count))
    }

    async fn upsert_increment(&self, user_id: &UserId, room_id: &RoomId) -> StoreResult<u32> {
        let count = self
            .violations
            .entry((user_id.clone(), room_id.clone()))
            .or_insert_with(|| ViolationRecord::new(user_id.clone(), room_id.clone()))
            .increment();

        self.persist_violations().await;
        Ok(count)
    }

    async fn delete(&self, user_id: &UserId, room_id: &RoomId) -> StoreResult<bool> {
        let removed = self
            .violations
            .remove(&(user_id.clone(), room_id.clone()))
            .is_some();

        if removed {
            self.persist_violations().await;
        }
        Ok(removed)
    }
}

async fn read_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> StoreResult<Option<T>> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(Some(serde_yaml::from_str(&content)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> UserId {
        UserId::from("@alice:example.org")
    }

    fn general() -> RoomId {
        RoomId::from("!general:example.org")
    }

    fn temp_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("thread-warden-{name}-{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_count_increment_and_delete() {
        let store = Storage::in_memory();

        assert_eq!(store.get_count(&alice(), &general()).await.unwrap(), 0);
        assert_eq!(store.upsert_increment(&alice(), &general()).await.unwrap(), 1);
        assert_eq!(store.upsert_increment(&alice(), &general()).await.unwrap(), 2);
        assert_eq!(store.get_count(&alice(), &general()).await.unwrap(), 2);

        assert!(store.delete(&alice(), &general()).await.unwrap());
        assert!(!store.delete(&alice(), &general()).await.unwrap());
        assert_eq!(store.get_count(&alice(), &general()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_records_are_per_room() {
        let store = Storage::in_memory();
        let other = RoomId::from("!other:example.org");

        store.upsert_increment(&alice(), &general()).await.unwrap();
        store.upsert_increment(&alice(), &general()).await.unwrap();
        store.upsert_increment(&alice(), &other).await.unwrap();

        assert_eq!(store.get_count(&alice(), &general()).await.unwrap(), 2);
        assert_eq!(store.get_count(&alice(), &other).await.unwrap(), 1);
        assert_eq!(store.violations().len(), 2);
    }

    #[tokio::test]
    async fn test_persists_across_reload() {
        let dir = temp_dir("store");

        let store = Storage::load(&dir).await.unwrap();
        store.upsert_increment(&alice(), &general()).await.unwrap();
        store
            .set_content_uri("media/info_threads.gif", "mxc://example.org/abc")
            .await
            .unwrap();
        drop(store);

        let reloaded = Storage::load(&dir).await.unwrap();
        assert_eq!(reloaded.get_count(&alice(), &general()).await.unwrap(), 1);
        assert_eq!(
            reloaded.content_uri("media/info_threads.gif").as_deref(),
            Some("mxc://example.org/abc")
        );

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn test_failed_save_keeps_in_memory_change() {
        let dir = temp_dir("unwritable");
        let store = Storage::load(&dir).await.unwrap();
        // A directory in place of the file makes every write fail
        tokio::fs::create_dir_all(dir.join(VIOLATIONS_FILE)).await.unwrap();

        assert_eq!(store.upsert_increment(&alice(), &general()).await.unwrap(), 1);
        assert_eq!(store.upsert_increment(&alice(), &general()).await.unwrap(), 2);
        assert_eq!(store.get_count(&alice(), &general()).await.unwrap(), 2);
        assert!(store.save_violations().await.is_err());

        assert!(store.delete(&alice(), &general()).await.unwrap());
        assert_eq!(store.get_count(&alice(), &general()).await.unwrap(), 0);

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = temp_dir("corrupt");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join(VIOLATIONS_FILE), "{ not: [valid").await.unwrap();

        let result = Storage::load(&dir).await;
        assert!(matches!(result, Err(crate::moderation::StoreError::Yaml(_))));

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
