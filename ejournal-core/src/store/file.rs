//! File-backed secret storage.
//!
//! Secrets are kept in a single JSON document, by default at
//! `~/.local/share/ejournal/credentials.json` on Linux and the matching data
//! directory elsewhere. The file is rewritten on every change and created
//! with owner-only permissions on Unix.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::{Secret, SecretStore, StoreError};

/// On-disk format.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileStoreData {
    /// Format version (for future migrations).
    version: u32,

    entries: BTreeMap<String, Secret>,
}

impl Default for FileStoreData {
    fn default() -> Self {
        Self {
            version: 1,
            entries: BTreeMap::new(),
        }
    }
}

/// JSON file secret store.
///
/// Changes are written to disk before they become visible in memory, so a
/// failed write leaves both unchanged.
pub struct FileStore {
    path: PathBuf,
    data: RwLock<FileStoreData>,

    /// Serializes read-modify-write cycles.
    writer: tokio::sync::Mutex<()>,
}

impl FileStore {
    /// Default location of the credentials file.
    pub fn default_path() -> Result<PathBuf, StoreError> {
        let dirs = directories::ProjectDirs::from("nl", "ejournal", "ejournal")
            .ok_or(StoreError::DataDirUnavailable)?;

        Ok(dirs.data_dir().join("credentials.json"))
    }

    /// Open the store at `path`, reading existing entries if the file exists.
    ///
    /// Parent directories are created as needed; the file itself is only
    /// written on the first change.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let data = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        } else {
            FileStoreData::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
            writer: tokio::sync::Mutex::new(()),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `change` to a copy of the entries, persist it, then publish it.
    ///
    /// `change` returns `false` when there is nothing to write.
    async fn update<F>(&self, change: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut FileStoreData) -> bool,
    {
        let _writer = self.writer.lock().await;

        let mut next = self.data.read().clone();
        if !change(&mut next) {
            return Ok(());
        }

        let contents = serde_json::to_string_pretty(&next)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_private(&path, contents.as_bytes()))
            .await
            .map_err(|e| StoreError::BackendError {
                message: format!("credential write task failed: {}", e),
            })??;

        *self.data.write() = next;
        Ok(())
    }
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents)
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    fs::write(path, contents)
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("path", &self.path)
            .field("keys_count", &self.data.read().entries.len())
            .finish()
    }
}

#[async_trait]
impl SecretStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        Ok(self.data.read().entries.get(key).cloned())
    }

    async fn set(&self, key: &str, secret: &Secret) -> Result<(), StoreError> {
        self.update(|data| {
            data.entries.insert(key.to_string(), secret.clone());
            true
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.update(|data| data.entries.remove(key).is_some()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_store() -> (FileStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path().join("nested").join("credentials.json")).unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn test_file_store_roundtrip_across_instances() {
        let (store, _dir) = temp_store();
        let path = store.path().to_path_buf();

        store.set("ejournal/access", &Secret::new("a1")).await.unwrap();
        store.set("ejournal/refresh", &Secret::new("r1")).await.unwrap();
        drop(store);

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(
            reopened.get("ejournal/access").await.unwrap(),
            Some(Secret::new("a1"))
        );
        assert_eq!(
            reopened.get("ejournal/refresh").await.unwrap(),
            Some(Secret::new("r1"))
        );
    }

    #[tokio::test]
    async fn test_file_store_delete() {
        let (store, _dir) = temp_store();

        store.set("k", &Secret::new("v")).await.unwrap();
        store.delete("k").await.unwrap();
        store.delete("k").await.unwrap();

        let reopened = FileStore::open(store.path()).unwrap();
        assert!(reopened.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_write_leaves_entries_unchanged() {
        let (store, dir) = temp_store();
        store.set("k", &Secret::new("v1")).await.unwrap();

        fs::remove_dir_all(dir.path().join("nested")).unwrap();

        assert!(store.set("k", &Secret::new("v2")).await.is_err());
        assert_eq!(store.get("k").await.unwrap(), Some(Secret::new("v1")));

        assert!(store.delete("k").await.is_err());
        assert_eq!(store.get("k").await.unwrap(), Some(Secret::new("v1")));
    }

    #[test]
    fn test_file_store_rejects_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials.json");
        fs::write(&path, "not json").unwrap();

        let result = FileStore::open(&path);
        assert!(matches!(result, Err(StoreError::SerializationError(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_store_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let (store, _dir) = temp_store();
        store.set("k", &Secret::new("v")).await.unwrap();

        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
