//! File Storage Port (spec.md §4.8): an abstract blob store for uploaded
//! files, keyed by an opaque stored name. `LocalDiskStorage` is the only
//! implementation, writing blobs under `Config::database::upload_dir`.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

#[async_trait]
pub trait FileStoragePort: Send + Sync {
    async fn store(&self, bytes: &[u8]) -> std::io::Result<String>;
    async fn open(&self, stored_name: &str) -> std::io::Result<Bytes>;
    async fn delete(&self, stored_name: &str) -> std::io::Result<()>;
    /// Removes every blob whose name is not in `referenced`. Returns the
    /// count removed (spec.md §9: sweep races are benign by construction,
    /// not by locking — see DESIGN.md).
    async fn sweep(&self, referenced: &HashSet<String>) -> std::io::Result<u64>;
}

pub struct LocalDiskStorage {
    root: PathBuf,
}

impl LocalDiskStorage {
    pub async fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn path_for(&self, stored_name: &str) -> PathBuf {
        self.root.join(stored_name)
    }
}

#[async_trait]
impl FileStoragePort for LocalDiskStorage {
    async fn store(&self, bytes: &[u8]) -> std::io::Result<String> {
        let stored_name = Uuid::new_v4().to_string();
        let path = self.path_for(&stored_name);
        let mut file = tokio::fs::File::create(&path).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        Ok(stored_name)
    }

    async fn open(&self, stored_name: &str) -> std::io::Result<Bytes> {
        let bytes = tokio::fs::read(self.path_for(stored_name)).await?;
        Ok(Bytes::from(bytes))
    }

    async fn delete(&self, stored_name: &str) -> std::io::Result<()> {
        match tokio::fs::remove_file(self.path_for(stored_name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn sweep(&self, referenced: &HashSet<String>) -> std::io::Result<u64> {
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !referenced.contains(&name) {
                if entry_is_file(entry.path()).await {
                    tokio::fs::remove_file(entry.path()).await?;
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

async fn entry_is_file(path: PathBuf) -> bool {
    tokio::fs::metadata(&path).await.map(|m| m.is_file()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_then_open_returns_identical_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalDiskStorage::new(dir.path().to_path_buf()).await.unwrap();
        let payload = b"hello relay";
        let name = storage.store(payload).await.unwrap();
        let read_back = storage.open(&name).await.unwrap();
        assert_eq!(read_back.as_ref(), payload);
    }

    #[tokio::test]
    async fn sweep_removes_unreferenced_files_only() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalDiskStorage::new(dir.path().to_path_buf()).await.unwrap();
        let keep = storage.store(b"keep me").await.unwrap();
        let drop_name = storage.store(b"drop me").await.unwrap();

        let mut referenced = HashSet::new();
        referenced.insert(keep.clone());
        let removed = storage.sweep(&referenced).await.unwrap();

        assert_eq!(removed, 1);
        assert!(storage.open(&keep).await.is_ok());
        assert!(storage.open(&drop_name).await.is_err());
    }

    #[tokio::test]
    async fn delete_is_idempotent_for_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalDiskStorage::new(dir.path().to_path_buf()).await.unwrap();
        storage.delete("does-not-exist").await.unwrap();
    }
}
