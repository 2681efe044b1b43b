//! Local Filesystem Blob Store
//!
//! Suitable for development, testing, and single-node deployments.
//! Writes go to a temporary sibling file which is fsync'd and renamed into
//! place, so a crash never leaves a partially written archive.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::traits::{BackendType, BlobInfo, BlobStore, HealthStatus};
use crate::error::{StorageError, StorageResult};

/// Local filesystem blob store
pub struct LocalBlobStore {
    base_path: PathBuf,
}

impl LocalBlobStore {
    /// Create a store rooted at `base_path`
    pub async fn new(base_path: impl AsRef<Path>) -> StorageResult<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path).await.map_err(|e| {
            StorageError::Configuration(format!("Failed to create directory {:?}: {}", base_path, e))
        })?;

        info!("Initialized local blob store at {:?}", base_path);
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Resolve a relative blob path, refusing anything that escapes the root
    fn resolve(&self, path: &str) -> StorageResult<PathBuf> {
        let relative = Path::new(path);
        let safe = !path.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(StorageError::Configuration(format!("Invalid blob path: {}", path)));
        }
        Ok(self.base_path.join(relative))
    }

    async fn write_atomic(&self, target: &Path, data: &[u8]) -> StorageResult<()> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                StorageError::WriteFailed(format!("Failed to create directory: {}", e))
            })?;
        }

        let tmp = target.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        let result = async {
            let mut file = fs::File::create(&tmp).await?;
            file.write_all(data).await?;
            file.sync_all().await?;
            fs::rename(&tmp, target).await?;
            if let Some(parent) = target.parent() {
                // Persist the rename itself
                if let Ok(dir) = fs::File::open(parent).await {
                    let _ = dir.sync_all().await;
                }
            }
            Ok::<(), std::io::Error>(())
        }
        .await;

        if let Err(e) = result {
            let _ = fs::remove_file(&tmp).await;
            return Err(StorageError::WriteFailed(format!("Failed to write {:?}: {}", target, e)));
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, path: &str, data: &[u8]) -> StorageResult<BlobInfo> {
        let target = self.resolve(path)?;

        // Write-once: identical content is an idempotent success
        if fs::try_exists(&target).await.unwrap_or(false) {
            let existing = fs::read(&target).await.map_err(|e| {
                StorageError::ReadFailed(format!("Failed to read existing file: {}", e))
            })?;
            if existing == data {
                debug!("Blob {} already exists with matching content", path);
                return Ok(BlobInfo::for_data(path, data));
            }
            return Err(StorageError::WriteFailed(format!(
                "Blob {} already exists with different content",
                path
            )));
        }

        self.write_atomic(&target, data).await?;

        debug!("Stored blob {} ({} bytes)", path, data.len());
        Ok(BlobInfo::for_data(path, data))
    }

    async fn get(&self, path: &str) -> StorageResult<Vec<u8>> {
        let target = self.resolve(path)?;
        match fs::read(&target).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(path.to_string()))
            }
            Err(e) => Err(StorageError::ReadFailed(format!("Failed to read {}: {}", path, e))),
        }
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        let target = self.resolve(path)?;
        Ok(fs::try_exists(&target).await?)
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        let target = self.resolve(path)?;
        let len = match fs::metadata(&target).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(StorageError::DeleteFailed(e.to_string())),
        };

        // Overwrite before unlinking; the key is destroyed separately
        let overwrite = async {
            let mut file = fs::OpenOptions::new().write(true).open(&target).await?;
            file.write_all(&vec![0u8; len as usize]).await?;
            file.sync_all().await
        }
        .await;
        if let Err(e) = overwrite {
            warn!("Failed to overwrite {} before removal: {}", path, e);
        }

        fs::remove_file(&target)
            .await
            .map_err(|e| StorageError::DeleteFailed(format!("Failed to remove {}: {}", path, e)))?;

        info!("Deleted blob {}", path);
        Ok(())
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Local
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let marker = self.base_path.join(".health");
        match fs::write(&marker, b"ok").await {
            Ok(()) => {
                let _ = fs::remove_file(&marker).await;
                Ok(HealthStatus::healthy())
            }
            Err(e) => Ok(HealthStatus::unhealthy(&format!("Base path not writable: {}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::traits::sha256_hex;

    #[tokio::test]
    async fn test_put_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path()).await.unwrap();

        let info = store.put("2024/05/case/c-1/a.jca", b"sealed").await.unwrap();
        assert_eq!(info.size_bytes, 6);
        assert_eq!(info.checksum, sha256_hex(b"sealed"));
        assert_eq!(store.get("2024/05/case/c-1/a.jca").await.unwrap(), b"sealed");

        store.delete("2024/05/case/c-1/a.jca").await.unwrap();
        assert!(!store.exists("2024/05/case/c-1/a.jca").await.unwrap());
        assert!(matches!(
            store.get("2024/05/case/c-1/a.jca").await,
            Err(StorageError::NotFound(_))
        ));
        // deleting twice is fine
        store.delete("2024/05/case/c-1/a.jca").await.unwrap();
    }

    #[tokio::test]
    async fn test_write_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path()).await.unwrap();

        store.put("a.jca", b"one").await.unwrap();
        store.put("a.jca", b"one").await.unwrap();
        assert!(store.put("a.jca", b"two").await.is_err());
    }

    #[tokio::test]
    async fn test_rejects_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path()).await.unwrap();

        assert!(store.put("../outside.jca", b"x").await.is_err());
        assert!(store.put("/etc/passwd", b"x").await.is_err());
        assert!(store.get("").await.is_err());
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path()).await.unwrap();
        store.put("x/y.jca", b"data").await.unwrap();

        let mut entries = fs::read_dir(dir.path().join("x")).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        assert_eq!(names, vec!["y.jca".to_string()]);
    }

    #[tokio::test]
    async fn test_health_check() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path()).await.unwrap();
        assert!(store.health_check().await.unwrap().healthy);
    }
}
