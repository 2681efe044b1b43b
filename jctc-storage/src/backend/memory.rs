//! In-Memory Blob Store
//!
//! Testing only. Supports fault injection so callers can exercise outage and
//! corruption paths.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;

use super::traits::{BackendType, BlobInfo, BlobStore, HealthStatus};
use crate::error::{StorageError, StorageResult};

/// In-memory blob store
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<BTreeMap<String, Vec<u8>>>,
    offline: AtomicBool,
    /// Number of upcoming writes that fail
    failing_writes: AtomicUsize,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail as unavailable
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Fail the next `count` writes
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Flip one byte of a stored blob
    pub async fn corrupt(&self, path: &str, offset: usize) -> bool {
        let mut blobs = self.blobs.write().await;
        match blobs.get_mut(path) {
            Some(data) if offset < data.len() => {
                data[offset] ^= 0xff;
                true
            }
            _ => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }

    pub async fn paths(&self) -> Vec<String> {
        self.blobs.read().await.keys().cloned().collect()
    }

    fn check_online(&self) -> StorageResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StorageError::Unavailable("memory blob store offline".into()))
        } else {
            Ok(())
        }
    }

    fn take_write_failure(&self) -> bool {
        self.failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, path: &str, data: &[u8]) -> StorageResult<BlobInfo> {
        self.check_online()?;
        if self.take_write_failure() {
            return Err(StorageError::Unavailable(format!("injected write failure for {}", path)));
        }

        let mut blobs = self.blobs.write().await;
        if let Some(existing) = blobs.get(path) {
            if existing.as_slice() != data {
                return Err(StorageError::WriteFailed(format!(
                    "Blob {} already exists with different content",
                    path
                )));
            }
        } else {
            blobs.insert(path.to_string(), data.to_vec());
        }
        Ok(BlobInfo::for_data(path, data))
    }

    async fn get(&self, path: &str) -> StorageResult<Vec<u8>> {
        self.check_online()?;
        self.blobs
            .read()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        self.check_online()?;
        Ok(self.blobs.read().await.contains_key(path))
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        self.check_online()?;
        if let Some(mut data) = self.blobs.write().await.remove(path) {
            data.iter_mut().for_each(|b| *b = 0);
        }
        Ok(())
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Memory
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        if self.offline.load(Ordering::SeqCst) {
            Ok(HealthStatus::unhealthy("offline"))
        } else {
            Ok(HealthStatus::healthy())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_injected_write_failures() {
        let store = MemoryBlobStore::new();
        store.fail_next_writes(1);
        assert!(matches!(
            store.put("a", b"x").await,
            Err(StorageError::Unavailable(_))
        ));
        store.put("a", b"x").await.unwrap();
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_corrupt_flips_byte() {
        let store = MemoryBlobStore::new();
        store.put("a", b"abc").await.unwrap();
        assert!(store.corrupt("a", 1).await);
        assert_ne!(store.get("a").await.unwrap(), b"abc");
        assert!(!store.corrupt("missing", 0).await);
    }

    #[tokio::test]
    async fn test_offline() {
        let store = MemoryBlobStore::new();
        store.set_offline(true);
        assert!(store.get("a").await.is_err());
        assert!(!store.health_check().await.unwrap().healthy);
    }
}
