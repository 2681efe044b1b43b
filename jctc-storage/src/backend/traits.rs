//! Blob Store Traits
//!
//! Archives are opaque ciphertext blobs addressed by a relative path.
//! Backends are replaceable: local filesystem, in-memory, or an object store
//! supplied by the deployment.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::error::StorageResult;

/// Blob store
///
/// Writes are write-once: putting different bytes at an existing path fails.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Durably store a blob
    async fn put(&self, path: &str, data: &[u8]) -> StorageResult<BlobInfo>;

    /// Read a blob
    async fn get(&self, path: &str) -> StorageResult<Vec<u8>>;

    /// Check if a blob exists
    async fn exists(&self, path: &str) -> StorageResult<bool>;

    /// Securely remove a blob; missing blobs are not an error
    async fn delete(&self, path: &str) -> StorageResult<()>;

    /// Get backend type identifier
    fn backend_type(&self) -> BackendType;

    /// Health check
    async fn health_check(&self) -> StorageResult<HealthStatus>;
}

/// Metadata of a stored blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobInfo {
    pub path: String,
    pub size_bytes: u64,
    /// SHA-256 of the stored bytes (hex)
    pub checksum: String,
    pub stored_at: DateTime<Utc>,
}

impl BlobInfo {
    pub fn for_data(path: &str, data: &[u8]) -> Self {
        Self {
            path: path.to_string(),
            size_bytes: data.len() as u64,
            checksum: sha256_hex(data),
            stored_at: Utc::now(),
        }
    }
}

/// SHA-256 hex digest of stored bytes
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Backend type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendType {
    /// Local filesystem
    Local,
    /// In-memory (testing only)
    Memory,
    /// Deployment-supplied backend
    Custom,
}

impl BackendType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Memory => "memory",
            Self::Custom => "custom",
        }
    }
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Backend health status
#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub healthy: bool,
    pub message: String,
    pub checked_at: DateTime<Utc>,
}

impl HealthStatus {
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            message: "OK".to_string(),
            checked_at: Utc::now(),
        }
    }

    pub fn unhealthy(message: &str) -> Self {
        Self {
            healthy: false,
            message: message.to_string(),
            checked_at: Utc::now(),
        }
    }
}
