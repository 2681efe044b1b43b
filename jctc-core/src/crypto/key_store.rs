//! Key Management Abstraction
//!
//! Every archive is sealed under its own data key. The key management
//! collaborator creates those keys, leases them out for a bounded time and
//! destroys them when an archive is securely deleted; once a key is gone the
//! ciphertext is unrecoverable.
//!
//! # Security Design
//!
//! - Raw key material never leaves a [`KeyHandle`], which zeroizes on drop
//! - Archive records only carry the opaque [`KeyRef`]
//! - `LocalKeyStore` is for development and tests, NOT FOR PRODUCTION

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use zeroize::{Zeroize, Zeroizing};

use crate::error::RetentionError;

/// AES-256 key size (256 bits)
pub const KEY_SIZE: usize = 32;

/// Default lease length for key handles
pub const DEFAULT_LEASE_SECS: i64 = 300;

/// Opaque reference to a key held by key management
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyRef(String);

impl KeyRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for KeyRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Key material wrapper that zeroizes on drop
#[derive(Clone)]
pub struct KeyMaterial(Vec<u8>);

impl KeyMaterial {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Get key bytes (use with caution)
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Drop for KeyMaterial {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyMaterial([REDACTED {} bytes])", self.0.len())
    }
}

/// Scoped lease on a key
#[derive(Debug)]
pub struct KeyHandle {
    pub key_ref: KeyRef,
    material: KeyMaterial,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl KeyHandle {
    pub fn new(key_ref: KeyRef, material: KeyMaterial, issued_at: DateTime<Utc>, lease: Duration) -> Self {
        Self {
            key_ref,
            material,
            issued_at,
            expires_at: issued_at + lease,
        }
    }

    pub fn material(&self) -> &KeyMaterial {
        &self.material
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Error type for key management operations
#[derive(Debug, Clone)]
pub enum KeyStoreError {
    /// Key not found (never created, or destroyed)
    NotFound(String),
    /// Access denied
    AccessDenied(String),
    /// Key service unreachable
    Unavailable(String),
    /// Internal error
    InternalError(String),
}

impl std::fmt::Display for KeyStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(msg) => write!(f, "Key not found: {}", msg),
            Self::AccessDenied(msg) => write!(f, "Access denied: {}", msg),
            Self::Unavailable(msg) => write!(f, "Key service unavailable: {}", msg),
            Self::InternalError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for KeyStoreError {}

impl From<KeyStoreError> for RetentionError {
    fn from(err: KeyStoreError) -> Self {
        match err {
            KeyStoreError::NotFound(msg) => RetentionError::NotFound(format!("key {}", msg)),
            KeyStoreError::AccessDenied(msg) => RetentionError::PermissionDenied(msg),
            KeyStoreError::Unavailable(msg) => RetentionError::KeyUnavailable(msg),
            KeyStoreError::InternalError(msg) => RetentionError::Encryption(msg),
        }
    }
}

/// Key management collaborator
///
/// Implementations should:
/// - Never log or expose raw key material
/// - Make `destroy_key` idempotent
#[async_trait]
pub trait KeyManagement: Send + Sync {
    /// Create a fresh data key
    async fn generate_key(&self) -> Result<KeyRef, KeyStoreError>;

    /// Lease the key for use
    async fn use_key(&self, key_ref: &KeyRef) -> Result<KeyHandle, KeyStoreError>;

    /// Destroy the key permanently
    async fn destroy_key(&self, key_ref: &KeyRef) -> Result<(), KeyStoreError>;
}

/// On-disk layout of the development key file
#[derive(Default, Serialize, Deserialize)]
struct KeyFile {
    keys: BTreeMap<String, String>,
}

impl Drop for KeyFile {
    fn drop(&mut self) {
        for value in self.keys.values_mut() {
            value.zeroize();
        }
    }
}

/// Local key store for development/testing
///
/// # WARNING
/// Keys are held in process memory and, when opened on a path, written to a
/// plain JSON file. It is NOT secure for production use.
pub struct LocalKeyStore {
    keys: RwLock<HashMap<String, KeyMaterial>>,
    path: Option<PathBuf>,
    /// Serializes snapshot + write + rename so a newer snapshot is never
    /// overwritten by an older one
    persist_lock: Mutex<()>,
    lease: Duration,
    available: AtomicBool,
}

impl LocalKeyStore {
    /// Create an in-memory key store
    pub fn new() -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
            path: None,
            persist_lock: Mutex::new(()),
            lease: Duration::seconds(DEFAULT_LEASE_SECS),
            available: AtomicBool::new(true),
        }
    }

    /// Open a file-backed key store, loading existing keys
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, KeyStoreError> {
        let path = path.as_ref().to_path_buf();
        let mut keys = HashMap::new();

        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let bytes = Zeroizing::new(bytes);
                let file: KeyFile = serde_json::from_slice(&bytes)
                    .map_err(|e| KeyStoreError::InternalError(format!("Corrupt key file: {}", e)))?;
                for (key_ref, encoded) in file.keys.iter() {
                    let material = hex::decode(encoded).map_err(|e| {
                        KeyStoreError::InternalError(format!("Corrupt key {}: {}", key_ref, e))
                    })?;
                    keys.insert(key_ref.clone(), KeyMaterial::new(material));
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(KeyStoreError::Unavailable(e.to_string())),
        }

        info!(path = %path.display(), keys = keys.len(), "Opened local key store");

        Ok(Self {
            keys: RwLock::new(keys),
            path: Some(path),
            persist_lock: Mutex::new(()),
            lease: Duration::seconds(DEFAULT_LEASE_SECS),
            available: AtomicBool::new(true),
        })
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Simulate an outage of the key service
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn contains(&self, key_ref: &KeyRef) -> bool {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key_ref.as_str())
    }

    pub fn key_count(&self) -> usize {
        self.keys.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn check_available(&self) -> Result<(), KeyStoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(KeyStoreError::Unavailable("local key store offline".into()))
        }
    }

    fn encode_keys(&self) -> Result<Zeroizing<Vec<u8>>, KeyStoreError> {
        let keys = self.keys.read().unwrap_or_else(PoisonError::into_inner);
        let file = KeyFile {
            keys: keys
                .iter()
                .map(|(k, v)| (k.clone(), hex::encode(v.as_bytes())))
                .collect(),
        };
        serde_json::to_vec_pretty(&file)
            .map(Zeroizing::new)
            .map_err(|e| KeyStoreError::InternalError(e.to_string()))
    }

    async fn persist(&self) -> Result<(), KeyStoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let _guard = self.persist_lock.lock().await;
        let bytes = self.encode_keys()?;

        let tmp = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        let result = Self::write_synced(&tmp, bytes.as_slice()).await;
        let result = match result {
            Ok(()) => tokio::fs::rename(&tmp, path).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(KeyStoreError::Unavailable(e.to_string()));
        }
        Ok(())
    }

    async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        let mut file = tokio::fs::File::create(path).await?;
        file.write_all(bytes).await?;
        file.sync_all().await
    }
}

impl Default for LocalKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyManagement for LocalKeyStore {
    async fn generate_key(&self) -> Result<KeyRef, KeyStoreError> {
        self.check_available()?;

        let mut bytes = vec![0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        let key_ref = KeyRef::new(format!("key:{}", uuid::Uuid::new_v4()));

        self.keys
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key_ref.as_str().to_string(), KeyMaterial::new(bytes));
        if let Err(e) = self.persist().await {
            self.keys
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(key_ref.as_str());
            warn!(key_ref = %key_ref, error = %e, "Key not persisted, discarded");
            return Err(e);
        }

        debug!(key_ref = %key_ref, "Generated archive key");
        Ok(key_ref)
    }

    async fn use_key(&self, key_ref: &KeyRef) -> Result<KeyHandle, KeyStoreError> {
        self.check_available()?;

        let material = self
            .keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key_ref.as_str())
            .cloned()
            .ok_or_else(|| KeyStoreError::NotFound(key_ref.to_string()))?;

        Ok(KeyHandle::new(key_ref.clone(), material, Utc::now(), self.lease))
    }

    async fn destroy_key(&self, key_ref: &KeyRef) -> Result<(), KeyStoreError> {
        self.check_available()?;

        let removed = self
            .keys
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key_ref.as_str());

        if let Some(material) = removed {
            if let Err(e) = self.persist().await {
                // still on disk, keep it usable until the destroy is retried
                self.keys
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(key_ref.as_str().to_string(), material);
                return Err(e);
            }
            info!(key_ref = %key_ref, "Destroyed archive key");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_generate_use_destroy() {
        let store = LocalKeyStore::new();
        let key_ref = store.generate_key().await.unwrap();

        let handle = store.use_key(&key_ref).await.unwrap();
        assert_eq!(handle.material().len(), KEY_SIZE);
        assert!(!handle.is_expired(handle.issued_at));

        store.destroy_key(&key_ref).await.unwrap();
        assert!(matches!(
            store.use_key(&key_ref).await,
            Err(KeyStoreError::NotFound(_))
        ));
        // idempotent
        store.destroy_key(&key_ref).await.unwrap();
    }

    #[tokio::test]
    async fn test_unavailable_is_transient() {
        let store = LocalKeyStore::new();
        store.set_available(false);
        let err: RetentionError = store.generate_key().await.unwrap_err().into();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_file_backed_keys_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.json");

        let key_ref = {
            let store = LocalKeyStore::open(&path).await.unwrap();
            store.generate_key().await.unwrap()
        };

        let reopened = LocalKeyStore::open(&path).await.unwrap();
        assert!(reopened.contains(&key_ref));
        assert_eq!(reopened.key_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_generate_persists_every_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.json");
        let store = std::sync::Arc::new(LocalKeyStore::open(&path).await.unwrap());

        let tasks: Vec<_> = (0..64)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.generate_key().await })
            })
            .collect();
        let mut refs = Vec::new();
        for task in tasks {
            refs.push(task.await.unwrap().unwrap());
        }

        let reopened = LocalKeyStore::open(&path).await.unwrap();
        assert_eq!(reopened.key_count(), 64);
        assert!(refs.iter().all(|r| reopened.contains(r)));

        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[tokio::test]
    async fn test_failed_persist_discards_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("keys.json");
        let store = LocalKeyStore::open(&path).await.unwrap();

        let err = store.generate_key().await.unwrap_err();
        assert!(matches!(err, KeyStoreError::Unavailable(_)));
        assert_eq!(store.key_count(), 0);
    }

    #[test]
    fn test_key_material_debug_redacted() {
        let material = KeyMaterial::new(vec![7u8; KEY_SIZE]);
        assert_eq!(format!("{:?}", material), "KeyMaterial([REDACTED 32 bytes])");
    }
}
