//! Archive Codec
//!
//! Turns an [`ArchiveBundle`] into sealed archive bytes and back.
//!
//! # Format
//!
//! ```text
//! "JCA1" | nonce (12 bytes) | AES-256-GCM ciphertext + tag
//! ```
//!
//! The plaintext is the canonical JSON encoding of the bundle, compressed
//! with zstd before encryption. The associated data binds the entity
//! reference, entity version and plaintext checksum, so a ciphertext cannot
//! be replayed under another record.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use chrono::Utc;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, warn};

use super::key_store::{KeyHandle, KeyManagement, KeyRef, KeyStoreError};
use crate::error::{RestoreStage, RetentionError, RetentionResult};
use crate::types::{ArchiveBundle, ArchivedRecord, ArchivedRecordDraft, EntityRef};

/// Frame magic and format version
pub const FRAME_MAGIC: &[u8; 4] = b"JCA1";

/// AES-GCM nonce size (96 bits)
pub const NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag size
pub const TAG_SIZE: usize = 16;

/// Default zstd compression level
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

const HEADER_SIZE: usize = FRAME_MAGIC.len() + NONCE_SIZE;

/// Archive codec
#[derive(Clone)]
pub struct ArchiveCodec {
    kms: Arc<dyn KeyManagement>,
    compression_level: i32,
}

impl ArchiveCodec {
    pub fn new(kms: Arc<dyn KeyManagement>) -> Self {
        Self {
            kms,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }

    pub fn with_compression_level(mut self, level: i32) -> Self {
        self.compression_level = level;
        self
    }

    pub fn key_management(&self) -> &Arc<dyn KeyManagement> {
        &self.kms
    }

    /// Canonical plaintext encoding of a bundle
    pub fn canonicalize(bundle: &ArchiveBundle) -> RetentionResult<Vec<u8>> {
        Ok(serde_json::to_vec(bundle)?)
    }

    /// SHA-256 hex digest
    pub fn checksum(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    fn associated_data(entity_ref: &EntityRef, version: u64, checksum: &str) -> Vec<u8> {
        format!("jctc-archive:v1|{}|{}|{}", entity_ref, version, checksum).into_bytes()
    }

    /// Seal a bundle under a freshly generated key
    pub async fn archive(&self, bundle: &ArchiveBundle) -> RetentionResult<ArchivedRecordDraft> {
        // JSON has no NaN or infinity; they would come back as null
        for snapshot in std::iter::once(&bundle.entity).chain(&bundle.dependents) {
            if let Some(field) = snapshot.non_finite_field() {
                return Err(RetentionError::Validation(format!(
                    "{} field '{}' is not a finite number",
                    snapshot.entity_ref, field
                )));
            }
        }

        let entity_ref = bundle.entity_ref().clone();
        let entity_version = bundle.entity.version;
        let plaintext = Self::canonicalize(bundle)?;
        let sha256_checksum = Self::checksum(&plaintext);
        let original_size = plaintext.len() as u64;
        let aad = Self::associated_data(&entity_ref, entity_version, &sha256_checksum);

        let key_ref = self.kms.generate_key().await?;
        let handle = match self.lease(&key_ref).await {
            Ok(handle) => handle,
            Err(e) => {
                self.discard_key(&key_ref).await;
                return Err(e.into());
            }
        };

        let level = self.compression_level;
        let sealed = tokio::task::spawn_blocking(move || seal(&handle, &plaintext, &aad, level))
            .await
            .map_err(|e| RetentionError::Encryption(format!("Seal task failed: {}", e)))
            .and_then(|r| r);

        let (ciphertext, compressed_size) = match sealed {
            Ok(sealed) => sealed,
            Err(e) => {
                self.discard_key(&key_ref).await;
                return Err(e);
            }
        };

        debug!(
            entity = %entity_ref,
            version = entity_version,
            original_size,
            compressed_size,
            "Sealed archive bundle"
        );

        Ok(ArchivedRecordDraft {
            entity_ref,
            entity_version,
            case_id: bundle.entity.case_id.clone(),
            ciphertext,
            sha256_checksum,
            encryption_key_reference: key_ref,
            compressed_size,
            original_size,
            dependent_count: bundle.dependents.len(),
            sealed_at: Utc::now(),
        })
    }

    /// Open a sealed archive and verify it against its record
    pub async fn restore(&self, record: &ArchivedRecord, framed: Vec<u8>) -> RetentionResult<ArchiveBundle> {
        if framed.len() < HEADER_SIZE + TAG_SIZE || &framed[..FRAME_MAGIC.len()] != FRAME_MAGIC {
            return Err(RetentionError::integrity(
                RestoreStage::Frame,
                format!("Not a JCA1 archive ({} bytes)", framed.len()),
            ));
        }

        let handle = self.lease(&record.key_ref()).await.map_err(|e| match e {
            KeyStoreError::NotFound(msg) => {
                RetentionError::integrity(RestoreStage::KeyAccess, format!("Key destroyed: {}", msg))
            }
            other => other.into(),
        })?;

        let entity_ref = record.entity_ref();
        let aad = Self::associated_data(&entity_ref, record.entity_version, &record.sha256_checksum);
        let expected_checksum = record.sha256_checksum.clone();

        let bundle = tokio::task::spawn_blocking(move || {
            open(&handle, &framed, &aad, &expected_checksum)
        })
        .await
        .map_err(|e| RetentionError::Encryption(format!("Open task failed: {}", e)))??;

        if bundle.entity_ref() != &entity_ref || bundle.entity.version != record.entity_version {
            return Err(RetentionError::integrity(
                RestoreStage::Deserialize,
                format!("Archive holds {} instead of {}", bundle.entity_ref(), entity_ref),
            ));
        }

        Ok(bundle)
    }

    /// Best-effort destruction of a key that no archive will reference
    pub async fn discard_key(&self, key_ref: &KeyRef) {
        if let Err(e) = self.kms.destroy_key(key_ref).await {
            warn!(key_ref = %key_ref, error = %e, "Failed to destroy unused archive key");
        }
    }

    async fn lease(&self, key_ref: &KeyRef) -> Result<KeyHandle, KeyStoreError> {
        let handle = self.kms.use_key(key_ref).await?;
        if handle.is_expired(Utc::now()) {
            return Err(KeyStoreError::Unavailable(format!("Lease for {} already expired", key_ref)));
        }
        Ok(handle)
    }
}

fn cipher_for(handle: &KeyHandle) -> Result<Aes256Gcm, String> {
    Aes256Gcm::new_from_slice(handle.material().as_bytes()).map_err(|e| format!("Invalid key: {}", e))
}

fn seal(handle: &KeyHandle, plaintext: &[u8], aad: &[u8], level: i32) -> RetentionResult<(Vec<u8>, u64)> {
    let compressed = zstd::encode_all(plaintext, level)
        .map_err(|e| RetentionError::Encryption(format!("Compression failed: {}", e)))?;

    let cipher = cipher_for(handle).map_err(RetentionError::Encryption)?;
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);

    let sealed = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: &compressed,
                aad,
            },
        )
        .map_err(|_| RetentionError::Encryption("AEAD encryption failed".into()))?;

    let mut framed = Vec::with_capacity(HEADER_SIZE + sealed.len());
    framed.extend_from_slice(FRAME_MAGIC);
    framed.extend_from_slice(&nonce);
    framed.extend_from_slice(&sealed);

    Ok((framed, compressed.len() as u64))
}

fn open(handle: &KeyHandle, framed: &[u8], aad: &[u8], expected_checksum: &str) -> RetentionResult<ArchiveBundle> {
    let nonce = &framed[FRAME_MAGIC.len()..HEADER_SIZE];
    let cipher =
        cipher_for(handle).map_err(|e| RetentionError::integrity(RestoreStage::KeyAccess, e))?;

    // Fails closed on any tag mismatch
    let compressed = cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: &framed[HEADER_SIZE..],
                aad,
            },
        )
        .map_err(|_| RetentionError::integrity(RestoreStage::Decrypt, "Authentication tag mismatch"))?;

    let plaintext = zstd::decode_all(compressed.as_slice())
        .map_err(|e| RetentionError::integrity(RestoreStage::Decompress, e.to_string()))?;

    let actual = ArchiveCodec::checksum(&plaintext);
    if actual != expected_checksum {
        return Err(RetentionError::integrity(
            RestoreStage::Checksum,
            format!("expected {}, got {}", expected_checksum, actual),
        ));
    }

    serde_json::from_slice(&plaintext)
        .map_err(|e| RetentionError::integrity(RestoreStage::Deserialize, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::key_store::LocalKeyStore;
    use crate::types::{ArchiveStatus, EntitySnapshot, EntityType, FieldValue};

    fn bundle() -> ArchiveBundle {
        let case = EntitySnapshot::new(EntityType::Case, "case-42", Utc::now())
            .with_version(3)
            .with_field("title", "State v. Mallory")
            .with_field("tags", vec!["fraud", "phishing"]);
        let evidence = EntitySnapshot::new(EntityType::Evidence, "ev-7", Utc::now())
            .with_case("case-42")
            .with_field("sha256", "ab12");
        ArchiveBundle::new(case, vec![evidence])
    }

    fn record_for(draft: &ArchivedRecordDraft) -> ArchivedRecord {
        ArchivedRecord {
            id: "arc-1".into(),
            source_entity_type: draft.entity_ref.entity_type,
            source_entity_id: draft.entity_ref.entity_id.clone(),
            entity_version: draft.entity_version,
            case_id: draft.case_id.clone(),
            archived_at: draft.sealed_at,
            storage_path: "test".into(),
            sha256_checksum: draft.sha256_checksum.clone(),
            storage_checksum: ArchiveCodec::checksum(&draft.ciphertext),
            encryption_key_reference: draft.encryption_key_reference.to_string(),
            compressed_size: draft.compressed_size,
            original_size: draft.original_size,
            dependent_count: draft.dependent_count,
            status: ArchiveStatus::Active,
            last_verified_at: None,
            purged_at: None,
        }
    }

    #[tokio::test]
    async fn test_round_trip_fidelity() {
        let codec = ArchiveCodec::new(Arc::new(LocalKeyStore::new()));
        let original = bundle();

        let draft = codec.archive(&original).await.unwrap();
        assert_eq!(&draft.ciphertext[..4], FRAME_MAGIC);
        assert_eq!(draft.dependent_count, 1);

        let restored = codec.restore(&record_for(&draft), draft.ciphertext.clone()).await.unwrap();
        assert_eq!(restored, original);
    }

    #[tokio::test]
    async fn test_flipped_byte_fails_closed() {
        let codec = ArchiveCodec::new(Arc::new(LocalKeyStore::new()));
        let draft = codec.archive(&bundle()).await.unwrap();
        let record = record_for(&draft);

        for position in [0, HEADER_SIZE - 1, HEADER_SIZE + 3, draft.ciphertext.len() - 1] {
            let mut tampered = draft.ciphertext.clone();
            tampered[position] ^= 0x01;
            let err = codec.restore(&record, tampered).await.unwrap_err();
            assert!(
                matches!(err, RetentionError::IntegrityFailure { .. }),
                "byte {position}: {err}"
            );
        }
    }

    #[tokio::test]
    async fn test_ciphertext_bound_to_record() {
        let codec = ArchiveCodec::new(Arc::new(LocalKeyStore::new()));
        let draft = codec.archive(&bundle()).await.unwrap();
        let mut record = record_for(&draft);
        record.entity_version += 1;

        let err = codec.restore(&record, draft.ciphertext.clone()).await.unwrap_err();
        assert!(matches!(
            err,
            RetentionError::IntegrityFailure { stage: RestoreStage::Decrypt, .. }
        ));
    }

    #[tokio::test]
    async fn test_destroyed_key_reports_key_access() {
        let kms = Arc::new(LocalKeyStore::new());
        let codec = ArchiveCodec::new(kms.clone());
        let draft = codec.archive(&bundle()).await.unwrap();
        kms.destroy_key(&draft.encryption_key_reference).await.unwrap();

        let err = codec.restore(&record_for(&draft), draft.ciphertext.clone()).await.unwrap_err();
        assert!(matches!(
            err,
            RetentionError::IntegrityFailure { stage: RestoreStage::KeyAccess, .. }
        ));
    }

    #[tokio::test]
    async fn test_key_outage_is_transient() {
        let kms = Arc::new(LocalKeyStore::new());
        let codec = ArchiveCodec::new(kms.clone());
        kms.set_available(false);

        let err = codec.archive(&bundle()).await.unwrap_err();
        assert!(matches!(err, RetentionError::KeyUnavailable(_)));
        assert_eq!(kms.key_count(), 0);
    }

    #[tokio::test]
    async fn test_non_finite_fields_are_refused() {
        let kms = Arc::new(LocalKeyStore::new());
        let codec = ArchiveCodec::new(kms.clone());

        let mut with_nan = bundle();
        with_nan.dependents[0] = with_nan.dependents[0].clone().with_field("weight_kg", f64::NAN);
        let err = codec.archive(&with_nan).await.unwrap_err();
        assert!(matches!(err, RetentionError::Validation(ref msg) if msg.contains("weight_kg")));

        let with_inf = ArchiveBundle::new(
            EntitySnapshot::new(EntityType::Case, "case-43", Utc::now())
                .with_field("scores", vec![FieldValue::Float(1.5), FieldValue::Float(f64::INFINITY)]),
            vec![],
        );
        assert!(matches!(
            codec.archive(&with_inf).await.unwrap_err(),
            RetentionError::Validation(_)
        ));
        assert_eq!(kms.key_count(), 0);

        // Finite floats are kept exactly
        let finite = ArchiveBundle::new(
            EntitySnapshot::new(EntityType::Case, "case-44", Utc::now()).with_field("ratio", 0.1),
            vec![],
        );
        let draft = codec.archive(&finite).await.unwrap();
        let restored = codec.restore(&record_for(&draft), draft.ciphertext.clone()).await.unwrap();
        assert_eq!(restored.entity.field("ratio"), Some(&FieldValue::Float(0.1)));
    }
}
