//! Archived Record Types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entity::{EntityRef, EntityType, HoldSubject};
use crate::crypto::key_store::KeyRef;

/// Archive lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArchiveStatus {
    /// Written, not yet verified
    Active,
    /// Ciphertext checksum verified at rest
    Verified,
    /// Integrity check or restoration detected damage
    Corrupt,
    /// Plaintext currently staged for a restoration request
    RestoredTemp,
    /// Securely deleted; index entry kept as a tombstone
    Purged,
}

impl ArchiveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Verified => "VERIFIED",
            Self::Corrupt => "CORRUPT",
            Self::RestoredTemp => "RESTORED_TEMP",
            Self::Purged => "PURGED",
        }
    }
}

impl std::fmt::Display for ArchiveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Output of the archive codec, not yet persisted
#[derive(Clone)]
pub struct ArchivedRecordDraft {
    pub entity_ref: EntityRef,
    pub entity_version: u64,
    pub case_id: Option<String>,
    /// Framed AEAD ciphertext
    pub ciphertext: Vec<u8>,
    /// SHA-256 of the canonical plaintext (hex)
    pub sha256_checksum: String,
    pub encryption_key_reference: KeyRef,
    pub compressed_size: u64,
    pub original_size: u64,
    pub dependent_count: usize,
    pub sealed_at: DateTime<Utc>,
}

impl std::fmt::Debug for ArchivedRecordDraft {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchivedRecordDraft")
            .field("entity_ref", &self.entity_ref)
            .field("entity_version", &self.entity_version)
            .field("ciphertext_len", &self.ciphertext.len())
            .field("sha256_checksum", &self.sha256_checksum)
            .field("encryption_key_reference", &self.encryption_key_reference)
            .field("dependent_count", &self.dependent_count)
            .finish()
    }
}

/// Index entry for an archive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedRecord {
    pub id: String,
    pub source_entity_type: EntityType,
    pub source_entity_id: String,
    pub entity_version: u64,
    #[serde(default)]
    pub case_id: Option<String>,
    pub archived_at: DateTime<Utc>,
    pub storage_path: String,
    /// SHA-256 of the plaintext before compression/encryption (hex)
    pub sha256_checksum: String,
    /// SHA-256 of the ciphertext at rest (hex)
    pub storage_checksum: String,
    /// Opaque key-management handle, never key material
    pub encryption_key_reference: String,
    pub compressed_size: u64,
    pub original_size: u64,
    #[serde(default)]
    pub dependent_count: usize,
    pub status: ArchiveStatus,
    #[serde(default)]
    pub last_verified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub purged_at: Option<DateTime<Utc>>,
}

impl ArchivedRecord {
    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(self.source_entity_type, self.source_entity_id.clone())
    }

    pub fn key_ref(&self) -> KeyRef {
        KeyRef::new(self.encryption_key_reference.clone())
    }

    /// Owning case, for legal-hold lookups
    pub fn owning_case(&self) -> Option<&str> {
        match self.source_entity_type {
            EntityType::Case => Some(self.source_entity_id.as_str()),
            _ => self.case_id.as_deref(),
        }
    }

    pub fn hold_subject<'a>(&'a self, entity_ref: &'a EntityRef) -> HoldSubject<'a> {
        HoldSubject {
            entity_ref,
            case_id: self.owning_case(),
        }
    }

    /// Whether the archive can still be decoded
    pub fn is_restorable(&self) -> bool {
        !matches!(self.status, ArchiveStatus::Corrupt | ArchiveStatus::Purged)
    }
}
