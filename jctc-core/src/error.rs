//! Retention Error Types
//!
//! Error taxonomy shared by every component of the retention engine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stage of the archive decode pipeline that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreStage {
    /// Reading ciphertext from the blob store
    Fetch,
    /// Parsing the archive frame (magic, nonce)
    Frame,
    /// Obtaining the archive key from key management
    KeyAccess,
    /// AEAD decryption and tag verification
    Decrypt,
    /// Decompression of the decrypted stream
    Decompress,
    /// Plaintext checksum comparison
    Checksum,
    /// Decoding the canonical bundle
    Deserialize,
}

impl RestoreStage {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Frame => "frame",
            Self::KeyAccess => "key_access",
            Self::Decrypt => "decrypt",
            Self::Decompress => "decompress",
            Self::Checksum => "checksum",
            Self::Deserialize => "deserialize",
        }
    }

    /// Whether a failure at this stage means the stored archive is damaged
    pub fn indicates_corruption(&self) -> bool {
        matches!(
            self,
            Self::Frame | Self::Decrypt | Self::Decompress | Self::Checksum | Self::Deserialize
        )
    }
}

impl std::fmt::Display for RestoreStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error category, used for pass-report aggregation and retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    PolicyConflict,
    LegalHoldConflict,
    IntegrityFailure,
    StorageUnavailable,
    KeyUnavailable,
    NotFound,
    Validation,
    Serialization,
    Encryption,
    PermissionDenied,
    Cancelled,
}

/// Retention engine errors
#[derive(Debug, Error)]
pub enum RetentionError {
    /// Ambiguous or contradictory policies (resolved deterministically, never fatal)
    #[error("Policy conflict: {0}")]
    PolicyConflict(String),

    /// Action blocked by one or more legal holds
    #[error("Legal hold conflict on {entity}: {hold_ids:?}")]
    LegalHoldConflict {
        entity: String,
        hold_ids: Vec<String>,
    },

    /// Checksum or authentication tag mismatch
    #[error("Integrity failure at {stage} stage: {detail}")]
    IntegrityFailure { stage: RestoreStage, detail: String },

    /// Blob store or index unavailable (transient)
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Key management unavailable (transient, escalated)
    #[error("Key unavailable: {0}")]
    KeyUnavailable(String),

    /// Requested record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed request or invalid definition
    #[error("Validation error: {0}")]
    Validation(String),

    /// Encoding failure
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Compression or encryption failure on the write path
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Caller lacks permission
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Operation cancelled before commit
    #[error("Operation cancelled: {0}")]
    Cancelled(String),
}

/// Retention result type
pub type RetentionResult<T> = Result<T, RetentionError>;

impl RetentionError {
    /// Create an integrity failure for a decode stage
    pub fn integrity(stage: RestoreStage, detail: impl Into<String>) -> Self {
        RetentionError::IntegrityFailure {
            stage,
            detail: detail.into(),
        }
    }

    /// Get the error category
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PolicyConflict(_) => ErrorKind::PolicyConflict,
            Self::LegalHoldConflict { .. } => ErrorKind::LegalHoldConflict,
            Self::IntegrityFailure { .. } => ErrorKind::IntegrityFailure,
            Self::StorageUnavailable(_) => ErrorKind::StorageUnavailable,
            Self::KeyUnavailable(_) => ErrorKind::KeyUnavailable,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Serialization(_) => ErrorKind::Serialization,
            Self::Encryption(_) => ErrorKind::Encryption,
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::Cancelled(_) => ErrorKind::Cancelled,
        }
    }

    /// Whether the operation may succeed if retried later
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::StorageUnavailable(_) | Self::KeyUnavailable(_)
        )
    }
}

impl From<serde_json::Error> for RetentionError {
    fn from(err: serde_json::Error) -> Self {
        RetentionError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(RetentionError::StorageUnavailable("down".into()).is_transient());
        assert!(RetentionError::KeyUnavailable("kms".into()).is_transient());
        assert!(!RetentionError::integrity(RestoreStage::Decrypt, "tag").is_transient());
        assert!(!RetentionError::NotFound("x".into()).is_transient());
    }

    #[test]
    fn test_integrity_message_names_stage() {
        let err = RetentionError::integrity(RestoreStage::Checksum, "mismatch");
        assert_eq!(err.kind(), ErrorKind::IntegrityFailure);
        assert!(err.to_string().contains("checksum"));
    }

    #[test]
    fn test_corruption_stages() {
        assert!(RestoreStage::Decrypt.indicates_corruption());
        assert!(RestoreStage::Checksum.indicates_corruption());
        assert!(!RestoreStage::KeyAccess.indicates_corruption());
        assert!(!RestoreStage::Fetch.indicates_corruption());
    }
}
