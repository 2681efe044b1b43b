//! JCTC Storage Error Types

use jctc_core::RetentionError;
use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Blob or index entry not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Write operation failed
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// Read operation failed
    #[error("Read failed: {0}")]
    ReadFailed(String),

    /// Delete operation failed
    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    /// Index journal failure
    #[error("Index error: {0}")]
    Index(String),

    /// Journal entry appended but not confirmed durable
    #[error("Index journal not synced: {0}")]
    JournalUnsynced(String),

    /// Backend unavailable
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Malformed search cursor
    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),
}

/// Storage result type
pub type StorageResult<T> = Result<T, StorageError>;

impl From<StorageError> for RetentionError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(msg) => RetentionError::NotFound(msg),
            StorageError::InvalidCursor(msg) => RetentionError::Validation(format!("Invalid cursor: {}", msg)),
            StorageError::Configuration(msg) => RetentionError::Validation(msg),
            other => RetentionError::StorageUnavailable(other.to_string()),
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound(err.to_string()),
            _ => StorageError::Unavailable(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jctc_core::ErrorKind;

    #[test]
    fn test_conversion_to_retention_error() {
        let err: RetentionError = StorageError::WriteFailed("disk full".into()).into();
        assert_eq!(err.kind(), ErrorKind::StorageUnavailable);
        assert!(err.is_transient());

        let err: RetentionError = StorageError::NotFound("arc-1".into()).into();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err: RetentionError = StorageError::InvalidCursor("zz".into()).into();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
