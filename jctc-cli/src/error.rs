//! CLI Error Types

use jctc_core::RetentionError;
use jctc_storage::RestoreDenial;
use thiserror::Error;

/// CLI-specific errors
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration error
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    /// Invalid argument
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Fixture file could not be used
    #[error("Fixture error: {message}")]
    FixtureError { message: String },

    /// File I/O error
    #[error("File I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Engine error
    #[error("Retention error: {0}")]
    RetentionError(#[from] RetentionError),

    /// Restore refused
    #[error("Restore denied: {0}")]
    RestoreDenied(#[from] RestoreDenial),

    /// Archive not found
    #[error("Archive not found: {id}")]
    NotFound { id: String },

    /// Archive failed verification
    #[error("Integrity check failed for archive {id}")]
    IntegrityFailed { id: String },

    /// The pass finished with failures
    #[error("Retention pass finished with {failed} failed action(s)")]
    PassFailed { failed: usize },
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;

impl CliError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        CliError::ConfigError {
            message: message.into(),
        }
    }

    /// Create an invalid argument error
    pub fn invalid_arg(message: impl Into<String>) -> Self {
        CliError::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn fixture(message: impl Into<String>) -> Self {
        CliError::FixtureError {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(id: impl Into<String>) -> Self {
        CliError::NotFound { id: id.into() }
    }

    /// Get exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::ConfigError { .. } => 1,
            CliError::InvalidArgument { .. } => 2,
            CliError::FixtureError { .. } => 3,
            CliError::IoError(_) => 5,
            CliError::JsonError(_) => 6,
            CliError::RetentionError(e) => match e {
                RetentionError::StorageUnavailable(_) | RetentionError::KeyUnavailable(_) => 11,
                RetentionError::IntegrityFailure { .. } => 12,
                _ => 10,
            },
            CliError::RestoreDenied(denial) => match denial {
                RestoreDenial::PermissionDenied { .. } | RestoreDenial::LegalHold { .. } => 13,
                RestoreDenial::NotFound { .. } => 21,
                RestoreDenial::Corrupt { .. } => 12,
                RestoreDenial::InvalidDuration { .. } => 2,
                RestoreDenial::Unavailable { .. } => 11,
            },
            CliError::NotFound { .. } => 21,
            CliError::IntegrityFailed { .. } => 12,
            CliError::PassFailed { .. } => 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jctc_core::RestoreStage;

    #[test]
    fn test_config_error() {
        let err = CliError::config("JCTC_BATCH_SIZE: must be positive");
        assert_eq!(err.exit_code(), 1);
        assert!(err.to_string().contains("JCTC_BATCH_SIZE"));
    }

    #[test]
    fn test_engine_error_codes() {
        let err: CliError = RetentionError::KeyUnavailable("kms offline".into()).into();
        assert_eq!(err.exit_code(), 11);

        let err: CliError = RetentionError::integrity(RestoreStage::Decrypt, "tag mismatch").into();
        assert_eq!(err.exit_code(), 12);
    }

    #[test]
    fn test_restore_denial_codes() {
        let err: CliError = RestoreDenial::LegalHold {
            hold_ids: vec!["hold-1".into()],
        }
        .into();
        assert_eq!(err.exit_code(), 13);
        assert!(err.to_string().contains("hold-1"));

        let err: CliError = RestoreDenial::InvalidDuration { requested: 100, max: 72 }.into();
        assert_eq!(err.exit_code(), 2);
    }
}
