//! Storage error types.

use thiserror::Error;

use vgen_models::{AdapterError, AdapterErrorKind, FailureClass};

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to configure storage client: {0}")]
    ConfigError(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Upload failed: {message}")]
    UploadFailed { message: String, class: FailureClass },

    #[error("Presign failed: {0}")]
    PresignFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("AWS SDK error: {0}")]
    AwsSdk(String),
}

impl StorageError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound(key.into())
    }

    pub fn upload_failed(msg: impl Into<String>, class: FailureClass) -> Self {
        Self::UploadFailed {
            message: msg.into(),
            class,
        }
    }

    pub fn failure_class(&self) -> FailureClass {
        match self {
            Self::UploadFailed { class, .. } => *class,
            Self::AwsSdk(_) => FailureClass::Transient,
            Self::Io(e) if e.kind() != std::io::ErrorKind::NotFound => FailureClass::Transient,
            _ => FailureClass::Fatal,
        }
    }
}

impl From<StorageError> for AdapterError {
    fn from(err: StorageError) -> Self {
        AdapterError::new(
            AdapterErrorKind::StorageError,
            err.failure_class(),
            err.to_string(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_classes() {
        let throttled = StorageError::upload_failed("SlowDown", FailureClass::Transient);
        assert_eq!(throttled.failure_class(), FailureClass::Transient);

        let missing = StorageError::Io(std::io::Error::from(std::io::ErrorKind::NotFound));
        assert_eq!(missing.failure_class(), FailureClass::Fatal);

        let err: AdapterError = StorageError::config_error("R2_BUCKET_NAME not set").into();
        assert_eq!(err.kind, AdapterErrorKind::StorageError);
        assert!(!err.is_transient());
    }
}
