//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

use vgen_models::{AdapterError, AdapterErrorKind, FailureClass};

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur during media processing.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid media: {0}")]
    InvalidMedia(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl MediaError {
    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Retry classification.
    ///
    /// A process killed by a signal or an I/O hiccup may succeed on retry; a
    /// clean non-zero exit on the same inputs will not.
    pub fn failure_class(&self) -> FailureClass {
        match self {
            Self::Timeout(_) | Self::Io(_) => FailureClass::Transient,
            Self::FfmpegFailed { exit_code: None, .. } => FailureClass::Transient,
            _ => FailureClass::Fatal,
        }
    }

    /// Convert into an adapter error of the given family.
    pub fn into_adapter_error(self, kind: AdapterErrorKind) -> AdapterError {
        let class = self.failure_class();
        let message = match &self {
            Self::FfmpegFailed {
                message,
                stderr: Some(stderr),
                ..
            } => format!("{}: {}", message, stderr.trim()),
            other => other.to_string(),
        };
        AdapterError::new(kind, class, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_classification() {
        assert_eq!(MediaError::Timeout(30).failure_class(), FailureClass::Transient);
        assert_eq!(
            MediaError::ffmpeg_failed("killed", None, None).failure_class(),
            FailureClass::Transient
        );
        assert_eq!(
            MediaError::ffmpeg_failed("bad filter", None, Some(1)).failure_class(),
            FailureClass::Fatal
        );
        assert_eq!(MediaError::FfmpegNotFound.failure_class(), FailureClass::Fatal);
    }

    #[test]
    fn test_adapter_error_includes_stderr() {
        let err = MediaError::ffmpeg_failed(
            "FFmpeg exited with non-zero status",
            Some("Invalid data found when processing input\n".to_string()),
            Some(1),
        )
        .into_adapter_error(AdapterErrorKind::AssemblyError);
        assert_eq!(err.kind, AdapterErrorKind::AssemblyError);
        assert!(err.message.contains("Invalid data found"));
        assert!(!err.is_transient());
    }
}
