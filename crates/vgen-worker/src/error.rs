//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Pipeline has no adapter for the {0} stage")]
    MissingAdapter(vgen_models::Stage),

    #[error("Queue error: {0}")]
    Queue(#[from] vgen_queue::QueueError),

    #[error("Storage error: {0}")]
    Storage(#[from] vgen_storage::StorageError),

    #[error("Media error: {0}")]
    Media(#[from] vgen_media::MediaError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Store outages are worth waiting out; everything else is a bug or bad config.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WorkerError::Queue(e) if e.is_unavailable())
    }
}
