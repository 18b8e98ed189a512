//! Worker error types.

use thiserror::Error;

use scribe_store::StoreError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Transcription failed: {0}")]
    Transcription(String),

    /// Rate limiting or a transient server error from the model.
    #[error("Transcription service unavailable: {0}")]
    TranscriptionUnavailable(String),

    #[error("deadline exceeded after {0}s")]
    DeadlineExceeded(u64),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Storage error: {0}")]
    Storage(#[from] scribe_storage::StorageError),

    #[error("Media error: {0}")]
    Media(#[from] scribe_media::MediaError),

    #[error("Queue error: {0}")]
    Queue(#[from] scribe_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn transcription(msg: impl Into<String>) -> Self {
        Self::Transcription(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::TranscriptionUnavailable(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Worth another attempt within the same task.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WorkerError::TranscriptionUnavailable(_))
    }

    /// The task should stay unacknowledged so the transport delivers it
    /// again.
    ///
    /// Only store failures qualify: everything else has already been
    /// recorded as a FAILED chunk. A task naming a chunk that does not
    /// exist can never succeed and is not redelivered.
    pub fn is_redeliverable(&self) -> bool {
        match self {
            WorkerError::Store(StoreError::ChunkNotFound { .. })
            | WorkerError::Store(StoreError::JobNotFound(_)) => false,
            WorkerError::Store(_) => true,
            _ => false,
        }
    }
}
