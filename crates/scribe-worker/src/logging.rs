//! Structured chunk logging.
//!
//! Every event carries the job id and chunk index so one chunk's history can
//! be pulled out of interleaved worker logs.

use tracing::{error, info, warn, Span};

use scribe_queue::TranscribeChunkTask;

/// Logger for one chunk task.
#[derive(Debug, Clone)]
pub struct ChunkLogger {
    job_id: String,
    index: u32,
    retry_count: u32,
}

impl ChunkLogger {
    pub fn new(task: &TranscribeChunkTask) -> Self {
        Self {
            job_id: task.job_id.to_string(),
            index: task.index,
            retry_count: task.retry_count,
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            chunk_index = self.index,
            retry_count = self.retry_count,
            "Chunk started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            chunk_index = self.index,
            "Chunk progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            chunk_index = self.index,
            "Chunk warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            chunk_index = self.index,
            retry_count = self.retry_count,
            "Chunk error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            chunk_index = self.index,
            "Chunk completed: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// Span wrapping the whole execution of this chunk.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "chunk",
            job_id = %self.job_id,
            chunk_index = self.index
        )
    }
}
