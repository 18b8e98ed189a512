//! Orchestrator error types.

use thiserror::Error;

use scribe_models::PlanError;
use scribe_queue::QueueError;
use scribe_storage::StorageError;
use scribe_store::StoreError;

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid chunk plan: {0}")]
    Plan(#[from] PlanError),

    #[error("Finalization check failed: {0}")]
    Postcondition(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

impl OrchestratorError {
    pub fn job_not_found(id: impl Into<String>) -> Self {
        Self::JobNotFound(id.into())
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn postcondition(msg: impl Into<String>) -> Self {
        Self::Postcondition(msg.into())
    }

    /// Transaction conflicts and transport hiccups.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_retryable(),
            Self::Queue(e) => e.is_retryable(),
            _ => false,
        }
    }
}
