//! Store traits.

use async_trait::async_trait;

use scribe_models::{Chunk, ChunkCounts, Job, JobId, Transcript};

use crate::StoreResult;

/// Result of resetting a job's unfinished chunks for another attempt.
#[derive(Debug, Clone, Default)]
pub struct RequeueOutcome {
    /// Chunks now PENDING, with their incremented retry counts.
    pub chunks: Vec<Chunk>,
    /// True when the job was moved back to RUNNING.
    pub reopened: bool,
}

/// Durable job/chunk state.
///
/// Implementations must make `create_job` and `requeue_chunks` atomic, and
/// must only apply job-row writes (`annotate_job`, `fail_job`,
/// `StoreTx::complete_job`) while the job is RUNNING.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a job together with all of its chunks, or nothing.
    async fn create_job(&self, job: &Job, chunks: &[Chunk]) -> StoreResult<()>;

    async fn get_job(&self, job_id: &JobId) -> StoreResult<Option<Job>>;

    /// Chunks of a job ordered by index.
    async fn list_chunks(&self, job_id: &JobId) -> StoreResult<Vec<Chunk>>;

    async fn chunk_counts(&self, job_id: &JobId) -> StoreResult<ChunkCounts>;

    async fn get_transcript(&self, job_id: &JobId) -> StoreResult<Option<Transcript>>;

    /// Move a chunk to RUNNING, recording the delivery's retry count.
    ///
    /// Returns false, leaving the chunk untouched, when the job is already
    /// COMPLETED (a late duplicate delivery).
    async fn mark_chunk_running(&self, job_id: &JobId, index: u32, retry_count: u32)
        -> StoreResult<bool>;

    /// Record a chunk's text and move it to DONE. Idempotent.
    async fn mark_chunk_done(&self, job_id: &JobId, index: u32, text: &str) -> StoreResult<()>;

    /// Record a chunk failure. Like `mark_chunk_running`, returns false when
    /// the job is already COMPLETED.
    async fn mark_chunk_failed(
        &self,
        job_id: &JobId,
        index: u32,
        error: &str,
        retry_count: u32,
    ) -> StoreResult<bool>;

    /// Append a line to a RUNNING job's status detail. Returns false if the
    /// job is missing or already terminal.
    async fn annotate_job(&self, job_id: &JobId, line: &str) -> StoreResult<bool>;

    /// Move a RUNNING job to FAILED with a detail line. Returns false if the
    /// job is missing or already terminal.
    async fn fail_job(&self, job_id: &JobId, line: &str) -> StoreResult<bool>;

    /// Reset every FAILED or PENDING chunk to PENDING (incrementing its retry
    /// count) and reopen the job with a detail line, in one transaction.
    ///
    /// DONE and RUNNING chunks are untouched. The job is reopened when chunks
    /// were reset, or when it is FAILED with nothing left to reset so that
    /// finalization can run again. Returns `None` if the job does not exist.
    async fn requeue_chunks(&self, job_id: &JobId, note: &str)
        -> StoreResult<Option<RequeueOutcome>>;

    /// Try to take the named lock without waiting.
    async fn try_acquire_lock(&self, key: &str) -> StoreResult<bool>;

    async fn release_lock(&self, key: &str) -> StoreResult<()>;

    /// Open a transaction.
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>>;

    /// Connectivity check for readiness probes.
    async fn ping(&self) -> StoreResult<()>;
}

/// An open store transaction. Dropping it without `commit` rolls back.
#[async_trait]
pub trait StoreTx: Send {
    /// Read and row-lock a job.
    async fn job_for_update(&mut self, job_id: &JobId) -> StoreResult<Option<Job>>;

    /// Chunks of a job ordered by index.
    async fn chunks(&mut self, job_id: &JobId) -> StoreResult<Vec<Chunk>>;

    async fn upsert_transcript(&mut self, job_id: &JobId, text: &str) -> StoreResult<Transcript>;

    /// Move a RUNNING job to COMPLETED, appending a detail line. Returns
    /// false if the job is not RUNNING.
    async fn complete_job(&mut self, job_id: &JobId, line: &str) -> StoreResult<bool>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}
