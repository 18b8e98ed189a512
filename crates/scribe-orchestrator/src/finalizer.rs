//! Job finalization.
//!
//! Once every chunk of a job is DONE, exactly one caller assembles the
//! transcript, stores it, publishes it to object storage and marks the job
//! COMPLETED. Any chunk FAILED instead fails the job.
//!
//! Single-winner behavior comes from two layers:
//! - a non-blocking named lock keyed by job id, so concurrent callers bail
//!   out early with [`FinalizeOutcome::LockBusy`]
//! - a transaction holding the job row lock, which re-checks that the job is
//!   still RUNNING before writing anything
//!
//! The lock is always released, whatever the outcome.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use scribe_models::{assemble_transcript, ChunkCounts, JobId, JobStatus};
use scribe_storage::{transcript_locator, ObjectLocator, ObjectStore, TRANSCRIPT_CONTENT_TYPE};
use scribe_store::{JobStore, RetryPolicy};

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::metrics::record_job_finalized;

/// Detail line written when a job fails because of failed chunks.
pub const FAILED_CHUNKS_DETAIL: &str = "One or more chunks FAILED";

/// What a finalization attempt did.
#[derive(Debug, Clone, PartialEq)]
pub enum FinalizeOutcome {
    /// Some chunks are still PENDING or RUNNING.
    NotReady { remaining: u32 },
    /// At least one chunk FAILED; the job is (now) FAILED.
    Failed { failed_chunks: u32 },
    /// Another finalizer holds the job's lock.
    LockBusy,
    /// The job had already left RUNNING.
    AlreadyFinal(JobStatus),
    /// This call published the transcript and completed the job.
    Completed { location: String, chars: usize },
}

impl FinalizeOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, FinalizeOutcome::Completed { .. })
    }
}

/// Where finalized transcripts are written.
#[derive(Clone)]
pub struct TranscriptSink {
    objects: Arc<dyn ObjectStore>,
    bucket: String,
    prefix: String,
}

impl TranscriptSink {
    pub fn new(objects: Arc<dyn ObjectStore>, bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            objects,
            bucket: bucket.into(),
            prefix: prefix.into(),
        }
    }

    pub fn locator(&self, job_id: &JobId) -> ObjectLocator {
        transcript_locator(&self.bucket, &self.prefix, job_id)
    }
}

/// Assembles and publishes transcripts.
#[derive(Clone)]
pub struct Finalizer {
    store: Arc<dyn JobStore>,
    sink: TranscriptSink,
    policy: RetryPolicy,
}

impl Finalizer {
    pub fn new(store: Arc<dyn JobStore>, sink: TranscriptSink) -> Self {
        Self {
            store,
            sink,
            policy: RetryPolicy::default(),
        }
    }

    /// Policy applied to the finalize transaction on retryable conflicts.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn sink(&self) -> &TranscriptSink {
        &self.sink
    }

    /// Try to finalize a job. Safe to call any number of times, from any
    /// number of tasks.
    ///
    /// An error means the attempt itself broke (storage, store or a failed
    /// post-write check); the job has then been marked FAILED.
    pub async fn finalize(&self, job_id: &JobId) -> OrchestratorResult<FinalizeOutcome> {
        let counts = self.store.chunk_counts(job_id).await?;

        if counts.failed > 0 {
            if self.store.fail_job(job_id, FAILED_CHUNKS_DETAIL).await? {
                warn!(job_id = %job_id, failed = counts.failed, "Job failed: chunks FAILED");
                record_job_finalized("failed");
            }
            return Ok(FinalizeOutcome::Failed {
                failed_chunks: counts.failed,
            });
        }

        if !counts.all_done() {
            debug!(job_id = %job_id, remaining = counts.not_done(), "Job not ready to finalize");
            return Ok(FinalizeOutcome::NotReady {
                remaining: counts.not_done(),
            });
        }

        let lock_key = lock_key(job_id);
        if !self.store.try_acquire_lock(&lock_key).await? {
            debug!(job_id = %job_id, "Finalize lock busy, another worker is finalizing");
            return Ok(FinalizeOutcome::LockBusy);
        }

        let result = self
            .policy
            .run("finalize", OrchestratorError::is_retryable, || {
                self.finalize_locked(job_id)
            })
            .await;

        let result = match result {
            Ok(outcome) => {
                if let FinalizeOutcome::Completed { location, chars } = &outcome {
                    info!(job_id = %job_id, location = %location, chars, "Job completed");
                    record_job_finalized("completed");
                }
                Ok(outcome)
            }
            Err(e) => {
                error!(job_id = %job_id, "Finalize failed: {}", e);
                let line = format!("Finalize failed: {}", e);
                match self.store.fail_job(job_id, &line).await {
                    Ok(true) => record_job_finalized("failed"),
                    Ok(false) => {}
                    Err(fe) => error!(job_id = %job_id, "Could not mark job FAILED: {}", fe),
                }
                Err(e)
            }
        };

        if let Err(e) = self.store.release_lock(&lock_key).await {
            warn!(job_id = %job_id, "Failed to release finalize lock: {}", e);
        }

        result
    }

    /// One attempt under the named lock. Any early return drops the
    /// transaction, rolling it back.
    async fn finalize_locked(&self, job_id: &JobId) -> OrchestratorResult<FinalizeOutcome> {
        let mut tx = self.store.begin().await?;

        let job = tx
            .job_for_update(job_id)
            .await?
            .ok_or_else(|| OrchestratorError::job_not_found(job_id.as_str()))?;
        if job.status != JobStatus::Running {
            tx.rollback().await?;
            return Ok(FinalizeOutcome::AlreadyFinal(job.status));
        }

        let chunks = tx.chunks(job_id).await?;
        let counts: ChunkCounts = chunks.iter().map(|c| c.status).collect();
        if !counts.all_done() || counts.total() != job.total_chunks {
            tx.rollback().await?;
            return Ok(FinalizeOutcome::NotReady {
                remaining: job.total_chunks.saturating_sub(counts.done),
            });
        }

        let text = assemble_transcript(
            chunks
                .iter()
                .map(|c| (c.index, c.text.as_deref().unwrap_or(""))),
        );
        let chars = text.chars().count();
        tx.upsert_transcript(job_id, &text).await?;

        let locator = self.sink.locator(job_id);
        self.sink
            .objects
            .put_text(&locator, &text, TRANSCRIPT_CONTENT_TYPE)
            .await?;
        let location = locator.to_string();

        let detail = format!(
            "Transcription assembled ({} chars at {}) | saved to {}",
            chars,
            Utc::now().to_rfc3339(),
            location
        );
        if !tx.complete_job(job_id, &detail).await? {
            return Err(OrchestratorError::postcondition(
                "job left RUNNING during finalization",
            ));
        }

        let after = tx
            .job_for_update(job_id)
            .await?
            .ok_or_else(|| OrchestratorError::job_not_found(job_id.as_str()))?;
        let recorded = after
            .status_detail
            .as_deref()
            .map(|d| d.contains(&location))
            .unwrap_or(false);
        if after.status != JobStatus::Completed || !recorded {
            return Err(OrchestratorError::postcondition(format!(
                "job is {} and detail does not reference {}",
                after.status, location
            )));
        }

        tx.commit().await?;
        Ok(FinalizeOutcome::Completed { location, chars })
    }
}

fn lock_key(job_id: &JobId) -> String {
    format!("finalize:{}", job_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use scribe_models::{Chunk, ChunkPlan, Job, Transcript};
    use scribe_storage::MemoryObjectStore;
    use scribe_store::{MemoryJobStore, RequeueOutcome, StoreResult, StoreTx};

    /// Memory store whose transactions never manage to complete the job.
    struct RefusingStore(MemoryJobStore);

    struct RefusingTx(Box<dyn StoreTx>);

    #[async_trait]
    impl StoreTx for RefusingTx {
        async fn job_for_update(&mut self, job_id: &JobId) -> StoreResult<Option<Job>> {
            self.0.job_for_update(job_id).await
        }

        async fn chunks(&mut self, job_id: &JobId) -> StoreResult<Vec<Chunk>> {
            self.0.chunks(job_id).await
        }

        async fn upsert_transcript(&mut self, job_id: &JobId, text: &str) -> StoreResult<Transcript> {
            self.0.upsert_transcript(job_id, text).await
        }

        async fn complete_job(&mut self, _job_id: &JobId, _line: &str) -> StoreResult<bool> {
            Ok(false)
        }

        async fn commit(self: Box<Self>) -> StoreResult<()> {
            self.0.commit().await
        }

        async fn rollback(self: Box<Self>) -> StoreResult<()> {
            self.0.rollback().await
        }
    }

    #[async_trait]
    impl JobStore for RefusingStore {
        async fn create_job(&self, job: &Job, chunks: &[Chunk]) -> StoreResult<()> {
            self.0.create_job(job, chunks).await
        }

        async fn get_job(&self, job_id: &JobId) -> StoreResult<Option<Job>> {
            self.0.get_job(job_id).await
        }

        async fn list_chunks(&self, job_id: &JobId) -> StoreResult<Vec<Chunk>> {
            self.0.list_chunks(job_id).await
        }

        async fn chunk_counts(&self, job_id: &JobId) -> StoreResult<ChunkCounts> {
            self.0.chunk_counts(job_id).await
        }

        async fn get_transcript(&self, job_id: &JobId) -> StoreResult<Option<Transcript>> {
            self.0.get_transcript(job_id).await
        }

        async fn mark_chunk_running(&self, job_id: &JobId, index: u32, retry_count: u32) -> StoreResult<bool> {
            self.0.mark_chunk_running(job_id, index, retry_count).await
        }

        async fn mark_chunk_done(&self, job_id: &JobId, index: u32, text: &str) -> StoreResult<()> {
            self.0.mark_chunk_done(job_id, index, text).await
        }

        async fn mark_chunk_failed(
            &self,
            job_id: &JobId,
            index: u32,
            error: &str,
            retry_count: u32,
        ) -> StoreResult<bool> {
            self.0.mark_chunk_failed(job_id, index, error, retry_count).await
        }

        async fn annotate_job(&self, job_id: &JobId, line: &str) -> StoreResult<bool> {
            self.0.annotate_job(job_id, line).await
        }

        async fn fail_job(&self, job_id: &JobId, line: &str) -> StoreResult<bool> {
            self.0.fail_job(job_id, line).await
        }

        async fn requeue_chunks(&self, job_id: &JobId, note: &str) -> StoreResult<Option<RequeueOutcome>> {
            self.0.requeue_chunks(job_id, note).await
        }

        async fn try_acquire_lock(&self, key: &str) -> StoreResult<bool> {
            self.0.try_acquire_lock(key).await
        }

        async fn release_lock(&self, key: &str) -> StoreResult<()> {
            self.0.release_lock(key).await
        }

        async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
            Ok(Box::new(RefusingTx(self.0.begin().await?)))
        }

        async fn ping(&self) -> StoreResult<()> {
            self.0.ping().await
        }
    }

    struct Fixture {
        store: MemoryJobStore,
        objects: MemoryObjectStore,
        finalizer: Finalizer,
        job_id: JobId,
    }

    async fn fixture(duration: f64) -> Fixture {
        let store = MemoryJobStore::new();
        let objects = MemoryObjectStore::new();
        let plan = ChunkPlan::new(duration, 600.0, 2.0).unwrap();
        let job = Job::from_plan(JobId::from_string("job-1"), "s3://media/a.mp3", &plan);
        let chunks: Vec<Chunk> = plan
            .chunks
            .iter()
            .map(|p| Chunk::pending(job.id.clone(), p))
            .collect();
        store.create_job(&job, &chunks).await.unwrap();

        let finalizer = Finalizer::new(
            Arc::new(store.clone()),
            TranscriptSink::new(Arc::new(objects.clone()), "out", "transcripts"),
        );
        Fixture {
            store,
            objects,
            finalizer,
            job_id: job.id,
        }
    }

    async fn complete_all(f: &Fixture, texts: &[&str]) {
        for (i, text) in texts.iter().enumerate() {
            f.store.mark_chunk_done(&f.job_id, i as u32, text).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_not_ready() {
        let f = fixture(1500.0).await;
        f.store.mark_chunk_done(&f.job_id, 0, "a").await.unwrap();

        let outcome = f.finalizer.finalize(&f.job_id).await.unwrap();
        assert_eq!(outcome, FinalizeOutcome::NotReady { remaining: 2 });
        assert_eq!(f.store.lock_acquisitions(), 0);
    }

    #[tokio::test]
    async fn test_completes_in_index_order() {
        let f = fixture(1500.0).await;
        f.store.mark_chunk_done(&f.job_id, 2, "three").await.unwrap();
        f.store.mark_chunk_done(&f.job_id, 0, "one").await.unwrap();
        f.store.mark_chunk_done(&f.job_id, 1, "two").await.unwrap();

        let outcome = f.finalizer.finalize(&f.job_id).await.unwrap();
        let FinalizeOutcome::Completed { location, chars } = outcome else {
            panic!("expected completion, got {:?}", outcome);
        };
        assert_eq!(location, "s3://out/transcripts/job-1.txt");
        assert_eq!(chars, "one\ntwo\nthree".len());

        let transcript = f.store.get_transcript(&f.job_id).await.unwrap().unwrap();
        assert_eq!(transcript.text, "one\ntwo\nthree");
        let published = f
            .objects
            .get(&ObjectLocator::new("out", "transcripts/job-1.txt"))
            .await
            .unwrap();
        assert_eq!(published, b"one\ntwo\nthree");

        let job = f.store.get_job(&f.job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.completed_at.is_some());
        assert!(job
            .status_detail
            .unwrap()
            .contains("saved to s3://out/transcripts/job-1.txt"));
        assert!(!f.store.is_locked("finalize:job-1").await);
    }

    #[tokio::test]
    async fn test_second_call_is_noop() {
        let f = fixture(100.0).await;
        complete_all(&f, &["only"]).await;

        assert!(f.finalizer.finalize(&f.job_id).await.unwrap().is_completed());
        let again = f.finalizer.finalize(&f.job_id).await.unwrap();
        assert_eq!(again, FinalizeOutcome::AlreadyFinal(JobStatus::Completed));
        assert_eq!(f.store.transcript_writes(), 1);
        assert_eq!(f.objects.put_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_finalizers_single_winner() {
        let f = fixture(1500.0).await;
        complete_all(&f, &["a", "b", "c"]).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let finalizer = f.finalizer.clone();
            let job_id = f.job_id.clone();
            handles.push(tokio::spawn(async move { finalizer.finalize(&job_id).await }));
        }

        let mut completed = 0;
        for handle in handles {
            match handle.await.unwrap().unwrap() {
                FinalizeOutcome::Completed { .. } => completed += 1,
                FinalizeOutcome::LockBusy | FinalizeOutcome::AlreadyFinal(_) => {}
                other => panic!("unexpected outcome {:?}", other),
            }
        }

        assert_eq!(completed, 1);
        assert_eq!(f.store.transcript_writes(), 1);
        assert_eq!(f.objects.put_count(), 1);
        assert!(!f.store.is_locked("finalize:job-1").await);
    }

    #[tokio::test]
    async fn test_lock_busy() {
        let f = fixture(100.0).await;
        complete_all(&f, &["x"]).await;
        assert!(f.store.try_acquire_lock("finalize:job-1").await.unwrap());

        let outcome = f.finalizer.finalize(&f.job_id).await.unwrap();
        assert_eq!(outcome, FinalizeOutcome::LockBusy);
        let job = f.store.get_job(&f.job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Running);
    }

    #[tokio::test]
    async fn test_failed_chunk_fails_job() {
        let f = fixture(1500.0).await;
        f.store.mark_chunk_done(&f.job_id, 0, "a").await.unwrap();
        f.store
            .mark_chunk_failed(&f.job_id, 1, "model error", 0)
            .await
            .unwrap();

        let outcome = f.finalizer.finalize(&f.job_id).await.unwrap();
        assert_eq!(outcome, FinalizeOutcome::Failed { failed_chunks: 1 });

        let job = f.store.get_job(&f.job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.status_detail.as_deref(), Some(FAILED_CHUNKS_DETAIL));
        assert_eq!(f.objects.put_count(), 0);
    }

    #[tokio::test]
    async fn test_publish_failure_fails_job_and_rolls_back() {
        let f = fixture(100.0).await;
        complete_all(&f, &["x"]).await;
        f.objects.set_reject_puts(true);

        let err = f.finalizer.finalize(&f.job_id).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Storage(_)));

        let job = f.store.get_job(&f.job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.status_detail.unwrap().starts_with("Finalize failed:"));
        assert!(f.store.get_transcript(&f.job_id).await.unwrap().is_none());
        assert!(!f.store.is_locked("finalize:job-1").await);
    }

    #[tokio::test]
    async fn test_commit_conflict_is_retried() {
        let f = fixture(100.0).await;
        complete_all(&f, &["x"]).await;
        f.store.inject_commit_conflicts(1);

        let outcome = f.finalizer.finalize(&f.job_id).await.unwrap();
        assert!(outcome.is_completed());
        assert_eq!(f.store.transcript_writes(), 1);
    }

    #[tokio::test]
    async fn test_empty_job_completes_with_empty_transcript() {
        let f = fixture(0.0).await;

        let outcome = f.finalizer.finalize(&f.job_id).await.unwrap();
        assert_eq!(
            outcome,
            FinalizeOutcome::Completed {
                location: "s3://out/transcripts/job-1.txt".to_string(),
                chars: 0
            }
        );
        let transcript = f.store.get_transcript(&f.job_id).await.unwrap().unwrap();
        assert_eq!(transcript.text, "");
    }

    #[tokio::test]
    async fn test_failed_completion_check_fails_job() {
        let f = fixture(100.0).await;
        complete_all(&f, &["x"]).await;
        let finalizer = Finalizer::new(
            Arc::new(RefusingStore(f.store.clone())),
            TranscriptSink::new(Arc::new(f.objects.clone()), "out", "transcripts"),
        );

        let err = finalizer.finalize(&f.job_id).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Postcondition(_)));

        let job = f.store.get_job(&f.job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job
            .status_detail
            .unwrap()
            .contains("Finalization check failed"));
        assert!(f.store.get_transcript(&f.job_id).await.unwrap().is_none());
        assert!(!f.store.is_locked("finalize:job-1").await);
    }
}
