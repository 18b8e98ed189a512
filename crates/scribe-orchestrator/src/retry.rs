//! Retry coordination for partially failed jobs.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use scribe_models::JobId;
use scribe_queue::QueueError;
use scribe_store::{JobStore, RetryPolicy};

use crate::dispatch::ChunkDispatcher;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::finalizer::{FinalizeOutcome, Finalizer};
use crate::metrics::{record_chunks_requeued, record_dispatch_failure};

/// Result of a retry request.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOutcome {
    /// Chunks reset to PENDING.
    pub requeued: u32,
    /// Of those, how many the transport accepted.
    pub dispatched: u32,
    /// Set when nothing needed requeueing but the job was reopened, so
    /// finalization ran right away.
    pub finalized: Option<FinalizeOutcome>,
}

/// Resets unfinished chunks and dispatches them again.
pub struct RetryCoordinator {
    store: Arc<dyn JobStore>,
    dispatcher: ChunkDispatcher,
    finalizer: Finalizer,
    dispatch_policy: RetryPolicy,
}

impl RetryCoordinator {
    pub fn new(store: Arc<dyn JobStore>, dispatcher: ChunkDispatcher, finalizer: Finalizer) -> Self {
        Self {
            store,
            dispatcher,
            finalizer,
            dispatch_policy: RetryPolicy::default(),
        }
    }

    /// Policy for transient dispatch failures.
    pub fn with_dispatch_policy(mut self, policy: RetryPolicy) -> Self {
        self.dispatch_policy = policy;
        self
    }

    /// Requeue every FAILED or PENDING chunk of a job and re-dispatch them.
    ///
    /// DONE chunks keep their text and RUNNING chunks are left alone. Calling
    /// this on a job with nothing to requeue changes nothing, except that a
    /// FAILED job whose chunks are all DONE is reopened and finalized.
    pub async fn retry(&self, job_id: &JobId) -> OrchestratorResult<RetryOutcome> {
        let note = format!("[{}] Retry requested", Utc::now().to_rfc3339());
        let requeue = self
            .store
            .requeue_chunks(job_id, &note)
            .await?
            .ok_or_else(|| OrchestratorError::job_not_found(job_id.as_str()))?;

        let requeued = requeue.chunks.len() as u32;
        record_chunks_requeued(requeue.chunks.len());

        let source_locator = match requeue.chunks.first() {
            Some(_) => self
                .store
                .get_job(job_id)
                .await?
                .map(|job| job.source_locator)
                .ok_or_else(|| OrchestratorError::job_not_found(job_id.as_str()))?,
            None => String::new(),
        };

        let mut dispatched = 0u32;
        for chunk in &requeue.chunks {
            let result = self
                .dispatch_policy
                .run("dispatch_chunk", QueueError::is_retryable, || {
                    self.dispatcher.dispatch(&source_locator, chunk)
                })
                .await;
            match result {
                Ok(_) => dispatched += 1,
                Err(e) => {
                    error!(job_id = %job_id, chunk = chunk.index, "Re-dispatch failed: {}", e);
                    record_dispatch_failure("retry");
                }
            }
        }

        let undispatched = requeued - dispatched;
        if undispatched > 0 {
            let line = format!(
                "Dispatch failed for {} chunks (retry or /retry)",
                undispatched
            );
            if let Err(e) = self.store.annotate_job(job_id, &line).await {
                warn!(job_id = %job_id, "Failed to annotate job: {}", e);
            }
        }

        let finalized = if requeue.chunks.is_empty() && requeue.reopened {
            Some(self.finalizer.finalize(job_id).await?)
        } else {
            None
        };

        info!(
            job_id = %job_id,
            requeued,
            dispatched,
            reopened = requeue.reopened,
            "Retry processed"
        );

        Ok(RetryOutcome {
            requeued,
            dispatched,
            finalized,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use scribe_models::{Chunk, ChunkPlan, ChunkStatus, Job, JobStatus};
    use scribe_queue::{MemoryDispatcher, TaskKind};
    use scribe_storage::MemoryObjectStore;
    use scribe_store::MemoryJobStore;

    use crate::finalizer::{TranscriptSink, FAILED_CHUNKS_DETAIL};

    struct Fixture {
        store: MemoryJobStore,
        dispatcher: MemoryDispatcher,
        coordinator: RetryCoordinator,
        job_id: JobId,
    }

    async fn fixture(duration: f64) -> Fixture {
        let store = MemoryJobStore::new();
        let dispatcher = MemoryDispatcher::new();
        let plan = ChunkPlan::new(duration, 600.0, 2.0).unwrap();
        let job = Job::from_plan(JobId::from_string("job-1"), "s3://media/a.mp3", &plan);
        let chunks: Vec<Chunk> = plan
            .chunks
            .iter()
            .map(|p| Chunk::pending(job.id.clone(), p))
            .collect();
        store.create_job(&job, &chunks).await.unwrap();

        let store_arc: Arc<dyn JobStore> = Arc::new(store.clone());
        let finalizer = Finalizer::new(
            store_arc.clone(),
            TranscriptSink::new(Arc::new(MemoryObjectStore::new()), "out", ""),
        );
        let coordinator = RetryCoordinator::new(
            store_arc,
            ChunkDispatcher::new(Arc::new(dispatcher.clone()), Duration::from_secs(600)),
            finalizer,
        )
        .with_dispatch_policy(RetryPolicy::linear(3, Duration::ZERO));

        Fixture {
            store,
            dispatcher,
            coordinator,
            job_id: job.id,
        }
    }

    fn dispatched_indices(tasks: &[TaskKind]) -> Vec<(u32, u32)> {
        tasks
            .iter()
            .map(|t| match t {
                TaskKind::TranscribeChunk(t) => (t.index, t.retry_count),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_retry_requeues_only_failed() {
        let f = fixture(1500.0).await;
        f.store.mark_chunk_done(&f.job_id, 0, "a").await.unwrap();
        f.store.mark_chunk_failed(&f.job_id, 1, "boom", 0).await.unwrap();
        f.store.mark_chunk_done(&f.job_id, 2, "c").await.unwrap();
        f.store.fail_job(&f.job_id, FAILED_CHUNKS_DETAIL).await.unwrap();

        let outcome = f.coordinator.retry(&f.job_id).await.unwrap();
        assert_eq!(outcome.requeued, 1);
        assert_eq!(outcome.dispatched, 1);
        assert!(outcome.finalized.is_none());
        assert_eq!(dispatched_indices(&f.dispatcher.take().await), vec![(1, 1)]);

        let job = f.store.get_job(&f.job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.status_detail.unwrap().contains("Retry requested"));

        let chunks = f.store.list_chunks(&f.job_id).await.unwrap();
        assert_eq!(chunks[0].status, ChunkStatus::Done);
        assert_eq!(chunks[0].text.as_deref(), Some("a"));
        assert_eq!(chunks[1].status, ChunkStatus::Pending);
        assert!(chunks[1].error_msg.is_none());
    }

    #[tokio::test]
    async fn test_retry_survives_transient_dispatch_errors() {
        let f = fixture(1500.0).await;
        f.dispatcher.fail_next(2);

        let outcome = f.coordinator.retry(&f.job_id).await.unwrap();
        assert_eq!(outcome.requeued, 3);
        assert_eq!(outcome.dispatched, 3);
        assert_eq!(f.dispatcher.dispatched().await.len(), 3);
    }

    #[tokio::test]
    async fn test_retry_completed_job_is_noop() {
        let f = fixture(100.0).await;
        f.store.mark_chunk_done(&f.job_id, 0, "x").await.unwrap();
        let mut tx = f.store.begin().await.unwrap();
        tx.complete_job(&f.job_id, "done").await.unwrap();
        tx.commit().await.unwrap();

        let outcome = f.coordinator.retry(&f.job_id).await.unwrap();
        assert_eq!(
            outcome,
            RetryOutcome {
                requeued: 0,
                dispatched: 0,
                finalized: None
            }
        );
        let job = f.store.get_job(&f.job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.status_detail.as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn test_retry_failed_job_with_all_done_finalizes() {
        let f = fixture(100.0).await;
        f.store.mark_chunk_done(&f.job_id, 0, "x").await.unwrap();
        f.store.fail_job(&f.job_id, "Finalize failed: upload").await.unwrap();

        let outcome = f.coordinator.retry(&f.job_id).await.unwrap();
        assert_eq!(outcome.requeued, 0);
        assert!(outcome.finalized.unwrap().is_completed());
        let job = f.store.get_job(&f.job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_retry_missing_job() {
        let f = fixture(100.0).await;
        let err = f
            .coordinator
            .retry(&JobId::from_string("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::JobNotFound(_)));
    }
}
