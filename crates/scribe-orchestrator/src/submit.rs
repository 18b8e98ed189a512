//! Job submission.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{error, info, warn};

use scribe_models::{Chunk, ChunkPlan, Job, JobId, DEFAULT_OVERLAP_SECS, DEFAULT_SLICE_SECS};
use scribe_storage::ObjectLocator;
use scribe_store::JobStore;

use crate::dispatch::ChunkDispatcher;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::finalizer::{FinalizeOutcome, Finalizer};
use crate::metrics::{record_dispatch_failure, record_job_submitted};
use crate::probe::DurationProbe;

/// A request to transcribe one source.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    /// Caller-assigned id; generated when absent.
    #[serde(default)]
    pub job_id: Option<JobId>,
    pub source_locator: String,
    /// Probed from the source when absent.
    #[serde(default)]
    pub duration_secs: Option<f64>,
    #[serde(default)]
    pub slice_secs: Option<f64>,
    #[serde(default)]
    pub overlap_secs: Option<f64>,
}

/// Result of a submission.
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub job: Job,
    /// Chunk tasks the transport accepted.
    pub dispatched: u32,
    /// Set for zero-chunk jobs, which are finalized on the spot.
    pub finalized: Option<FinalizeOutcome>,
}

/// Plans, persists and dispatches new jobs.
pub struct JobSubmitter {
    store: Arc<dyn JobStore>,
    dispatcher: ChunkDispatcher,
    finalizer: Finalizer,
    probe: Option<Arc<dyn DurationProbe>>,
    slice_secs: f64,
    overlap_secs: f64,
}

impl JobSubmitter {
    pub fn new(store: Arc<dyn JobStore>, dispatcher: ChunkDispatcher, finalizer: Finalizer) -> Self {
        Self {
            store,
            dispatcher,
            finalizer,
            probe: None,
            slice_secs: DEFAULT_SLICE_SECS,
            overlap_secs: DEFAULT_OVERLAP_SECS,
        }
    }

    /// Defaults for requests that do not set their own slicing.
    pub fn with_slicing(mut self, slice_secs: f64, overlap_secs: f64) -> Self {
        self.slice_secs = slice_secs;
        self.overlap_secs = overlap_secs;
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn DurationProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Create a job and hand one task per chunk to the transport.
    ///
    /// The job and all its chunks are stored before anything is dispatched.
    /// Chunks whose dispatch fails stay PENDING and are picked up by a later
    /// retry; the job detail says how many.
    pub async fn submit(&self, request: SubmitRequest) -> OrchestratorResult<SubmitOutcome> {
        let source = ObjectLocator::parse(&request.source_locator)
            .map_err(|e| OrchestratorError::invalid_request(e.to_string()))?;

        let duration = match (request.duration_secs, &self.probe) {
            (Some(d), _) => d,
            (None, Some(probe)) => probe.probe(&source).await?,
            (None, None) => {
                return Err(OrchestratorError::invalid_request(
                    "durationSecs is required",
                ))
            }
        };

        let plan = ChunkPlan::new(
            duration,
            request.slice_secs.unwrap_or(self.slice_secs),
            request.overlap_secs.unwrap_or(self.overlap_secs),
        )?;

        let job_id = request.job_id.unwrap_or_default();
        let job = Job::from_plan(job_id, request.source_locator.trim(), &plan);
        let chunks: Vec<Chunk> = plan
            .chunks
            .iter()
            .map(|p| Chunk::pending(job.id.clone(), p))
            .collect();

        self.store.create_job(&job, &chunks).await?;
        record_job_submitted(chunks.len());
        info!(
            job_id = %job.id,
            source = %job.source_locator,
            duration_secs = plan.duration_secs,
            chunks = chunks.len(),
            "Job submitted"
        );

        if chunks.is_empty() {
            let outcome = self.finalizer.finalize(&job.id).await?;
            return Ok(SubmitOutcome {
                job,
                dispatched: 0,
                finalized: Some(outcome),
            });
        }

        let mut dispatched = 0u32;
        let mut failed = 0u32;
        for chunk in &chunks {
            match self.dispatcher.dispatch(&job.source_locator, chunk).await {
                Ok(_) => dispatched += 1,
                Err(e) => {
                    error!(job_id = %job.id, chunk = chunk.index, "Dispatch failed: {}", e);
                    record_dispatch_failure("submit");
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            let line = format!("Dispatch failed for {} chunks (retry or /retry)", failed);
            if let Err(e) = self.store.annotate_job(&job.id, &line).await {
                warn!(job_id = %job.id, "Failed to annotate job: {}", e);
            }
        }

        Ok(SubmitOutcome {
            job,
            dispatched,
            finalized: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use scribe_models::{ChunkStatus, JobStatus};
    use scribe_queue::{MemoryDispatcher, TaskKind};
    use scribe_storage::{MemoryObjectStore, StorageResult};
    use scribe_store::{MemoryJobStore, StoreError};

    use crate::finalizer::TranscriptSink;

    struct FixedProbe(f64);

    #[async_trait]
    impl DurationProbe for FixedProbe {
        async fn probe(&self, _source: &ObjectLocator) -> StorageResult<f64> {
            Ok(self.0)
        }
    }

    fn submitter(store: &MemoryJobStore, dispatcher: &MemoryDispatcher) -> JobSubmitter {
        let store_arc: Arc<dyn JobStore> = Arc::new(store.clone());
        let finalizer = Finalizer::new(
            store_arc.clone(),
            TranscriptSink::new(Arc::new(MemoryObjectStore::new()), "out", "transcripts"),
        );
        JobSubmitter::new(
            store_arc,
            ChunkDispatcher::new(Arc::new(dispatcher.clone()), Duration::from_secs(600)),
            finalizer,
        )
    }

    fn request(duration: Option<f64>) -> SubmitRequest {
        SubmitRequest {
            job_id: Some(JobId::from_string("job-1")),
            source_locator: "s3://media/talk.mp3".to_string(),
            duration_secs: duration,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_submit_plans_and_dispatches() {
        let store = MemoryJobStore::new();
        let dispatcher = MemoryDispatcher::new();

        let outcome = submitter(&store, &dispatcher)
            .submit(request(Some(1500.0)))
            .await
            .unwrap();
        assert_eq!(outcome.job.total_chunks, 3);
        assert_eq!(outcome.dispatched, 3);
        assert!(outcome.finalized.is_none());

        let chunks = store.list_chunks(&outcome.job.id).await.unwrap();
        let bounds: Vec<(f64, f64)> = chunks.iter().map(|c| (c.start_secs, c.end_secs)).collect();
        assert_eq!(bounds, vec![(0.0, 600.0), (598.0, 1200.0), (1198.0, 1500.0)]);
        assert!(chunks.iter().all(|c| c.status == ChunkStatus::Pending));

        let tasks = dispatcher.take().await;
        let indices: Vec<u32> = tasks
            .iter()
            .map(|t| match t {
                TaskKind::TranscribeChunk(t) => t.index,
            })
            .collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_zero_duration_completes_immediately() {
        let store = MemoryJobStore::new();
        let dispatcher = MemoryDispatcher::new();

        let outcome = submitter(&store, &dispatcher)
            .submit(request(Some(0.0)))
            .await
            .unwrap();
        assert_eq!(outcome.job.total_chunks, 0);
        assert!(outcome.finalized.unwrap().is_completed());
        assert!(dispatcher.dispatched().await.is_empty());

        let job = store.get_job(&outcome.job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_duration_probed_when_missing() {
        let store = MemoryJobStore::new();
        let dispatcher = MemoryDispatcher::new();
        let submitter = submitter(&store, &dispatcher).with_probe(Arc::new(FixedProbe(700.0)));

        let outcome = submitter.submit(request(None)).await.unwrap();
        assert_eq!(outcome.job.duration_secs, 700.0);
        assert_eq!(outcome.job.total_chunks, 2);
    }

    #[tokio::test]
    async fn test_missing_duration_without_probe() {
        let store = MemoryJobStore::new();
        let err = submitter(&store, &MemoryDispatcher::new())
            .submit(request(None))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_invalid_inputs_rejected() {
        let store = MemoryJobStore::new();
        let submitter = submitter(&store, &MemoryDispatcher::new());

        let mut bad_locator = request(Some(10.0));
        bad_locator.source_locator = "no-key".to_string();
        assert!(matches!(
            submitter.submit(bad_locator).await.unwrap_err(),
            OrchestratorError::InvalidRequest(_)
        ));

        let mut bad_overlap = request(Some(10.0));
        bad_overlap.overlap_secs = Some(700.0);
        assert!(matches!(
            submitter.submit(bad_overlap).await.unwrap_err(),
            OrchestratorError::Plan(_)
        ));
        assert!(store.get_job(&JobId::from_string("job-1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_job_id() {
        let store = MemoryJobStore::new();
        let submitter = submitter(&store, &MemoryDispatcher::new());
        submitter.submit(request(Some(10.0))).await.unwrap();

        let err = submitter.submit(request(Some(10.0))).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Store(StoreError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_dispatch_failure_noted() {
        let store = MemoryJobStore::new();
        let dispatcher = MemoryDispatcher::new();
        dispatcher.fail_next(1);

        let outcome = submitter(&store, &dispatcher)
            .submit(request(Some(1500.0)))
            .await
            .unwrap();
        assert_eq!(outcome.dispatched, 2);

        let job = store.get_job(&outcome.job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert!(job
            .status_detail
            .unwrap()
            .contains("Dispatch failed for 1 chunks"));
    }
}
