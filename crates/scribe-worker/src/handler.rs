//! Chunk task execution.
//!
//! One task, one chunk:
//! 1. mark the chunk RUNNING with the delivery's retry count
//! 2. fetch the source into a scratch directory
//! 3. cut the chunk's time range out as audio
//! 4. transcribe it and strip fillers
//! 5. record the text (DONE) or the error (FAILED)
//! 6. try to finalize the job
//!
//! Steps 2-4 run under the task deadline. Their failures are recorded on
//! the chunk and never surface as errors; only store failures do, so the
//! transport can redeliver the task.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, Instrument};

use scribe_orchestrator::{FinalizeOutcome, Finalizer};
use scribe_queue::TranscribeChunkTask;
use scribe_storage::{ObjectLocator, ObjectStore};
use scribe_store::JobStore;

use crate::error::{WorkerError, WorkerResult};
use crate::extract::SegmentExtractor;
use crate::filler::strip_fillers;
use crate::logging::ChunkLogger;
use crate::metrics::{record_chunk_completed, record_chunk_failed};
use crate::transcriber::Transcriber;

/// Detail line added to a job when one of its chunks fails.
pub const CHUNK_FAILED_DETAIL: &str = "Chunk failed (retry or /retry)";

/// What happened to a chunk task.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkOutcome {
    Done {
        chars: usize,
        finalize: Option<FinalizeOutcome>,
    },
    Failed {
        error: String,
        finalize: Option<FinalizeOutcome>,
    },
    /// The job was already COMPLETED; nothing was done.
    Skipped,
}

/// Executes chunk tasks.
pub struct ChunkHandler {
    store: Arc<dyn JobStore>,
    objects: Arc<dyn ObjectStore>,
    extractor: Arc<dyn SegmentExtractor>,
    transcriber: Arc<dyn Transcriber>,
    finalizer: Finalizer,
    work_dir: PathBuf,
}

impl ChunkHandler {
    pub fn new(
        store: Arc<dyn JobStore>,
        objects: Arc<dyn ObjectStore>,
        extractor: Arc<dyn SegmentExtractor>,
        transcriber: Arc<dyn Transcriber>,
        finalizer: Finalizer,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            objects,
            extractor,
            transcriber,
            finalizer,
            work_dir: work_dir.into(),
        }
    }

    pub async fn handle(&self, task: &TranscribeChunkTask) -> WorkerResult<ChunkOutcome> {
        let logger = ChunkLogger::new(task);
        let span = logger.create_span();
        self.handle_logged(task, &logger).instrument(span).await
    }

    async fn handle_logged(
        &self,
        task: &TranscribeChunkTask,
        logger: &ChunkLogger,
    ) -> WorkerResult<ChunkOutcome> {
        let claimed = self
            .store
            .mark_chunk_running(&task.job_id, task.index, task.retry_count)
            .await?;
        if !claimed {
            logger.log_warning("job already completed, skipping duplicate delivery");
            return Ok(ChunkOutcome::Skipped);
        }

        logger.log_start(&format!(
            "{:.3}s-{:.3}s of {}",
            task.start_secs, task.end_secs, task.source_locator
        ));
        let started = Instant::now();
        let deadline = task.deadline();

        let result = match tokio::time::timeout(deadline, self.transcribe_chunk(task, logger)).await {
            Ok(result) => result,
            Err(_) => Err(WorkerError::DeadlineExceeded(deadline.as_secs())),
        };
        let elapsed = started.elapsed().as_secs_f64();

        let outcome = match result {
            Ok(text) => {
                self.store
                    .mark_chunk_done(&task.job_id, task.index, &text)
                    .await?;
                record_chunk_completed(task.duration_secs(), elapsed);
                let chars = text.chars().count();
                logger.log_completion(&format!("{} chars in {:.1}s", chars, elapsed));
                ChunkOutcome::Done {
                    chars,
                    finalize: None,
                }
            }
            Err(e) => {
                let error = e.to_string();
                logger.log_error(&error);
                let reason = if matches!(e, WorkerError::DeadlineExceeded(_)) {
                    "deadline"
                } else {
                    "error"
                };
                record_chunk_failed(reason, elapsed);
                let recorded = self
                    .store
                    .mark_chunk_failed(&task.job_id, task.index, &error, task.retry_count)
                    .await?;
                if recorded {
                    self.store
                        .annotate_job(&task.job_id, CHUNK_FAILED_DETAIL)
                        .await?;
                }
                ChunkOutcome::Failed {
                    error,
                    finalize: None,
                }
            }
        };

        // Finalization failures are recorded on the job by the finalizer.
        let finalize = match self.finalizer.finalize(&task.job_id).await {
            Ok(outcome) => {
                debug!(job_id = %task.job_id, "Finalize attempt: {:?}", outcome);
                Some(outcome)
            }
            Err(e) => {
                logger.log_warning(&format!("finalize failed: {}", e));
                None
            }
        };

        Ok(match outcome {
            ChunkOutcome::Done { chars, .. } => ChunkOutcome::Done { chars, finalize },
            ChunkOutcome::Failed { error, .. } => ChunkOutcome::Failed { error, finalize },
            ChunkOutcome::Skipped => ChunkOutcome::Skipped,
        })
    }

    /// Steps 2-4. The scratch directory is removed when this future
    /// completes or is dropped.
    async fn transcribe_chunk(
        &self,
        task: &TranscribeChunkTask,
        logger: &ChunkLogger,
    ) -> WorkerResult<String> {
        let source = ObjectLocator::parse(&task.source_locator)?;

        tokio::fs::create_dir_all(&self.work_dir).await?;
        let scratch = tempfile::Builder::new()
            .prefix(&format!("{}-{}-", task.job_id, task.index))
            .tempdir_in(&self.work_dir)?;

        let input = scratch.path().join("source");
        let bytes = self.objects.fetch_to_file(&source, &input).await?;
        logger.log_progress(&format!("fetched {} bytes", bytes));

        let segment = scratch.path().join("segment.wav");
        self.extractor
            .extract(&input, &segment, task.start_secs, task.end_secs)
            .await?;

        let raw = self
            .transcriber
            .transcribe(&segment, self.extractor.mime_type())
            .await?;
        Ok(strip_fillers(&raw))
    }
}
