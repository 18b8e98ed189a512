//! In-process store backend.
//!
//! Holds all state behind one async mutex. A transaction owns that mutex for
//! its whole lifetime and works on a staged copy, so transactions serialize
//! the same way row locks would. Counters for lock acquisitions and committed
//! transcript writes make single-winner finalization observable in tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use scribe_models::{Chunk, ChunkCounts, ChunkStatus, Job, JobId, JobStatus, Transcript};

use crate::{JobStore, RequeueOutcome, StoreError, StoreResult, StoreTx};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    jobs: HashMap<JobId, Job>,
    chunks: HashMap<JobId, BTreeMap<u32, Chunk>>,
    transcripts: HashMap<JobId, Transcript>,
}

impl MemoryState {
    fn chunk_mut(&mut self, job_id: &JobId, index: u32) -> StoreResult<&mut Chunk> {
        self.chunks
            .get_mut(job_id)
            .and_then(|chunks| chunks.get_mut(&index))
            .ok_or_else(|| StoreError::chunk_not_found(job_id.as_str(), index))
    }

    fn chunks_of(&self, job_id: &JobId) -> Vec<Chunk> {
        self.chunks
            .get(job_id)
            .map(|chunks| chunks.values().cloned().collect())
            .unwrap_or_default()
    }

    fn job_completed(&self, job_id: &JobId) -> bool {
        self.jobs
            .get(job_id)
            .map(|job| job.status == JobStatus::Completed)
            .unwrap_or(false)
    }

    fn running_job_mut(&mut self, job_id: &JobId) -> Option<&mut Job> {
        self.jobs
            .get_mut(job_id)
            .filter(|job| job.status == JobStatus::Running)
    }
}

#[derive(Debug, Default)]
struct Counters {
    lock_acquisitions: AtomicU64,
    transcript_writes: AtomicU64,
    pending_conflicts: AtomicU32,
}

/// In-memory [`JobStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryJobStore {
    state: Arc<Mutex<MemoryState>>,
    locks: Arc<Mutex<HashSet<String>>>,
    counters: Arc<Counters>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful named-lock acquisitions so far.
    pub fn lock_acquisitions(&self) -> u64 {
        self.counters.lock_acquisitions.load(Ordering::SeqCst)
    }

    /// Number of transcript upserts that were committed.
    pub fn transcript_writes(&self) -> u64 {
        self.counters.transcript_writes.load(Ordering::SeqCst)
    }

    /// Make the next `n` commits fail with a retryable conflict.
    pub fn inject_commit_conflicts(&self, n: u32) {
        self.counters.pending_conflicts.store(n, Ordering::SeqCst);
    }

    /// Whether the named lock is currently held.
    pub async fn is_locked(&self, key: &str) -> bool {
        self.locks.lock().await.contains(key)
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create_job(&self, job: &Job, chunks: &[Chunk]) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if state.jobs.contains_key(&job.id) {
            return Err(StoreError::AlreadyExists(job.id.to_string()));
        }

        let mut rows = BTreeMap::new();
        for chunk in chunks {
            if chunk.end_secs <= chunk.start_secs || rows.contains_key(&chunk.index) {
                return Err(StoreError::corrupt(format!(
                    "invalid chunk {} for job {}",
                    chunk.index, job.id
                )));
            }
            rows.insert(chunk.index, chunk.clone());
        }

        state.jobs.insert(job.id.clone(), job.clone());
        state.chunks.insert(job.id.clone(), rows);
        Ok(())
    }

    async fn get_job(&self, job_id: &JobId) -> StoreResult<Option<Job>> {
        Ok(self.state.lock().await.jobs.get(job_id).cloned())
    }

    async fn list_chunks(&self, job_id: &JobId) -> StoreResult<Vec<Chunk>> {
        Ok(self.state.lock().await.chunks_of(job_id))
    }

    async fn chunk_counts(&self, job_id: &JobId) -> StoreResult<ChunkCounts> {
        let state = self.state.lock().await;
        Ok(state
            .chunks
            .get(job_id)
            .map(|chunks| chunks.values().map(|c| c.status).collect())
            .unwrap_or_default())
    }

    async fn get_transcript(&self, job_id: &JobId) -> StoreResult<Option<Transcript>> {
        Ok(self.state.lock().await.transcripts.get(job_id).cloned())
    }

    async fn mark_chunk_running(
        &self,
        job_id: &JobId,
        index: u32,
        retry_count: u32,
    ) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        let completed = state.job_completed(job_id);
        let chunk = state.chunk_mut(job_id, index)?;
        if completed {
            return Ok(false);
        }
        chunk.status = ChunkStatus::Running;
        chunk.retry_count = retry_count;
        chunk.updated_at = Utc::now();
        Ok(true)
    }

    async fn mark_chunk_done(&self, job_id: &JobId, index: u32, text: &str) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let chunk = state.chunk_mut(job_id, index)?;
        chunk.status = ChunkStatus::Done;
        chunk.text = Some(text.to_string());
        chunk.error_msg = None;
        chunk.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_chunk_failed(
        &self,
        job_id: &JobId,
        index: u32,
        error: &str,
        retry_count: u32,
    ) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        let completed = state.job_completed(job_id);
        let chunk = state.chunk_mut(job_id, index)?;
        if completed {
            return Ok(false);
        }
        chunk.status = ChunkStatus::Failed;
        chunk.error_msg = Some(error.to_string());
        chunk.retry_count = retry_count;
        chunk.updated_at = Utc::now();
        Ok(true)
    }

    async fn annotate_job(&self, job_id: &JobId, line: &str) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        Ok(match state.running_job_mut(job_id) {
            Some(job) => {
                job.append_detail(line);
                true
            }
            None => false,
        })
    }

    async fn fail_job(&self, job_id: &JobId, line: &str) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        Ok(match state.running_job_mut(job_id) {
            Some(job) => {
                job.status = JobStatus::Failed;
                job.append_detail(line);
                true
            }
            None => false,
        })
    }

    async fn requeue_chunks(
        &self,
        job_id: &JobId,
        note: &str,
    ) -> StoreResult<Option<RequeueOutcome>> {
        let mut state = self.state.lock().await;
        let Some(job_status) = state.jobs.get(job_id).map(|job| job.status) else {
            return Ok(None);
        };

        let now = Utc::now();
        let mut requeued = Vec::new();
        if let Some(chunks) = state.chunks.get_mut(job_id) {
            for chunk in chunks.values_mut().filter(|c| c.status.is_requeueable()) {
                chunk.status = ChunkStatus::Pending;
                chunk.retry_count += 1;
                chunk.error_msg = None;
                chunk.updated_at = now;
                requeued.push(chunk.clone());
            }
        }

        let reopened = !requeued.is_empty() || job_status == JobStatus::Failed;
        if reopened {
            if let Some(job) = state.jobs.get_mut(job_id) {
                job.status = JobStatus::Running;
                job.completed_at = None;
                job.append_detail(note);
            }
        }

        Ok(Some(RequeueOutcome {
            chunks: requeued,
            reopened,
        }))
    }

    async fn try_acquire_lock(&self, key: &str) -> StoreResult<bool> {
        let acquired = self.locks.lock().await.insert(key.to_string());
        if acquired {
            self.counters.lock_acquisitions.fetch_add(1, Ordering::SeqCst);
        }
        Ok(acquired)
    }

    async fn release_lock(&self, key: &str) -> StoreResult<()> {
        self.locks.lock().await.remove(key);
        Ok(())
    }

    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryTx {
            guard,
            staged,
            transcript_writes: 0,
            counters: self.counters.clone(),
        }))
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
    transcript_writes: u64,
    counters: Arc<Counters>,
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn job_for_update(&mut self, job_id: &JobId) -> StoreResult<Option<Job>> {
        Ok(self.staged.jobs.get(job_id).cloned())
    }

    async fn chunks(&mut self, job_id: &JobId) -> StoreResult<Vec<Chunk>> {
        Ok(self.staged.chunks_of(job_id))
    }

    async fn upsert_transcript(&mut self, job_id: &JobId, text: &str) -> StoreResult<Transcript> {
        if !self.staged.jobs.contains_key(job_id) {
            return Err(StoreError::job_not_found(job_id.as_str()));
        }
        let transcript = Transcript {
            job_id: job_id.clone(),
            text: text.to_string(),
            finalized_at: Utc::now(),
        };
        self.staged
            .transcripts
            .insert(job_id.clone(), transcript.clone());
        self.transcript_writes += 1;
        Ok(transcript)
    }

    async fn complete_job(&mut self, job_id: &JobId, line: &str) -> StoreResult<bool> {
        Ok(match self.staged.running_job_mut(job_id) {
            Some(job) => {
                job.status = JobStatus::Completed;
                job.completed_at = Some(Utc::now());
                job.append_detail(line);
                true
            }
            None => false,
        })
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTx {
            mut guard,
            staged,
            transcript_writes,
            counters,
        } = *self;

        let injected = counters
            .pending_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::conflict("could not serialize access (injected)"));
        }

        *guard = staged;
        counters
            .transcript_writes
            .fetch_add(transcript_writes, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scribe_models::ChunkPlan;

    async fn seeded(duration: f64) -> (MemoryJobStore, JobId) {
        let store = MemoryJobStore::new();
        let plan = ChunkPlan::new(duration, 600.0, 2.0).unwrap();
        let job = Job::from_plan(JobId::from_string("job-1"), "s3://media/a.mp3", &plan);
        let chunks: Vec<Chunk> = plan
            .chunks
            .iter()
            .map(|p| Chunk::pending(job.id.clone(), p))
            .collect();
        store.create_job(&job, &chunks).await.unwrap();
        (store, job.id)
    }

    #[tokio::test]
    async fn test_create_and_read() {
        let (store, id) = seeded(1500.0).await;

        let chunks = store.list_chunks(&id).await.unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(store.chunk_counts(&id).await.unwrap().pending, 3);
        assert!(store.get_transcript(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_job_rejected() {
        let (store, id) = seeded(100.0).await;
        let job = store.get_job(&id).await.unwrap().unwrap();
        let err = store.create_job(&job, &[]).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_chunk_transitions() {
        let (store, id) = seeded(1500.0).await;

        assert!(store.mark_chunk_running(&id, 0, 0).await.unwrap());
        store.mark_chunk_done(&id, 0, "hello").await.unwrap();
        store.mark_chunk_done(&id, 0, "hello").await.unwrap();
        store.mark_chunk_failed(&id, 1, "boom", 2).await.unwrap();

        let counts = store.chunk_counts(&id).await.unwrap();
        assert_eq!(counts.done, 1);
        assert_eq!(counts.failed, 1);

        let chunks = store.list_chunks(&id).await.unwrap();
        assert_eq!(chunks[0].text.as_deref(), Some("hello"));
        assert_eq!(chunks[1].retry_count, 2);

        let err = store.mark_chunk_done(&id, 9, "x").await.unwrap_err();
        assert!(matches!(err, StoreError::ChunkNotFound { index: 9, .. }));
    }

    #[tokio::test]
    async fn test_completed_job_chunks_frozen() {
        let (store, id) = seeded(100.0).await;
        store.mark_chunk_done(&id, 0, "text").await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(tx.complete_job(&id, "done").await.unwrap());
        tx.commit().await.unwrap();

        assert!(!store.mark_chunk_running(&id, 0, 1).await.unwrap());
        assert!(!store.mark_chunk_failed(&id, 0, "late", 1).await.unwrap());
        let chunks = store.list_chunks(&id).await.unwrap();
        assert_eq!(chunks[0].status, ChunkStatus::Done);
        assert_eq!(chunks[0].text.as_deref(), Some("text"));
    }

    #[tokio::test]
    async fn test_terminal_job_not_mutated() {
        let (store, id) = seeded(100.0).await;

        assert!(store.fail_job(&id, "first").await.unwrap());
        assert!(!store.fail_job(&id, "second").await.unwrap());
        assert!(!store.annotate_job(&id, "note").await.unwrap());

        let job = store.get_job(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.status_detail.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn test_requeue_leaves_done_chunks() {
        let (store, id) = seeded(1500.0).await;
        store.mark_chunk_done(&id, 0, "a").await.unwrap();
        store.mark_chunk_failed(&id, 1, "boom", 0).await.unwrap();
        store.mark_chunk_done(&id, 2, "c").await.unwrap();
        store.fail_job(&id, "One or more chunks FAILED").await.unwrap();

        let outcome = store.requeue_chunks(&id, "retry").await.unwrap().unwrap();
        assert!(outcome.reopened);
        assert_eq!(outcome.chunks.len(), 1);
        assert_eq!(outcome.chunks[0].index, 1);
        assert_eq!(outcome.chunks[0].retry_count, 1);

        let chunks = store.list_chunks(&id).await.unwrap();
        assert_eq!(chunks[0].text.as_deref(), Some("a"));
        assert_eq!(chunks[2].text.as_deref(), Some("c"));
        assert_eq!(chunks[1].status, ChunkStatus::Pending);
        assert_eq!(
            store.get_job(&id).await.unwrap().unwrap().status,
            JobStatus::Running
        );
    }

    #[tokio::test]
    async fn test_requeue_missing_job() {
        let store = MemoryJobStore::new();
        let outcome = store
            .requeue_chunks(&JobId::from_string("nope"), "retry")
            .await
            .unwrap();
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn test_named_lock() {
        let store = MemoryJobStore::new();
        assert!(store.try_acquire_lock("job-1").await.unwrap());
        assert!(!store.try_acquire_lock("job-1").await.unwrap());
        assert!(store.try_acquire_lock("job-2").await.unwrap());

        store.release_lock("job-1").await.unwrap();
        assert!(store.try_acquire_lock("job-1").await.unwrap());
        assert_eq!(store.lock_acquisitions(), 3);
    }

    #[tokio::test]
    async fn test_tx_commit_and_drop() {
        let (store, id) = seeded(0.0).await;

        {
            let mut tx = store.begin().await.unwrap();
            tx.upsert_transcript(&id, "discarded").await.unwrap();
            // dropped without commit
        }
        assert!(store.get_transcript(&id).await.unwrap().is_none());

        let mut tx = store.begin().await.unwrap();
        tx.upsert_transcript(&id, "kept").await.unwrap();
        assert!(tx.complete_job(&id, "done").await.unwrap());
        tx.commit().await.unwrap();

        assert_eq!(store.transcript_writes(), 1);
        let job = store.get_job(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_injected_conflict() {
        let (store, id) = seeded(0.0).await;
        store.inject_commit_conflicts(1);

        let mut tx = store.begin().await.unwrap();
        tx.complete_job(&id, "done").await.unwrap();
        let err = tx.commit().await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(
            store.get_job(&id).await.unwrap().unwrap().status,
            JobStatus::Running
        );
    }
}
