//! PostgreSQL store backend.
//!
//! Every operation runs under the configured [`RetryPolicy`], so serialization
//! failures and deadlocks are retried with linear backoff before surfacing.
//! Named locks are session-level advisory locks; the connection that took a
//! lock is parked until the lock is released.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use scribe_models::{Chunk, ChunkCounts, ChunkStatus, Job, JobId, JobStatus, Transcript};

use crate::metrics::record_query;
use crate::{JobStore, RequeueOutcome, RetryPolicy, StoreConfig, StoreError, StoreResult, StoreTx};

const JOB_COLUMNS: &str = "id, source_locator, duration_secs, slice_secs, overlap_secs, \
     total_chunks, status, status_detail, created_at, updated_at, completed_at";

const CHUNK_COLUMNS: &str =
    "job_id, idx, start_secs, end_secs, status, retry_count, text, error_msg, created_at, updated_at";

/// Appends `$2` as a new line of `status_detail`.
const APPEND_DETAIL: &str = "status_detail = CONCAT_WS(E'\\n', NULLIF(status_detail, ''), $2::text)";

const UNIQUE_VIOLATION: &str = "23505";

#[derive(sqlx::FromRow)]
struct JobRow {
    id: String,
    source_locator: String,
    duration_secs: f64,
    slice_secs: f64,
    overlap_secs: f64,
    total_chunks: i32,
    status: String,
    status_detail: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(Job {
            status: row
                .status
                .parse()
                .map_err(|e| StoreError::corrupt(format!("job {}: {}", row.id, e)))?,
            id: JobId::from_string(row.id),
            source_locator: row.source_locator,
            duration_secs: row.duration_secs,
            slice_secs: row.slice_secs,
            overlap_secs: row.overlap_secs,
            total_chunks: u32::try_from(row.total_chunks).unwrap_or_default(),
            status_detail: row.status_detail,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ChunkRow {
    job_id: String,
    idx: i32,
    start_secs: f64,
    end_secs: f64,
    status: String,
    retry_count: i32,
    text: Option<String>,
    error_msg: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ChunkRow> for Chunk {
    type Error = StoreError;

    fn try_from(row: ChunkRow) -> Result<Self, Self::Error> {
        let index = u32::try_from(row.idx)
            .map_err(|_| StoreError::corrupt(format!("chunk {} has index {}", row.job_id, row.idx)))?;
        Ok(Chunk {
            status: row
                .status
                .parse()
                .map_err(|e| StoreError::corrupt(format!("chunk {}#{}: {}", row.job_id, index, e)))?,
            job_id: JobId::from_string(row.job_id),
            index,
            start_secs: row.start_secs,
            end_secs: row.end_secs,
            retry_count: u32::try_from(row.retry_count).unwrap_or_default(),
            text: row.text,
            error_msg: row.error_msg,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TranscriptRow {
    job_id: String,
    text: String,
    finalized_at: DateTime<Utc>,
}

impl From<TranscriptRow> for Transcript {
    fn from(row: TranscriptRow) -> Self {
        Transcript {
            job_id: JobId::from_string(row.job_id),
            text: row.text,
            finalized_at: row.finalized_at,
        }
    }
}

fn into_chunks(rows: Vec<ChunkRow>) -> StoreResult<Vec<Chunk>> {
    let mut chunks = rows
        .into_iter()
        .map(Chunk::try_from)
        .collect::<StoreResult<Vec<_>>>()?;
    chunks.sort_by_key(|c| c.index);
    Ok(chunks)
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION))
}

/// PostgreSQL-backed [`JobStore`].
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
    policy: RetryPolicy,
    /// Held named locks. `None` marks an acquisition still in flight.
    locks: Arc<Mutex<HashMap<String, Option<PoolConnection<Postgres>>>>>,
}

impl PgJobStore {
    /// Wrap an existing pool.
    pub fn new(pool: PgPool, policy: RetryPolicy) -> Self {
        Self {
            pool,
            policy,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Open a connection pool from configuration.
    pub async fn connect(config: &StoreConfig) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .connect(&config.database_url)
            .await?;

        info!(max_connections = config.max_connections, "Connected to PostgreSQL");
        Ok(Self::new(pool, config.retry_policy()))
    }

    /// Create from environment variables.
    pub async fn from_env() -> StoreResult<Self> {
        Self::connect(&StoreConfig::from_env()).await
    }

    /// Apply embedded schema migrations.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Store migrations applied");
        Ok(())
    }

    async fn retrying<T, F, Fut>(&self, operation: &str, op: F) -> StoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let started = Instant::now();
        let result = self.policy.run(operation, StoreError::is_retryable, op).await;
        record_query(
            operation,
            result.is_ok(),
            started.elapsed().as_secs_f64() * 1000.0,
        );
        result
    }

    async fn create_job_once(&self, job: &Job, chunks: &[Chunk]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO jobs (
                id, source_locator, duration_secs, slice_secs, overlap_secs,
                total_chunks, status, status_detail, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(job.id.as_str())
        .bind(&job.source_locator)
        .bind(job.duration_secs)
        .bind(job.slice_secs)
        .bind(job.overlap_secs)
        .bind(job.total_chunks as i32)
        .bind(job.status.as_str())
        .bind(&job.status_detail)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&mut *tx)
        .await;

        if let Err(e) = inserted {
            return Err(if is_unique_violation(&e) {
                StoreError::AlreadyExists(job.id.to_string())
            } else {
                e.into()
            });
        }

        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks (
                    job_id, idx, start_secs, end_secs, status, retry_count, created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(job.id.as_str())
            .bind(chunk.index as i32)
            .bind(chunk.start_secs)
            .bind(chunk.end_secs)
            .bind(chunk.status.as_str())
            .bind(chunk.retry_count as i32)
            .bind(chunk.created_at)
            .bind(chunk.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Apply a chunk update. Returns false when the chunk exists but the
    /// write was refused because the job is COMPLETED.
    ///
    /// With `freeze_guard` the job row is share-locked first, so the write
    /// waits for an in-flight finalizer and then observes its outcome.
    async fn update_chunk(
        &self,
        job_id: &JobId,
        index: u32,
        sql: &str,
        binds: ChunkUpdate<'_>,
        freeze_guard: bool,
    ) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;

        if freeze_guard {
            let status: Option<String> =
                sqlx::query_scalar("SELECT status FROM jobs WHERE id = $1 FOR SHARE")
                    .bind(job_id.as_str())
                    .fetch_optional(&mut *tx)
                    .await?;
            if status.as_deref() == Some(JobStatus::Completed.as_str()) {
                let exists = chunk_exists(&mut tx, job_id, index).await?;
                tx.rollback().await?;
                return if exists {
                    Ok(false)
                } else {
                    Err(StoreError::chunk_not_found(job_id.as_str(), index))
                };
            }
        }

        let query = sqlx::query(sql).bind(job_id.as_str()).bind(index as i32);
        let query = match binds {
            ChunkUpdate::Running { retry_count } => query.bind(retry_count as i32),
            ChunkUpdate::Done { text } => query.bind(text),
            ChunkUpdate::Failed { error, retry_count } => query.bind(error).bind(retry_count as i32),
        };

        let result = query.execute(&mut *tx).await?;
        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StoreError::chunk_not_found(job_id.as_str(), index));
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn requeue_once(&self, job_id: &JobId, note: &str) -> StoreResult<Option<RequeueOutcome>> {
        let mut tx = self.pool.begin().await?;

        let status: Option<String> = sqlx::query_scalar("SELECT status FROM jobs WHERE id = $1 FOR UPDATE")
            .bind(job_id.as_str())
            .fetch_optional(&mut *tx)
            .await?;
        let Some(status) = status else {
            return Ok(None);
        };
        let status: JobStatus = status
            .parse()
            .map_err(|e| StoreError::corrupt(format!("job {}: {}", job_id, e)))?;

        let rows = sqlx::query_as::<_, ChunkRow>(&format!(
            r#"
            UPDATE chunks
            SET status = 'PENDING', retry_count = retry_count + 1, error_msg = NULL, updated_at = now()
            WHERE job_id = $1 AND status IN ('FAILED', 'PENDING')
            RETURNING {}
            "#,
            CHUNK_COLUMNS
        ))
        .bind(job_id.as_str())
        .fetch_all(&mut *tx)
        .await?;
        let chunks = into_chunks(rows)?;

        let reopened = !chunks.is_empty() || status == JobStatus::Failed;
        if reopened {
            sqlx::query(&format!(
                "UPDATE jobs SET status = 'RUNNING', completed_at = NULL, updated_at = now(), {} WHERE id = $1",
                APPEND_DETAIL
            ))
            .bind(job_id.as_str())
            .bind(note)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(Some(RequeueOutcome { chunks, reopened }))
    }

    async fn update_running_job(&self, job_id: &JobId, set: &str, line: &str) -> StoreResult<bool> {
        let result = sqlx::query(&format!(
            "UPDATE jobs SET {}updated_at = now(), {} WHERE id = $1 AND status = 'RUNNING'",
            set, APPEND_DETAIL
        ))
        .bind(job_id.as_str())
        .bind(line)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

enum ChunkUpdate<'a> {
    Running { retry_count: u32 },
    Done { text: &'a str },
    Failed { error: &'a str, retry_count: u32 },
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create_job(&self, job: &Job, chunks: &[Chunk]) -> StoreResult<()> {
        self.retrying("create_job", move || self.create_job_once(job, chunks))
            .await?;
        debug!(job_id = %job.id, chunks = chunks.len(), "Created job");
        Ok(())
    }

    async fn get_job(&self, job_id: &JobId) -> StoreResult<Option<Job>> {
        self.retrying("get_job", move || async move {
            sqlx::query_as::<_, JobRow>(&format!("SELECT {} FROM jobs WHERE id = $1", JOB_COLUMNS))
                .bind(job_id.as_str())
                .fetch_optional(&self.pool)
                .await?
                .map(Job::try_from)
                .transpose()
        })
        .await
    }

    async fn list_chunks(&self, job_id: &JobId) -> StoreResult<Vec<Chunk>> {
        self.retrying("list_chunks", move || async move {
            let rows = sqlx::query_as::<_, ChunkRow>(&format!(
                "SELECT {} FROM chunks WHERE job_id = $1 ORDER BY idx",
                CHUNK_COLUMNS
            ))
            .bind(job_id.as_str())
            .fetch_all(&self.pool)
            .await?;
            into_chunks(rows)
        })
        .await
    }

    async fn chunk_counts(&self, job_id: &JobId) -> StoreResult<ChunkCounts> {
        self.retrying("chunk_counts", move || async move {
            let rows: Vec<(String, i64)> = sqlx::query_as(
                "SELECT status, COUNT(*) FROM chunks WHERE job_id = $1 GROUP BY status",
            )
            .bind(job_id.as_str())
            .fetch_all(&self.pool)
            .await?;

            let mut counts = ChunkCounts::default();
            for (status, n) in rows {
                let n = u32::try_from(n).unwrap_or(u32::MAX);
                let status = status
                    .parse::<ChunkStatus>()
                    .map_err(|e| StoreError::corrupt(e.to_string()))?;
                match status {
                    ChunkStatus::Pending => counts.pending = n,
                    ChunkStatus::Running => counts.running = n,
                    ChunkStatus::Done => counts.done = n,
                    ChunkStatus::Failed => counts.failed = n,
                }
            }
            Ok(counts)
        })
        .await
    }

    async fn get_transcript(&self, job_id: &JobId) -> StoreResult<Option<Transcript>> {
        self.retrying("get_transcript", move || async move {
            Ok(sqlx::query_as::<_, TranscriptRow>(
                "SELECT job_id, text, finalized_at FROM transcripts WHERE job_id = $1",
            )
            .bind(job_id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .map(Transcript::from))
        })
        .await
    }

    async fn mark_chunk_running(
        &self,
        job_id: &JobId,
        index: u32,
        retry_count: u32,
    ) -> StoreResult<bool> {
        self.retrying("mark_chunk_running", move || {
            self.update_chunk(
                job_id,
                index,
                "UPDATE chunks SET status = 'RUNNING', retry_count = $3, updated_at = now() \
                 WHERE job_id = $1 AND idx = $2",
                ChunkUpdate::Running { retry_count },
                true,
            )
        })
        .await
    }

    async fn mark_chunk_done(&self, job_id: &JobId, index: u32, text: &str) -> StoreResult<()> {
        self.retrying("mark_chunk_done", move || async move {
            self.update_chunk(
                job_id,
                index,
                "UPDATE chunks SET status = 'DONE', text = $3, error_msg = NULL, updated_at = now() \
                 WHERE job_id = $1 AND idx = $2",
                ChunkUpdate::Done { text },
                false,
            )
            .await
            .map(|_| ())
        })
        .await
    }

    async fn mark_chunk_failed(
        &self,
        job_id: &JobId,
        index: u32,
        error: &str,
        retry_count: u32,
    ) -> StoreResult<bool> {
        self.retrying("mark_chunk_failed", move || {
            self.update_chunk(
                job_id,
                index,
                "UPDATE chunks SET status = 'FAILED', error_msg = $3, retry_count = $4, \
                 updated_at = now() WHERE job_id = $1 AND idx = $2",
                ChunkUpdate::Failed { error, retry_count },
                true,
            )
        })
        .await
    }

    async fn annotate_job(&self, job_id: &JobId, line: &str) -> StoreResult<bool> {
        self.retrying("annotate_job", move || self.update_running_job(job_id, "", line))
            .await
    }

    async fn fail_job(&self, job_id: &JobId, line: &str) -> StoreResult<bool> {
        self.retrying("fail_job", move || {
            self.update_running_job(job_id, "status = 'FAILED', ", line)
        })
        .await
    }

    async fn requeue_chunks(
        &self,
        job_id: &JobId,
        note: &str,
    ) -> StoreResult<Option<RequeueOutcome>> {
        self.retrying("requeue_chunks", move || self.requeue_once(job_id, note))
            .await
    }

    async fn try_acquire_lock(&self, key: &str) -> StoreResult<bool> {
        {
            let mut locks = self.locks.lock().await;
            if locks.contains_key(key) {
                return Ok(false);
            }
            // Reserve the key so the database round-trip runs unlocked
            locks.insert(key.to_string(), None);
        }

        let attempt = async {
            let mut conn = self.pool.acquire().await?;
            let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock(hashtext($1))")
                .bind(key)
                .fetch_one(&mut *conn)
                .await?;
            StoreResult::Ok(acquired.then_some(conn))
        }
        .await;

        let mut locks = self.locks.lock().await;
        match attempt {
            Ok(Some(conn)) => {
                locks.insert(key.to_string(), Some(conn));
                Ok(true)
            }
            Ok(None) => {
                locks.remove(key);
                Ok(false)
            }
            Err(e) => {
                locks.remove(key);
                Err(e)
            }
        }
    }

    async fn release_lock(&self, key: &str) -> StoreResult<()> {
        let Some(Some(mut conn)) = self.locks.lock().await.remove(key) else {
            return Ok(());
        };

        let released = sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock(hashtext($1))")
            .bind(key)
            .fetch_one(&mut *conn)
            .await;

        match released {
            Ok(true) => Ok(()),
            Ok(false) => {
                warn!(key = %key, "Advisory lock was not held by this session");
                Ok(())
            }
            Err(e) => {
                // Closing the session drops any advisory locks it still holds.
                drop(conn.detach());
                Err(e.into())
            }
        }
    }

    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

async fn chunk_exists(
    tx: &mut Transaction<'static, Postgres>,
    job_id: &JobId,
    index: u32,
) -> StoreResult<bool> {
    Ok(
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM chunks WHERE job_id = $1 AND idx = $2)")
            .bind(job_id.as_str())
            .bind(index as i32)
            .fetch_one(&mut **tx)
            .await?,
    )
}

struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn job_for_update(&mut self, job_id: &JobId) -> StoreResult<Option<Job>> {
        sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM jobs WHERE id = $1 FOR UPDATE",
            JOB_COLUMNS
        ))
        .bind(job_id.as_str())
        .fetch_optional(&mut *self.tx)
        .await?
        .map(Job::try_from)
        .transpose()
    }

    async fn chunks(&mut self, job_id: &JobId) -> StoreResult<Vec<Chunk>> {
        let rows = sqlx::query_as::<_, ChunkRow>(&format!(
            "SELECT {} FROM chunks WHERE job_id = $1 ORDER BY idx",
            CHUNK_COLUMNS
        ))
        .bind(job_id.as_str())
        .fetch_all(&mut *self.tx)
        .await?;
        into_chunks(rows)
    }

    async fn upsert_transcript(&mut self, job_id: &JobId, text: &str) -> StoreResult<Transcript> {
        let row = sqlx::query_as::<_, TranscriptRow>(
            r#"
            INSERT INTO transcripts (job_id, text, finalized_at)
            VALUES ($1, $2, now())
            ON CONFLICT (job_id)
            DO UPDATE SET text = EXCLUDED.text, finalized_at = EXCLUDED.finalized_at, updated_at = now()
            RETURNING job_id, text, finalized_at
            "#,
        )
        .bind(job_id.as_str())
        .bind(text)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row.into())
    }

    async fn complete_job(&mut self, job_id: &JobId, line: &str) -> StoreResult<bool> {
        let result = sqlx::query(&format!(
            "UPDATE jobs SET status = 'COMPLETED', completed_at = now(), updated_at = now(), {} \
             WHERE id = $1 AND status = 'RUNNING'",
            APPEND_DETAIL
        ))
        .bind(job_id.as_str())
        .bind(line)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
