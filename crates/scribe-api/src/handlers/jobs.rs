//! Job handlers.
//!
//! Provides REST API endpoints for:
//! - Submitting a source for transcription
//! - Polling job status and per-chunk progress
//! - Fetching the finalized transcript
//! - Retrying failed or stuck chunks

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use scribe_models::{Chunk, ChunkCounts, ChunkStatus, Job, JobId, JobStatus};
use scribe_orchestrator::SubmitRequest;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

// ============================================================================
// Types
// ============================================================================

/// Response to a submission.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobResponse {
    pub job_id: JobId,
    pub status: JobStatus,
    pub total_chunks: u32,
    /// Chunk tasks the transport accepted
    pub dispatched: u32,
}

/// Job status response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    pub job_id: JobId,
    pub source_locator: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_detail: Option<String>,
    pub duration_secs: f64,
    pub total_chunks: u32,
    /// Chunk counts per status
    pub chunks: ChunkCounts,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobStatusResponse {
    fn new(job: Job, chunks: ChunkCounts) -> Self {
        Self {
            job_id: job.id,
            source_locator: job.source_locator,
            status: job.status,
            status_detail: job.status_detail,
            duration_secs: job.duration_secs,
            total_chunks: job.total_chunks,
            chunks,
            created_at: job.created_at,
            updated_at: job.updated_at,
            completed_at: job.completed_at,
        }
    }
}

/// One row of the chunk listing. Texts are left out; fetch the transcript.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkView {
    pub index: u32,
    pub start_secs: f64,
    pub end_secs: f64,
    pub status: ChunkStatus,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<Chunk> for ChunkView {
    fn from(chunk: Chunk) -> Self {
        Self {
            index: chunk.index,
            start_secs: chunk.start_secs,
            end_secs: chunk.end_secs,
            status: chunk.status,
            retry_count: chunk.retry_count,
            error: chunk.error_msg,
            updated_at: chunk.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptResponse {
    pub job_id: JobId,
    pub text: String,
    pub finalized_at: DateTime<Utc>,
    /// Object-store copy of the transcript
    pub location: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryJobResponse {
    pub job_id: JobId,
    pub requeued: u32,
    pub dispatched: u32,
    pub status: JobStatus,
}

// ============================================================================
// Handlers
// ============================================================================

/// Submit a source for transcription.
///
/// POST /api/jobs
pub async fn submit_job(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> ApiResult<(StatusCode, Json<SubmitJobResponse>)> {
    let outcome = state.submitter.submit(request).await?;

    // Zero-chunk jobs are finalized during submission
    let status = match &outcome.finalized {
        Some(f) if f.is_completed() => JobStatus::Completed,
        _ => outcome.job.status,
    };

    info!(
        job_id = %outcome.job.id,
        total_chunks = outcome.job.total_chunks,
        dispatched = outcome.dispatched,
        "Accepted job"
    );

    Ok((
        StatusCode::CREATED,
        Json(SubmitJobResponse {
            job_id: outcome.job.id,
            status,
            total_chunks: outcome.job.total_chunks,
            dispatched: outcome.dispatched,
        }),
    ))
}

/// Get job status with per-status chunk counts.
///
/// GET /api/jobs/:job_id
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobStatusResponse>> {
    let job_id = JobId::from_string(job_id);
    let job = load_job(&state, &job_id).await?;
    let counts = state.store.chunk_counts(&job_id).await?;
    Ok(Json(JobStatusResponse::new(job, counts)))
}

/// List a job's chunks in index order.
///
/// GET /api/jobs/:job_id/chunks
pub async fn list_chunks(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<Vec<ChunkView>>> {
    let job_id = JobId::from_string(job_id);
    load_job(&state, &job_id).await?;
    let chunks = state.store.list_chunks(&job_id).await?;
    Ok(Json(chunks.into_iter().map(ChunkView::from).collect()))
}

/// Fetch the transcript of a COMPLETED job.
///
/// GET /api/jobs/:job_id/transcript
pub async fn get_transcript(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<TranscriptResponse>> {
    let job_id = JobId::from_string(job_id);
    let job = load_job(&state, &job_id).await?;
    if job.status != JobStatus::Completed {
        return Err(ApiError::not_found(format!(
            "transcript for job {} (job is {})",
            job_id, job.status
        )));
    }

    let transcript = state
        .store
        .get_transcript(&job_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("transcript for job {}", job_id)))?;

    Ok(Json(TranscriptResponse {
        location: state.sink.locator(&job_id).to_string(),
        job_id: transcript.job_id,
        text: transcript.text,
        finalized_at: transcript.finalized_at,
    }))
}

/// Requeue and re-dispatch a job's unfinished chunks.
///
/// POST /api/jobs/:job_id/retry
pub async fn retry_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<RetryJobResponse>> {
    let job_id = JobId::from_string(job_id);
    let outcome = state.retry.retry(&job_id).await?;
    let job = load_job(&state, &job_id).await?;

    Ok(Json(RetryJobResponse {
        job_id,
        requeued: outcome.requeued,
        dispatched: outcome.dispatched,
        status: job.status,
    }))
}

async fn load_job(state: &AppState, job_id: &JobId) -> ApiResult<Job> {
    state
        .store
        .get_job(job_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("job {}", job_id)))
}
