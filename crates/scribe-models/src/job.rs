//! Job definitions.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::ChunkPlan;

/// Unique identifier for a transcription job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error returned when a persisted status string is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} status: {value}")]
pub struct ParseStatusError {
    pub kind: &'static str,
    pub value: String,
}

/// Job lifecycle status.
///
/// `Completed` and `Failed` are terminal; only an explicit retry moves a job
/// back to `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    #[default]
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RUNNING" => Ok(JobStatus::Running),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            other => Err(ParseStatusError {
                kind: "job",
                value: other.to_string(),
            }),
        }
    }
}

/// One end-to-end transcription request over a single media source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,

    /// Object-store locator of the source media
    pub source_locator: String,

    /// Total media duration in seconds
    pub duration_secs: f64,

    /// Slice length used by the planner
    pub slice_secs: f64,

    /// Backward overlap applied to every chunk after the first
    pub overlap_secs: f64,

    /// Number of chunks planned for this job
    pub total_chunks: u32,

    pub status: JobStatus,

    /// Free-form, human-readable trail of what happened to the job
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_detail: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Build a freshly submitted job from its chunk plan.
    pub fn from_plan(id: JobId, source_locator: impl Into<String>, plan: &ChunkPlan) -> Self {
        let now = Utc::now();
        Self {
            id,
            source_locator: source_locator.into(),
            duration_secs: plan.duration_secs,
            slice_secs: plan.slice_secs,
            overlap_secs: plan.overlap_secs,
            total_chunks: plan.len() as u32,
            status: JobStatus::Running,
            status_detail: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Append a line to the status detail trail.
    pub fn append_detail(&mut self, line: &str) {
        self.status_detail = Some(match self.status_detail.take() {
            Some(existing) if !existing.is_empty() => format!("{}\n{}", existing, line),
            _ => line.to_string(),
        });
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_roundtrip() {
        let id = JobId::from_string("job-1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"job-1\"");
        assert_eq!(id.to_string(), "job-1");
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(JobStatus::Running.as_str(), "RUNNING");
        assert_eq!("COMPLETED".parse::<JobStatus>().unwrap(), JobStatus::Completed);
        assert!("DONE".parse::<JobStatus>().is_err());
        assert_eq!(
            serde_json::to_string(&JobStatus::Failed).unwrap(),
            "\"FAILED\""
        );
    }

    #[test]
    fn test_terminal_states() {
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_from_plan() {
        let plan = ChunkPlan::new(1500.0, 600.0, 2.0).unwrap();
        let job = Job::from_plan(JobId::from_string("j"), "s3://media/in.mp4", &plan);

        assert_eq!(job.total_chunks, 3);
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.completed_at.is_none());
    }

    #[test]
    fn test_append_detail() {
        let plan = ChunkPlan::new(0.0, 600.0, 2.0).unwrap();
        let mut job = Job::from_plan(JobId::new(), "s3://media/in.mp4", &plan);

        job.append_detail("first");
        job.append_detail("second");
        assert_eq!(job.status_detail.as_deref(), Some("first\nsecond"));
    }
}
