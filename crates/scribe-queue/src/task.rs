//! Task types for the queue.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use scribe_models::{Chunk, JobId};

/// Default upper bound on one task's execution, in seconds.
pub const DEFAULT_TASK_DEADLINE_SECS: u64 = 600;

fn default_deadline_secs() -> u64 {
    DEFAULT_TASK_DEADLINE_SECS
}

/// Transcribe one chunk of a job.
///
/// Carries everything a worker needs; no store lookup is required before
/// starting work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscribeChunkTask {
    pub job_id: JobId,
    pub index: u32,
    pub source_locator: String,
    #[serde(rename = "startSec")]
    pub start_secs: f64,
    #[serde(rename = "endSec")]
    pub end_secs: f64,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
    pub dispatched_at: DateTime<Utc>,
}

impl TranscribeChunkTask {
    pub fn new(chunk: &Chunk, source_locator: impl Into<String>) -> Self {
        Self {
            job_id: chunk.job_id.clone(),
            index: chunk.index,
            source_locator: source_locator.into(),
            start_secs: chunk.start_secs,
            end_secs: chunk.end_secs,
            retry_count: chunk.retry_count,
            deadline_secs: DEFAULT_TASK_DEADLINE_SECS,
            dispatched_at: Utc::now(),
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline_secs = deadline.as_secs().max(1);
        self
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }

    pub fn duration_secs(&self) -> f64 {
        self.end_secs - self.start_secs
    }
}

/// Every kind of task the queue carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskKind {
    TranscribeChunk(TranscribeChunkTask),
}

impl TaskKind {
    pub fn job_id(&self) -> &JobId {
        match self {
            TaskKind::TranscribeChunk(t) => &t.job_id,
        }
    }

    /// Stable name used in logs and metrics labels.
    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::TranscribeChunk(_) => "transcribe_chunk",
        }
    }
}

impl From<TranscribeChunkTask> for TaskKind {
    fn from(task: TranscribeChunkTask) -> Self {
        TaskKind::TranscribeChunk(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scribe_models::PlannedChunk;

    fn chunk() -> Chunk {
        let planned = PlannedChunk {
            index: 1,
            start_secs: 598.0,
            end_secs: 1200.0,
        };
        Chunk::pending(JobId::from_string("job-1"), &planned)
    }

    #[test]
    fn transcribe_chunk_wire_shape() {
        let task: TaskKind = TranscribeChunkTask::new(&chunk(), "s3://media/a.mp4").into();
        let json = serde_json::to_value(&task).expect("serialize TaskKind");

        assert_eq!(json["type"], "transcribe_chunk");
        assert_eq!(json["jobId"], "job-1");
        assert_eq!(json["index"], 1);
        assert_eq!(json["sourceLocator"], "s3://media/a.mp4");
        assert_eq!(json["startSec"], 598.0);
        assert_eq!(json["endSec"], 1200.0);
        assert_eq!(json["retryCount"], 0);
        assert_eq!(json["deadlineSecs"], 600);
    }

    #[test]
    fn minimal_payload_uses_defaults() {
        let json = r#"{
            "type": "transcribe_chunk",
            "jobId": "j",
            "index": 0,
            "sourceLocator": "media/a.mp4",
            "startSec": 0,
            "endSec": 12.5,
            "dispatchedAt": "2026-01-01T00:00:00Z"
        }"#;
        let TaskKind::TranscribeChunk(task) =
            serde_json::from_str::<TaskKind>(json).expect("deserialize");
        assert_eq!(task.retry_count, 0);
        assert_eq!(task.deadline(), Duration::from_secs(600));
        assert_eq!(task.duration_secs(), 12.5);
    }

    #[test]
    fn unknown_kind_rejected() {
        let json = r#"{"type": "summarize", "jobId": "j"}"#;
        assert!(serde_json::from_str::<TaskKind>(json).is_err());
    }

    #[test]
    fn deadline_floor() {
        let task = TranscribeChunkTask::new(&chunk(), "x/y").with_deadline(Duration::ZERO);
        assert_eq!(task.deadline_secs, 1);
    }
}
