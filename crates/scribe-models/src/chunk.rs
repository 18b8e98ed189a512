//! Chunk definitions.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{JobId, ParseStatusError, PlannedChunk};

/// Per-chunk processing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChunkStatus {
    /// Waiting for a worker
    #[default]
    Pending,
    /// A worker has picked it up
    Running,
    /// Transcribed; text is set
    Done,
    /// Failed; error_msg is set
    Failed,
}

impl ChunkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkStatus::Pending => "PENDING",
            ChunkStatus::Running => "RUNNING",
            ChunkStatus::Done => "DONE",
            ChunkStatus::Failed => "FAILED",
        }
    }

    /// Whether the retry path may reset a chunk in this status.
    pub fn is_requeueable(&self) -> bool {
        matches!(self, ChunkStatus::Pending | ChunkStatus::Failed)
    }
}

impl fmt::Display for ChunkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ChunkStatus::Pending),
            "RUNNING" => Ok(ChunkStatus::Running),
            "DONE" => Ok(ChunkStatus::Done),
            "FAILED" => Ok(ChunkStatus::Failed),
            other => Err(ParseStatusError {
                kind: "chunk",
                value: other.to_string(),
            }),
        }
    }
}

/// One time-sliced unit of transcription work, identified by (job id, index).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Chunk {
    pub job_id: JobId,
    pub index: u32,
    pub start_secs: f64,
    pub end_secs: f64,
    pub status: ChunkStatus,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Chunk {
    /// A new PENDING chunk for a planned slice.
    pub fn pending(job_id: JobId, planned: &PlannedChunk) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            index: planned.index,
            start_secs: planned.start_secs,
            end_secs: planned.end_secs,
            status: ChunkStatus::Pending,
            retry_count: 0,
            text: None,
            error_msg: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Number of chunks of a job in each status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub struct ChunkCounts {
    pub pending: u32,
    pub running: u32,
    pub done: u32,
    pub failed: u32,
}

impl ChunkCounts {
    pub fn add(&mut self, status: ChunkStatus) {
        match status {
            ChunkStatus::Pending => self.pending += 1,
            ChunkStatus::Running => self.running += 1,
            ChunkStatus::Done => self.done += 1,
            ChunkStatus::Failed => self.failed += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.pending + self.running + self.done + self.failed
    }

    pub fn not_done(&self) -> u32 {
        self.total() - self.done
    }

    pub fn all_done(&self) -> bool {
        self.not_done() == 0
    }
}

impl FromIterator<ChunkStatus> for ChunkCounts {
    fn from_iter<I: IntoIterator<Item = ChunkStatus>>(iter: I) -> Self {
        let mut counts = ChunkCounts::default();
        for status in iter {
            counts.add(status);
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_chunk() {
        let planned = PlannedChunk {
            index: 1,
            start_secs: 598.0,
            end_secs: 1200.0,
        };
        let chunk = Chunk::pending(JobId::from_string("j"), &planned);
        assert_eq!(chunk.status, ChunkStatus::Pending);
        assert_eq!(chunk.index, 1);
        assert!(chunk.text.is_none());
    }

    #[test]
    fn test_counts() {
        let counts: ChunkCounts = [
            ChunkStatus::Done,
            ChunkStatus::Done,
            ChunkStatus::Failed,
            ChunkStatus::Running,
        ]
        .into_iter()
        .collect();

        assert_eq!(counts.total(), 4);
        assert_eq!(counts.not_done(), 2);
        assert_eq!(counts.failed, 1);
        assert!(!counts.all_done());
        assert!(ChunkCounts::default().all_done());
    }

    #[test]
    fn test_requeueable() {
        assert!(ChunkStatus::Failed.is_requeueable());
        assert!(ChunkStatus::Pending.is_requeueable());
        assert!(!ChunkStatus::Done.is_requeueable());
        assert!(!ChunkStatus::Running.is_requeueable());
        assert_eq!("DONE".parse::<ChunkStatus>().unwrap(), ChunkStatus::Done);
    }
}
