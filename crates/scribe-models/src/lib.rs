//! Shared data models for the Scribe transcription backend.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs and their lifecycle status
//! - Chunks (time-sliced units of transcription work)
//! - Assembled transcripts
//! - The chunk planner that turns a media duration into chunk boundaries

pub mod chunk;
pub mod job;
pub mod plan;
pub mod transcript;

// Re-export common types
pub use chunk::{Chunk, ChunkCounts, ChunkStatus};
pub use job::{Job, JobId, JobStatus, ParseStatusError};
pub use plan::{
    plan_chunks, ChunkPlan, PlanError, PlannedChunk, DEFAULT_OVERLAP_SECS, DEFAULT_SLICE_SECS,
};
pub use transcript::{assemble_transcript, Transcript};
