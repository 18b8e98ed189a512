//! Orchestration of chunked transcription jobs.
//!
//! This crate ties the store, object storage and task transport together:
//! - [`JobSubmitter`]: plan a source into chunks, persist and dispatch them
//! - [`Finalizer`]: assemble and publish a transcript exactly once
//! - [`RetryCoordinator`]: requeue unfinished chunks and re-dispatch them
//! - [`ChunkDispatcher`]: build and hand off one chunk task

pub mod dispatch;
pub mod error;
pub mod finalizer;
pub mod metrics;
pub mod probe;
pub mod retry;
pub mod submit;

pub use dispatch::ChunkDispatcher;
pub use error::{OrchestratorError, OrchestratorResult};
pub use finalizer::{FinalizeOutcome, Finalizer, TranscriptSink, FAILED_CHUNKS_DETAIL};
pub use probe::{DurationProbe, FfprobeDurationProbe};
pub use retry::{RetryCoordinator, RetryOutcome};
pub use submit::{JobSubmitter, SubmitOutcome, SubmitRequest};
