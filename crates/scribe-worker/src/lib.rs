//! Chunk transcription worker.
//!
//! This crate provides:
//! - [`ChunkHandler`]: executes one chunk task end to end, then tries to
//!   finalize the job
//! - [`Transcriber`] and the streaming Gemini implementation
//! - [`SegmentExtractor`] and the FFmpeg implementation
//! - [`TaskExecutor`]: the Redis Streams consume/claim loop with graceful
//!   shutdown

pub mod config;
pub mod error;
pub mod executor;
pub mod extract;
pub mod filler;
pub mod gemini;
pub mod handler;
pub mod logging;
pub mod metrics;
pub mod transcriber;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::{settle, Settlement, TaskExecutor};
pub use extract::{FfmpegExtractor, SegmentExtractor};
pub use filler::strip_fillers;
pub use gemini::{GeminiConfig, GeminiTranscriber};
pub use handler::{ChunkHandler, ChunkOutcome};
pub use logging::ChunkLogger;
pub use transcriber::Transcriber;
