//! FFmpeg CLI wrappers for the transcription pipeline.
//!
//! This crate provides:
//! - A small FFmpeg command builder and runner with timeout
//! - Audio segment extraction to the normalized transcription format
//! - Duration probing via FFprobe

pub mod audio;
pub mod command;
pub mod error;
pub mod probe;

pub use audio::{extract_segment, AudioFormat};
pub use command::{FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use probe::{probe_duration, probe_duration_or_zero};
