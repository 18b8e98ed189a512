//! Worker metrics.

use metrics::{counter, histogram};

pub mod names {
    pub const CHUNKS_COMPLETED: &str = "scribe_chunks_completed_total";
    pub const CHUNKS_FAILED: &str = "scribe_chunks_failed_total";
    pub const CHUNK_DURATION: &str = "scribe_chunk_duration_seconds";
    pub const TRANSCRIBED_AUDIO: &str = "scribe_transcribed_audio_seconds_total";
}

pub fn record_chunk_completed(audio_secs: f64, elapsed_secs: f64) {
    counter!(names::CHUNKS_COMPLETED).increment(1);
    histogram!(names::CHUNK_DURATION, "outcome" => "done").record(elapsed_secs);
    counter!(names::TRANSCRIBED_AUDIO).increment(audio_secs.max(0.0).round() as u64);
}

/// `reason` is a short label such as `deadline` or `error`.
pub fn record_chunk_failed(reason: &'static str, elapsed_secs: f64) {
    counter!(names::CHUNKS_FAILED, "reason" => reason).increment(1);
    histogram!(names::CHUNK_DURATION, "outcome" => "failed").record(elapsed_secs);
}
