//! Speech-to-text abstraction.

use std::path::Path;

use async_trait::async_trait;

use crate::error::WorkerResult;

/// Turns one extracted audio segment into text.
///
/// Implementations return the raw transcript; an empty result is an error.
/// Callers bound the call with the task deadline, so implementations must be
/// cancel-safe (dropping the future aborts any in-flight request).
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &Path, mime_type: &str) -> WorkerResult<String>;
}
