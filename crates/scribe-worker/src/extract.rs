//! Segment extraction seam.

use std::path::Path;

use async_trait::async_trait;

use scribe_media::AudioFormat;

use crate::error::WorkerResult;

/// Cuts `[start, end)` out of a source file into a transcription-ready
/// audio file.
#[async_trait]
pub trait SegmentExtractor: Send + Sync {
    async fn extract(&self, input: &Path, output: &Path, start_secs: f64, end_secs: f64)
        -> WorkerResult<()>;

    fn mime_type(&self) -> &'static str;
}

/// FFmpeg-backed extractor producing mono 16 kHz WAV.
#[derive(Debug, Clone, Default)]
pub struct FfmpegExtractor {
    format: AudioFormat,
}

impl FfmpegExtractor {
    pub fn new(format: AudioFormat) -> Self {
        Self { format }
    }
}

#[async_trait]
impl SegmentExtractor for FfmpegExtractor {
    async fn extract(
        &self,
        input: &Path,
        output: &Path,
        start_secs: f64,
        end_secs: f64,
    ) -> WorkerResult<()> {
        // The task deadline bounds this call; the child is killed on drop.
        scribe_media::extract_segment(input, output, start_secs, end_secs, self.format, None)
            .await?;
        Ok(())
    }

    fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }
}
