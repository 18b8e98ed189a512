//! Audio segment extraction.

use std::path::Path;
use std::time::Duration;

use tracing::debug;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};

/// Target format for transcription input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub channels: u8,
    pub sample_rate: u32,
}

impl Default for AudioFormat {
    /// Mono 16 kHz PCM WAV.
    fn default() -> Self {
        Self {
            channels: 1,
            sample_rate: 16_000,
        }
    }
}

impl AudioFormat {
    pub fn mime_type(&self) -> &'static str {
        "audio/wav"
    }
}

/// Build the command that cuts `[start, end)` out of `input` as WAV.
pub fn segment_command(
    input: &Path,
    output: &Path,
    start_secs: f64,
    end_secs: f64,
    format: AudioFormat,
) -> MediaResult<FfmpegCommand> {
    if !(start_secs.is_finite() && end_secs.is_finite()) || start_secs < 0.0 || end_secs <= start_secs
    {
        return Err(MediaError::invalid_segment(format!(
            "[{}, {}) is not a valid segment",
            start_secs, end_secs
        )));
    }

    Ok(FfmpegCommand::new(input, output)
        .seek(start_secs)
        .duration(end_secs - start_secs)
        .no_video()
        .audio_channels(format.channels)
        .audio_sample_rate(format.sample_rate)
        .format("wav"))
}

/// Extract `[start, end)` of `input` into `output`, downmixed and resampled
/// to `format`.
pub async fn extract_segment(
    input: &Path,
    output: &Path,
    start_secs: f64,
    end_secs: f64,
    format: AudioFormat,
    timeout: Option<Duration>,
) -> MediaResult<()> {
    if !input.exists() {
        return Err(MediaError::FileNotFound(input.to_path_buf()));
    }

    let cmd = segment_command(input, output, start_secs, end_secs, format)?;
    let runner = match timeout {
        Some(t) => FfmpegRunner::new().with_timeout(t),
        None => FfmpegRunner::new(),
    };
    runner.run(&cmd).await?;

    if !output.exists() {
        return Err(MediaError::ffmpeg_failed(
            "FFmpeg produced no output",
            None,
            None,
        ));
    }

    debug!(
        "Extracted {:.3}s-{:.3}s from {} to {}",
        start_secs,
        end_secs,
        input.display(),
        output.display()
    );
    Ok(())
}
