//! FFprobe duration probing.

use std::path::Path;
use std::process::Stdio;

use serde::Deserialize;
use tokio::process::Command;
use tracing::warn;

use crate::error::{MediaError, MediaResult};

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

/// Container duration in seconds.
pub async fn probe_duration(path: impl AsRef<Path>) -> MediaResult<f64> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)?;

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_entries",
            "format=duration",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        return Err(MediaError::FfprobeFailed {
            message: "FFprobe failed".to_string(),
            stderr: Some(String::from_utf8_lossy(&output.stderr).to_string()),
        });
    }

    parse_duration(&output.stdout)
}

/// Like [`probe_duration`], but any failure yields 0 (an empty plan).
pub async fn probe_duration_or_zero(path: impl AsRef<Path>) -> f64 {
    match probe_duration(path.as_ref()).await {
        Ok(d) => d,
        Err(e) => {
            warn!("Duration probe failed for {}: {}", path.as_ref().display(), e);
            0.0
        }
    }
}

fn parse_duration(stdout: &[u8]) -> MediaResult<f64> {
    let probe: FfprobeOutput = serde_json::from_slice(stdout)?;
    Ok(probe
        .format
        .duration
        .as_deref()
        .and_then(|d| d.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
        .unwrap_or(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        let json = br#"{"format": {"duration": "1500.042000"}}"#;
        assert_eq!(parse_duration(json).unwrap(), 1500.042);
    }

    #[test]
    fn test_parse_duration_missing_or_bad() {
        assert_eq!(parse_duration(br#"{"format": {}}"#).unwrap(), 0.0);
        assert_eq!(parse_duration(br#"{"format": {"duration": "N/A"}}"#).unwrap(), 0.0);
        assert!(parse_duration(b"not json").is_err());
    }

    #[tokio::test]
    async fn test_missing_file_is_zero() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(probe_duration_or_zero(dir.path().join("nope.mp4")).await, 0.0);
    }
}
