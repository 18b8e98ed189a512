//! Source duration probing for submissions that omit a duration.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use scribe_storage::{ObjectLocator, ObjectStore, StorageResult};

/// Finds a source's duration in seconds.
#[async_trait]
pub trait DurationProbe: Send + Sync {
    /// Fetch failures are errors; an unreadable container is 0.
    async fn probe(&self, source: &ObjectLocator) -> StorageResult<f64>;
}

/// Downloads the source to a scratch directory and runs ffprobe on it.
pub struct FfprobeDurationProbe {
    objects: Arc<dyn ObjectStore>,
    work_dir: PathBuf,
}

impl FfprobeDurationProbe {
    pub fn new(objects: Arc<dyn ObjectStore>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            objects,
            work_dir: work_dir.into(),
        }
    }
}

#[async_trait]
impl DurationProbe for FfprobeDurationProbe {
    async fn probe(&self, source: &ObjectLocator) -> StorageResult<f64> {
        tokio::fs::create_dir_all(&self.work_dir).await?;
        let scratch = tempfile::Builder::new()
            .prefix("probe-")
            .tempdir_in(&self.work_dir)?;
        let path = scratch.path().join(source.file_name());

        let bytes = self.objects.fetch_to_file(source, &path).await?;
        let duration = scribe_media::probe_duration_or_zero(&path).await;
        info!(
            source = %source,
            bytes,
            duration_secs = duration,
            "Probed source duration"
        );
        Ok(duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scribe_storage::{MemoryObjectStore, StorageError};

    #[tokio::test]
    async fn test_missing_source_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let probe = FfprobeDurationProbe::new(Arc::new(MemoryObjectStore::new()), dir.path());

        let err = probe
            .probe(&ObjectLocator::new("media", "missing.mp3"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_unreadable_source_is_zero() {
        let dir = tempfile::tempdir().unwrap();
        let objects = MemoryObjectStore::new();
        let source = ObjectLocator::new("media", "noise.mp3");
        objects.insert(source.clone(), b"not media".to_vec()).await;

        let probe = FfprobeDurationProbe::new(Arc::new(objects), dir.path());
        assert_eq!(probe.probe(&source).await.unwrap(), 0.0);
    }
}
