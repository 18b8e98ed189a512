//! Object locators.

use std::fmt;
use std::str::FromStr;

use scribe_models::JobId;

use crate::StorageError;

/// Content type of stored transcripts.
pub const TRANSCRIPT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// A bucket + key pair.
///
/// Accepts `s3://bucket/key`, `gs://bucket/key` and `bucket/key`. The scheme
/// is not retained; every locator is served by the configured S3-compatible
/// endpoint and renders as `s3://bucket/key`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectLocator {
    pub bucket: String,
    pub key: String,
}

impl ObjectLocator {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    pub fn parse(s: &str) -> Result<Self, StorageError> {
        let trimmed = s.trim();
        let rest = ["s3://", "gs://"]
            .iter()
            .find_map(|scheme| trimmed.strip_prefix(scheme))
            .unwrap_or(trimmed);

        match rest.split_once('/') {
            Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => {
                Ok(Self::new(bucket, key))
            }
            _ => Err(StorageError::invalid_locator(s)),
        }
    }

    /// Final path segment of the key.
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

impl FromStr for ObjectLocator {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ObjectLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

/// Where the finalized transcript of a job is written.
pub fn transcript_locator(bucket: &str, prefix: &str, job_id: &JobId) -> ObjectLocator {
    let prefix = prefix.trim_matches('/');
    let key = if prefix.is_empty() {
        format!("{}.txt", job_id)
    } else {
        format!("{}/{}.txt", prefix, job_id)
    };
    ObjectLocator::new(bucket, key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_schemes() {
        let a = ObjectLocator::parse("gs://media/uploads/talk.mp4").unwrap();
        let b = ObjectLocator::parse("s3://media/uploads/talk.mp4").unwrap();
        let c = ObjectLocator::parse("media/uploads/talk.mp4").unwrap();
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(a.key, "uploads/talk.mp4");
        assert_eq!(a.file_name(), "talk.mp4");
        assert_eq!(a.to_string(), "s3://media/uploads/talk.mp4");
    }

    #[test]
    fn test_parse_rejects_incomplete() {
        assert!(ObjectLocator::parse("s3://media").is_err());
        assert!(ObjectLocator::parse("s3://media/").is_err());
        assert!(ObjectLocator::parse("/key").is_err());
        assert!(ObjectLocator::parse("").is_err());
    }

    #[test]
    fn test_transcript_locator() {
        let id = JobId::from_string("job-7");
        assert_eq!(
            transcript_locator("out-bucket", "out", &id).to_string(),
            "s3://out-bucket/out/job-7.txt"
        );
        assert_eq!(transcript_locator("b", "", &id).key, "job-7.txt");
    }
}
