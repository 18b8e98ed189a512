//! Object store trait.

use std::path::Path;

use async_trait::async_trait;

use crate::{ObjectLocator, StorageResult};

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Download an object to a local file, returning the bytes written.
    async fn fetch_to_file(&self, locator: &ObjectLocator, dest: &Path) -> StorageResult<u64>;

    /// Write a text object, overwriting any previous version.
    async fn put_text(
        &self,
        locator: &ObjectLocator,
        text: &str,
        content_type: &str,
    ) -> StorageResult<()>;

    /// Connectivity check for readiness probes.
    async fn check_connectivity(&self) -> StorageResult<()>;
}
