//! In-memory object store.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{ObjectLocator, ObjectStore, StorageError, StorageResult};

/// [`ObjectStore`] holding objects in a map. Counts puts and can be told to
/// reject them.
#[derive(Debug, Clone, Default)]
pub struct MemoryObjectStore {
    objects: Arc<RwLock<HashMap<ObjectLocator, Vec<u8>>>>,
    puts: Arc<AtomicU64>,
    reject_puts: Arc<AtomicBool>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, locator: ObjectLocator, bytes: impl Into<Vec<u8>>) {
        self.objects.write().await.insert(locator, bytes.into());
    }

    pub async fn get(&self, locator: &ObjectLocator) -> Option<Vec<u8>> {
        self.objects.read().await.get(locator).cloned()
    }

    /// Number of successful `put_text` calls.
    pub fn put_count(&self) -> u64 {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn set_reject_puts(&self, reject: bool) {
        self.reject_puts.store(reject, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn fetch_to_file(&self, locator: &ObjectLocator, dest: &Path) -> StorageResult<u64> {
        let bytes = self
            .get(locator)
            .await
            .ok_or_else(|| StorageError::not_found(locator.to_string()))?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, &bytes).await?;
        Ok(bytes.len() as u64)
    }

    async fn put_text(
        &self,
        locator: &ObjectLocator,
        text: &str,
        _content_type: &str,
    ) -> StorageResult<()> {
        if self.reject_puts.load(Ordering::SeqCst) {
            return Err(StorageError::upload_failed(format!("{} rejected", locator)));
        }
        self.insert(locator.clone(), text.as_bytes()).await;
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn check_connectivity(&self) -> StorageResult<()> {
        Ok(())
    }
}
