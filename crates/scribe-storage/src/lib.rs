//! Object storage for source media and finalized transcripts.
//!
//! This crate provides:
//! - [`ObjectLocator`] parsing for `s3://`, `gs://` and bare `bucket/key` forms
//! - The [`ObjectStore`] trait used by workers and the finalizer
//! - [`S3Client`], an S3-compatible implementation (AWS, R2, GCS interop)
//! - [`MemoryObjectStore`] for tests and local runs

pub mod client;
pub mod error;
pub mod locator;
pub mod memory;
pub mod store;

pub use client::{S3Client, S3Config};
pub use error::{StorageError, StorageResult};
pub use locator::{transcript_locator, ObjectLocator, TRANSCRIPT_CONTENT_TYPE};
pub use memory::MemoryObjectStore;
pub use store::ObjectStore;
