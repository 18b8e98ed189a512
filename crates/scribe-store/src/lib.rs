//! Job/chunk store.
//!
//! The single source of truth for job, chunk and transcript state:
//! - [`JobStore`] / [`StoreTx`] traits consumed by the orchestrator and worker
//! - [`PgJobStore`], the PostgreSQL backend (sqlx, advisory locks)
//! - [`MemoryJobStore`], an in-process backend for tests and local runs
//! - [`RetryPolicy`], bounded retry for transient conflicts

pub mod config;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod postgres;
pub mod retry;
pub mod store;

pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use memory::MemoryJobStore;
pub use postgres::PgJobStore;
pub use retry::{Backoff, RetryPolicy};
pub use store::{JobStore, RequeueOutcome, StoreTx};
