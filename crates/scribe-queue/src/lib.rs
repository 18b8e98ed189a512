//! Task dispatch over Redis Streams.
//!
//! This crate provides:
//! - The closed set of dispatchable task kinds and their payloads
//! - The [`TaskDispatcher`] trait used by the orchestrator
//! - [`RedisTaskQueue`]: enqueue, consumer-group reads, ack, stale-claim and DLQ
//! - [`MemoryDispatcher`] for tests and local runs

pub mod dispatcher;
pub mod error;
pub mod queue;
pub mod task;

pub use dispatcher::{DispatchReceipt, MemoryDispatcher, TaskDispatcher};
pub use error::{QueueError, QueueResult};
pub use queue::{Delivery, QueueConfig, RedisTaskQueue};
pub use task::{TaskKind, TranscribeChunkTask, DEFAULT_TASK_DEADLINE_SECS};
