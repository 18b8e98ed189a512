//! Dispatcher abstraction.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::{QueueError, QueueResult, TaskKind};

/// Confirmation that the transport accepted a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReceipt {
    pub message_id: String,
    pub dispatched_at: DateTime<Utc>,
}

/// Hands tasks to the external delivery service.
///
/// Each call is independent and fire-and-forget: delivery (at least once)
/// belongs to the transport, and dispatchers never retry on their own.
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    async fn dispatch(&self, task: TaskKind) -> QueueResult<DispatchReceipt>;

    /// Connectivity check for readiness probes.
    async fn check_connectivity(&self) -> QueueResult<()>;
}

/// Records dispatched tasks in memory. Can be told to fail the next calls
/// with a transient connection error.
#[derive(Debug, Clone, Default)]
pub struct MemoryDispatcher {
    tasks: Arc<Mutex<Vec<TaskKind>>>,
    failures: Arc<AtomicU32>,
}

impl MemoryDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn dispatched(&self) -> Vec<TaskKind> {
        self.tasks.lock().await.clone()
    }

    pub async fn take(&self) -> Vec<TaskKind> {
        std::mem::take(&mut *self.tasks.lock().await)
    }

    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl TaskDispatcher for MemoryDispatcher {
    async fn dispatch(&self, task: TaskKind) -> QueueResult<DispatchReceipt> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(QueueError::connection_failed("connection reset (injected)"));
        }

        let mut tasks = self.tasks.lock().await;
        tasks.push(task);
        Ok(DispatchReceipt {
            message_id: format!("mem-{}", tasks.len()),
            dispatched_at: Utc::now(),
        })
    }

    async fn check_connectivity(&self) -> QueueResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TranscribeChunkTask;
    use scribe_models::{Chunk, JobId, PlannedChunk};

    fn task(index: u32) -> TaskKind {
        let planned = PlannedChunk {
            index,
            start_secs: 0.0,
            end_secs: 10.0,
        };
        TranscribeChunkTask::new(&Chunk::pending(JobId::from_string("j"), &planned), "b/k").into()
    }

    #[tokio::test]
    async fn test_records_in_order() {
        let dispatcher = MemoryDispatcher::new();
        let first = dispatcher.dispatch(task(0)).await.unwrap();
        dispatcher.dispatch(task(1)).await.unwrap();

        assert_eq!(first.message_id, "mem-1");
        let tasks = dispatcher.take().await;
        assert_eq!(tasks.len(), 2);
        assert!(dispatcher.dispatched().await.is_empty());
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let dispatcher = MemoryDispatcher::new();
        dispatcher.fail_next(1);

        let err = dispatcher.dispatch(task(0)).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(dispatcher.dispatch(task(0)).await.is_ok());
    }
}
