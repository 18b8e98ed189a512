//! Chunk task dispatch.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use scribe_models::Chunk;
use scribe_queue::{DispatchReceipt, QueueResult, TaskDispatcher, TranscribeChunkTask};

/// Builds a transcription task for a chunk and hands it to the transport.
///
/// One call, one task. Delivery guarantees and any retrying belong to the
/// caller and the transport.
#[derive(Clone)]
pub struct ChunkDispatcher {
    dispatcher: Arc<dyn TaskDispatcher>,
    deadline: Duration,
}

impl ChunkDispatcher {
    pub fn new(dispatcher: Arc<dyn TaskDispatcher>, deadline: Duration) -> Self {
        Self {
            dispatcher,
            deadline,
        }
    }

    pub async fn dispatch(&self, source_locator: &str, chunk: &Chunk) -> QueueResult<DispatchReceipt> {
        let task = TranscribeChunkTask::new(chunk, source_locator).with_deadline(self.deadline);
        let receipt = self.dispatcher.dispatch(task.into()).await?;
        debug!(
            job_id = %chunk.job_id,
            chunk = chunk.index,
            message_id = %receipt.message_id,
            "Dispatched chunk task"
        );
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scribe_models::{JobId, PlannedChunk};
    use scribe_queue::{MemoryDispatcher, TaskKind};

    #[tokio::test]
    async fn test_dispatch_builds_task() {
        let memory = MemoryDispatcher::new();
        let dispatcher = ChunkDispatcher::new(Arc::new(memory.clone()), Duration::from_secs(90));
        let planned = PlannedChunk {
            index: 1,
            start_secs: 598.0,
            end_secs: 1200.0,
        };
        let chunk = Chunk::pending(JobId::from_string("job-1"), &planned);

        dispatcher.dispatch("s3://media/a.mp3", &chunk).await.unwrap();

        let tasks = memory.take().await;
        assert_eq!(tasks.len(), 1);
        let TaskKind::TranscribeChunk(task) = &tasks[0];
        assert_eq!(task.index, 1);
        assert_eq!(task.start_secs, 598.0);
        assert_eq!(task.end_secs, 1200.0);
        assert_eq!(task.source_locator, "s3://media/a.mp3");
        assert_eq!(task.deadline(), Duration::from_secs(90));
    }
}
