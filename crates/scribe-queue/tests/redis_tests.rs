//! Redis Streams integration tests.

use std::time::Duration;

use scribe_models::{Chunk, ChunkPlan, JobId};
use scribe_queue::{QueueConfig, RedisTaskQueue, TaskDispatcher, TaskKind, TranscribeChunkTask};

/// A queue on streams unique to this test run.
async fn queue(max_deliveries: u32) -> RedisTaskQueue {
    dotenvy::dotenv().ok();
    let suffix = JobId::new();
    let config = QueueConfig {
        stream_name: format!("scribe:test:{}", suffix),
        consumer_group: format!("scribe:test:{}:workers", suffix),
        dlq_stream_name: format!("scribe:test:{}:dlq", suffix),
        max_deliveries,
        ..QueueConfig::from_env()
    };
    let queue = RedisTaskQueue::new(config).expect("Failed to create queue");
    queue.init().await.expect("Failed to initialize queue");
    queue
}

fn task(index: u32) -> TaskKind {
    let plan = ChunkPlan::new(1500.0, 600.0, 2.0).unwrap();
    let chunk = Chunk::pending(JobId::from_string("it-job"), &plan.chunks[index as usize]);
    TranscribeChunkTask::new(&chunk, "s3://media/it.mp3").into()
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_dispatch_consume_ack() {
    let queue = queue(5).await;
    queue.check_connectivity().await.unwrap();

    queue.dispatch(task(0)).await.unwrap();
    queue.dispatch(task(1)).await.unwrap();
    assert_eq!(queue.len().await.unwrap(), 2);

    let deliveries = queue.consume("consumer-a", 1000, 10).await.unwrap();
    assert_eq!(deliveries.len(), 2);
    assert_eq!(deliveries[0].task, task_like(&deliveries[0].task, 0));
    assert_eq!(deliveries[0].deliveries, 1);

    for delivery in &deliveries {
        queue.ack(&delivery.message_id).await.unwrap();
    }
    assert_eq!(queue.len().await.unwrap(), 0);
}

/// Compare ignoring the dispatch timestamp.
fn task_like(actual: &TaskKind, index: u32) -> TaskKind {
    let TaskKind::TranscribeChunk(expected) = task(index);
    let TaskKind::TranscribeChunk(actual) = actual;
    TaskKind::TranscribeChunk(TranscribeChunkTask {
        dispatched_at: actual.dispatched_at,
        ..expected
    })
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_stale_tasks_are_claimed() {
    let queue = queue(5).await;
    queue.dispatch(task(2)).await.unwrap();

    let first = queue.consume("crashed", 1000, 1).await.unwrap();
    assert_eq!(first.len(), 1);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let claimed = queue
        .claim_stale("rescuer", Duration::from_millis(10), 10)
        .await
        .unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].message_id, first[0].message_id);
    assert_eq!(claimed[0].deliveries, 2);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_dead_letter() {
    let queue = queue(1).await;
    queue.dispatch(task(0)).await.unwrap();

    let deliveries = queue.consume("consumer-a", 1000, 1).await.unwrap();
    queue
        .dead_letter(&deliveries[0], "store unavailable")
        .await
        .unwrap();

    assert_eq!(queue.len().await.unwrap(), 0);
    assert_eq!(queue.dlq_len().await.unwrap(), 1);
}
