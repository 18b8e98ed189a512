//! Task executor.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use scribe_queue::{Delivery, RedisTaskQueue, TaskKind};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::handler::{ChunkHandler, ChunkOutcome};

/// What to do with a delivery once its handler has returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Ack,
    /// Leave unacknowledged; the claim sweep redelivers it.
    Redeliver,
    DeadLetter,
}

/// Decide a delivery's fate from the handler result.
pub fn settle(result: &WorkerResult<ChunkOutcome>, deliveries: u32, max_deliveries: u32) -> Settlement {
    match result {
        Ok(_) => Settlement::Ack,
        Err(e) if !e.is_redeliverable() => Settlement::Ack,
        Err(_) if deliveries >= max_deliveries => Settlement::DeadLetter,
        Err(_) => Settlement::Redeliver,
    }
}

/// Consumes chunk tasks from the queue and runs them through a
/// [`ChunkHandler`], at most `max_concurrent_tasks` at a time.
pub struct TaskExecutor {
    config: WorkerConfig,
    queue: Arc<RedisTaskQueue>,
    handler: Arc<ChunkHandler>,
    semaphore: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
    consumer_name: String,
}

impl TaskExecutor {
    pub fn new(config: WorkerConfig, queue: RedisTaskQueue, handler: ChunkHandler) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_tasks));
        let (shutdown, _) = watch::channel(false);
        let consumer_name = format!("worker-{}", Uuid::new_v4());

        Self {
            config,
            queue: Arc::new(queue),
            handler: Arc::new(handler),
            semaphore,
            shutdown,
            consumer_name,
        }
    }

    /// Run until [`shutdown`](Self::shutdown) is called, then wait (bounded)
    /// for in-flight tasks.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting task executor '{}' with {} max concurrent tasks",
            self.consumer_name, self.config.max_concurrent_tasks
        );

        self.queue.init().await?;

        let mut shutdown_rx = self.shutdown.subscribe();
        let claim_task = self.spawn_claim_sweep();

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping executor");
                        break;
                    }
                }
                result = self.consume_tasks() => {
                    if let Err(e) = result {
                        error!("Error consuming tasks: {}", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }

        claim_task.abort();

        info!("Waiting for in-flight tasks to complete...");
        if tokio::time::timeout(self.config.shutdown_timeout, self.wait_for_tasks())
            .await
            .is_err()
        {
            warn!(
                "In-flight tasks still running after {:?}; they will be redelivered",
                self.config.shutdown_timeout
            );
        }

        info!("Task executor stopped");
        Ok(())
    }

    /// Periodically take over tasks left pending by crashed consumers.
    fn spawn_claim_sweep(&self) -> tokio::task::JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let handler = Arc::clone(&self.handler);
        let semaphore = Arc::clone(&self.semaphore);
        let consumer_name = self.consumer_name.clone();
        let interval = self.config.claim_interval;
        let min_idle = self.config.claim_min_idle;
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        let free = semaphore.available_permits();
                        if free == 0 {
                            continue;
                        }
                        match queue.claim_stale(&consumer_name, min_idle, free.min(5)).await {
                            Ok(deliveries) if !deliveries.is_empty() => {
                                info!("Claimed {} stale tasks", deliveries.len());
                                for delivery in deliveries {
                                    let Ok(permit) = semaphore.clone().acquire_owned().await else {
                                        break;
                                    };
                                    let queue = Arc::clone(&queue);
                                    let handler = Arc::clone(&handler);
                                    tokio::spawn(async move {
                                        let _permit = permit;
                                        Self::execute_task(handler, queue, delivery).await;
                                    });
                                }
                            }
                            Ok(_) => {}
                            Err(e) => warn!("Failed to claim stale tasks: {}", e),
                        }
                    }
                }
            }
        })
    }

    async fn consume_tasks(&self) -> WorkerResult<()> {
        let available = self.semaphore.available_permits();
        if available == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let deliveries = self
            .queue
            .consume(
                &self.consumer_name,
                self.config.consume_block.as_millis() as u64,
                available.min(5),
            )
            .await?;

        if deliveries.is_empty() {
            return Ok(());
        }

        debug!("Consumed {} tasks from queue", deliveries.len());

        for delivery in deliveries {
            let handler = Arc::clone(&self.handler);
            let queue = Arc::clone(&self.queue);
            let permit = self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| WorkerError::config_error("Semaphore closed"))?;

            tokio::spawn(async move {
                let _permit = permit;
                Self::execute_task(handler, queue, delivery).await;
            });
        }

        Ok(())
    }

    /// Run one delivery and settle it with the transport.
    async fn execute_task(handler: Arc<ChunkHandler>, queue: Arc<RedisTaskQueue>, delivery: Delivery) {
        let job_id = delivery.task.job_id().to_string();
        let result = match &delivery.task {
            TaskKind::TranscribeChunk(task) => handler.handle(task).await,
        };

        match settle(&result, delivery.deliveries, queue.max_deliveries()) {
            Settlement::Ack => {
                if let Err(e) = &result {
                    warn!(job_id = %job_id, "Dropping task {}: {}", delivery.message_id, e);
                }
                if let Err(e) = queue.ack(&delivery.message_id).await {
                    error!(job_id = %job_id, "Failed to ack task {}: {}", delivery.message_id, e);
                }
            }
            Settlement::Redeliver => {
                if let Err(e) = &result {
                    warn!(
                        job_id = %job_id,
                        "Task {} will be redelivered (delivery {}/{}): {}",
                        delivery.message_id,
                        delivery.deliveries,
                        queue.max_deliveries(),
                        e
                    );
                }
            }
            Settlement::DeadLetter => {
                let reason = result
                    .as_ref()
                    .err()
                    .map(|e| e.to_string())
                    .unwrap_or_default();
                if let Err(e) = queue.dead_letter(&delivery, &reason).await {
                    error!(job_id = %job_id, "Failed to dead-letter task {}: {}", delivery.message_id, e);
                }
            }
        }
    }

    async fn wait_for_tasks(&self) {
        while self.semaphore.available_permits() < self.config.max_concurrent_tasks {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scribe_store::StoreError;

    fn done() -> WorkerResult<ChunkOutcome> {
        Ok(ChunkOutcome::Done {
            chars: 3,
            finalize: None,
        })
    }

    #[test]
    fn test_handled_tasks_are_acked() {
        assert_eq!(settle(&done(), 1, 5), Settlement::Ack);
        assert_eq!(settle(&Ok(ChunkOutcome::Skipped), 9, 5), Settlement::Ack);
    }

    #[test]
    fn test_store_failure_redelivered_then_dead_lettered() {
        let err = || Err(WorkerError::Store(StoreError::conflict("deadlock")));
        assert_eq!(settle(&err(), 1, 5), Settlement::Redeliver);
        assert_eq!(settle(&err(), 4, 5), Settlement::Redeliver);
        assert_eq!(settle(&err(), 5, 5), Settlement::DeadLetter);
    }

    #[test]
    fn test_permanent_errors_acked() {
        let err = Err(WorkerError::Store(StoreError::chunk_not_found("job-1", 9)));
        assert_eq!(settle(&err, 1, 5), Settlement::Ack);
    }
}
