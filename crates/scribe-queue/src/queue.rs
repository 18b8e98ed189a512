//! Task queue using Redis Streams.
//!
//! Tasks are added with XADD and read through a consumer group. A message
//! stays in the group's pending list until acknowledged, so a crashed worker's
//! tasks are picked up again by [`RedisTaskQueue::claim_stale`] once they
//! have been idle long enough. Messages that keep failing are moved to a
//! dead-letter stream after `max_deliveries` attempts.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;
use redis::streams::{StreamId, StreamPendingCountReply, StreamReadReply};
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use crate::dispatcher::{DispatchReceipt, TaskDispatcher};
use crate::error::{QueueError, QueueResult};
use crate::task::{TaskKind, DEFAULT_TASK_DEADLINE_SECS};

const TASK_FIELD: &str = "task";
const KIND_FIELD: &str = "kind";

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream name for tasks
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Dead letter queue stream name
    pub dlq_stream_name: String,
    /// Deliveries before a task is dead-lettered
    pub max_deliveries: u32,
    /// Execution deadline stamped on dispatched tasks
    pub task_deadline: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "scribe:tasks".to_string(),
            consumer_group: "scribe:workers".to_string(),
            dlq_stream_name: "scribe:dlq".to_string(),
            max_deliveries: 5,
            task_deadline: Duration::from_secs(DEFAULT_TASK_DEADLINE_SECS),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            stream_name: std::env::var("QUEUE_STREAM").unwrap_or(defaults.stream_name),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            dlq_stream_name: std::env::var("QUEUE_DLQ_STREAM").unwrap_or(defaults.dlq_stream_name),
            max_deliveries: std::env::var("QUEUE_MAX_DELIVERIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_deliveries),
            task_deadline: std::env::var("QUEUE_TASK_DEADLINE_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.task_deadline),
        }
    }
}

/// One task handed to this consumer.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message_id: String,
    pub task: TaskKind,
    /// How many times the message has been delivered, this one included.
    pub deliveries: u32,
}

/// Redis Streams task queue.
pub struct RedisTaskQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl RedisTaskQueue {
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn max_deliveries(&self) -> u32 {
        self.config.max_deliveries
    }

    async fn connection(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }

    /// Create the consumer group if it does not exist.
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    /// Acknowledge a task and drop it from the stream.
    pub async fn ack(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        debug!("Acknowledged task: {}", message_id);
        Ok(())
    }

    /// Move a task to the dead letter stream and acknowledge the original.
    pub async fn dead_letter(&self, delivery: &Delivery, error: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(&delivery.task)?;

        redis::cmd("XADD")
            .arg(&self.config.dlq_stream_name)
            .arg("*")
            .arg(TASK_FIELD)
            .arg(&payload)
            .arg("error")
            .arg(error)
            .arg("original_id")
            .arg(&delivery.message_id)
            .arg("deliveries")
            .arg(delivery.deliveries)
            .query_async::<()>(&mut conn)
            .await?;

        self.ack(&delivery.message_id).await?;

        counter!("scribe_tasks_dead_lettered_total", "kind" => delivery.task.name()).increment(1);
        warn!(
            job_id = %delivery.task.job_id(),
            "Moved task {} to DLQ: {}", delivery.message_id, error
        );
        Ok(())
    }

    /// Get queue length.
    pub async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.xlen(&self.config.stream_name).await?;
        Ok(len)
    }

    /// Get DLQ length.
    pub async fn dlq_len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.xlen(&self.config.dlq_stream_name).await?;
        Ok(len)
    }

    /// Read new tasks for this consumer, blocking up to `block_ms`.
    pub async fn consume(
        &self,
        consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<Delivery>> {
        let mut conn = self.connection().await?;

        let reply: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let mut deliveries = Vec::new();
        for stream_key in reply.map(|r| r.keys).unwrap_or_default() {
            for entry in stream_key.ids {
                if let Some(delivery) = self.decode(entry, 1).await {
                    deliveries.push(delivery);
                }
            }
        }

        Ok(deliveries)
    }

    /// Take over tasks that another consumer left unacknowledged for at
    /// least `min_idle`.
    pub async fn claim_stale(
        &self,
        consumer_name: &str,
        min_idle: Duration,
        count: usize,
    ) -> QueueResult<Vec<Delivery>> {
        let mut conn = self.connection().await?;
        let min_idle_ms = min_idle.as_millis() as u64;

        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        if pending.ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut claimed = Vec::new();
        for stale in pending.ids {
            let entries: Vec<StreamId> = redis::cmd("XCLAIM")
                .arg(&self.config.stream_name)
                .arg(&self.config.consumer_group)
                .arg(consumer_name)
                .arg(min_idle_ms)
                .arg(&stale.id)
                .query_async::<redis::streams::StreamClaimReply>(&mut conn)
                .await?
                .ids;

            // XCLAIM bumps the delivery counter.
            let deliveries = u32::try_from(stale.times_delivered).unwrap_or(u32::MAX).saturating_add(1);
            for entry in entries {
                if let Some(delivery) = self.decode(entry, deliveries).await {
                    info!(
                        job_id = %delivery.task.job_id(),
                        deliveries,
                        "Claimed stale task {}", delivery.message_id
                    );
                    claimed.push(delivery);
                }
            }
        }

        Ok(claimed)
    }

    /// Parse a stream entry; malformed entries are acknowledged and dropped.
    async fn decode(&self, entry: StreamId, deliveries: u32) -> Option<Delivery> {
        let message_id = entry.id.clone();
        let parsed = entry
            .get::<String>(TASK_FIELD)
            .ok_or_else(|| "missing task field".to_string())
            .and_then(|payload| {
                serde_json::from_str::<TaskKind>(&payload).map_err(|e| e.to_string())
            });

        match parsed {
            Ok(task) => Some(Delivery {
                message_id,
                task,
                deliveries,
            }),
            Err(e) => {
                warn!("Dropping malformed task {}: {}", message_id, e);
                self.ack(&message_id).await.ok();
                None
            }
        }
    }
}

#[async_trait]
impl TaskDispatcher for RedisTaskQueue {
    async fn dispatch(&self, task: TaskKind) -> QueueResult<DispatchReceipt> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(&task)?;

        let message_id: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg(TASK_FIELD)
            .arg(&payload)
            .arg(KIND_FIELD)
            .arg(task.name())
            .query_async(&mut conn)
            .await?;

        counter!("scribe_tasks_dispatched_total", "kind" => task.name()).increment(1);
        debug!(job_id = %task.job_id(), "Dispatched {} as {}", task.name(), message_id);

        Ok(DispatchReceipt {
            message_id,
            dispatched_at: Utc::now(),
        })
    }

    async fn check_connectivity(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}
