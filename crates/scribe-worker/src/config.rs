//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum chunk tasks processed at once
    pub max_concurrent_tasks: usize,
    /// Scratch space; each task gets its own directory below it
    pub work_dir: PathBuf,
    /// How long a consume call blocks waiting for new tasks
    pub consume_block: Duration,
    /// How often to sweep for tasks abandoned by crashed consumers
    pub claim_interval: Duration,
    /// Minimum idle time before another consumer's task can be claimed
    pub claim_min_idle: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Prometheus listener port; disabled when unset
    pub metrics_port: Option<u16>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 4,
            work_dir: PathBuf::from("/tmp/scribe"),
            consume_block: Duration::from_millis(1000),
            claim_interval: Duration::from_secs(30),
            // Longer than the default task deadline, so live tasks are not stolen
            claim_min_idle: Duration::from_secs(900),
            shutdown_timeout: Duration::from_secs(60),
            metrics_port: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent_tasks: env_parse("WORKER_MAX_TASKS")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_concurrent_tasks),
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            consume_block: env_parse("WORKER_CONSUME_BLOCK_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.consume_block),
            claim_interval: env_parse("WORKER_CLAIM_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.claim_interval),
            claim_min_idle: env_parse("WORKER_CLAIM_MIN_IDLE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.claim_min_idle),
            shutdown_timeout: env_parse("WORKER_SHUTDOWN_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_timeout),
            metrics_port: env_parse("WORKER_METRICS_PORT"),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}
