//! Store configuration.

use std::time::Duration;

use crate::RetryPolicy;

/// PostgreSQL connection and transaction-retry settings.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    /// Attempts per operation when the database reports a serialization or
    /// deadlock conflict.
    pub tx_max_attempts: u32,
    /// Linear backoff step between conflicting attempts.
    pub tx_backoff: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost:5432/scribe".to_string(),
            max_connections: 15,
            connect_timeout: Duration::from_millis(5_000),
            idle_timeout: Duration::from_millis(30_000),
            tx_max_attempts: 3,
            tx_backoff: Duration::from_millis(50),
        }
    }
}

impl StoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            max_connections: env_parse("PG_POOL_MAX").unwrap_or(defaults.max_connections),
            connect_timeout: env_parse("PG_CONNECTION_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.connect_timeout),
            idle_timeout: env_parse("PG_IDLE_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.idle_timeout),
            tx_max_attempts: env_parse("STORE_TX_MAX_ATTEMPTS").unwrap_or(defaults.tx_max_attempts),
            tx_backoff: env_parse("STORE_TX_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.tx_backoff),
        }
    }

    /// Retry policy applied to every store operation.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::linear(self.tx_max_attempts, self.tx_backoff)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}
