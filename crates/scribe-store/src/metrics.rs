//! Store metrics.
//!
//! - Query latency by operation and outcome
//! - Retry counters for transient conflicts

use metrics::{counter, histogram};

/// Metric name constants for consistency.
pub mod names {
    /// Store operation latency in seconds by operation.
    pub const QUERY_SECONDS: &str = "scribe_store_query_seconds";

    /// Total retry attempts by operation.
    pub const RETRIES_TOTAL: &str = "scribe_store_retries_total";
}

/// Record the latency of a store operation.
pub fn record_query(operation: &str, success: bool, latency_ms: f64) {
    histogram!(
        names::QUERY_SECONDS,
        "operation" => operation.to_string(),
        "outcome" => if success { "ok" } else { "error" }
    )
    .record(latency_ms / 1000.0);
}

/// Record a retry attempt.
pub fn record_retry(operation: &str) {
    counter!(
        names::RETRIES_TOTAL,
        "operation" => operation.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names() {
        assert!(names::RETRIES_TOTAL.contains("retries"));
        assert!(names::QUERY_SECONDS.ends_with("_seconds"));
    }
}
