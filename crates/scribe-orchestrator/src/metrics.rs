//! Orchestration metrics.

use metrics::counter;

pub mod names {
    pub const JOBS_SUBMITTED: &str = "scribe_jobs_submitted_total";
    pub const JOBS_FINALIZED: &str = "scribe_jobs_finalized_total";
    pub const CHUNKS_REQUEUED: &str = "scribe_chunks_requeued_total";
    pub const DISPATCH_FAILURES: &str = "scribe_dispatch_failures_total";
}

pub fn record_job_submitted(chunks: usize) {
    counter!(names::JOBS_SUBMITTED).increment(1);
    if chunks == 0 {
        counter!(names::JOBS_SUBMITTED, "plan" => "empty").increment(1);
    }
}

/// `outcome` is one of `completed` or `failed`.
pub fn record_job_finalized(outcome: &'static str) {
    counter!(names::JOBS_FINALIZED, "outcome" => outcome).increment(1);
}

pub fn record_chunks_requeued(count: usize) {
    counter!(names::CHUNKS_REQUEUED).increment(count as u64);
}

pub fn record_dispatch_failure(source: &'static str) {
    counter!(names::DISPATCH_FAILURES, "source" => source).increment(1);
}
