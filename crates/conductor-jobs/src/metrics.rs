//! Job lifecycle metrics.
//!
//! Fire-and-forget recordings through the `metrics` facade. Nothing here
//! installs an exporter; without a recorder every call is a no-op.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::time::Duration;

/// Metric names.
pub mod names {
    /// Jobs accepted by the submission service.
    pub const JOBS_SUBMITTED_TOTAL: &str = "conductor_jobs_submitted_total";
    /// Jobs moved to QUEUED and published.
    pub const JOBS_QUEUED_TOTAL: &str = "conductor_jobs_queued_total";
    /// Execution outcomes applied to the store.
    pub const JOBS_COMPLETED_TOTAL: &str = "conductor_jobs_completed_total";
    /// Retry attempts started.
    pub const JOBS_RETRIED_TOTAL: &str = "conductor_jobs_retried_total";
    /// Jobs moved to DEAD_LETTER.
    pub const JOBS_DEAD_LETTERED_TOTAL: &str = "conductor_jobs_dead_lettered_total";
    /// Executions cut off by the wall-clock timeout.
    pub const JOBS_TIMED_OUT_TOTAL: &str = "conductor_jobs_timed_out_total";
    /// Stale RUNNING jobs failed by the recovery sweep.
    pub const JOBS_RECOVERED_TOTAL: &str = "conductor_jobs_recovered_total";
    /// Task deliveries skipped because another worker held the lease.
    pub const LOCK_CONTENTION_TOTAL: &str = "conductor_lock_contention_total";
    /// Execution duration in seconds.
    pub const JOB_DURATION_SECONDS: &str = "conductor_job_duration_seconds";
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(
        names::JOBS_SUBMITTED_TOTAL,
        "Total number of jobs submitted"
    );
    describe_counter!(
        names::JOBS_QUEUED_TOTAL,
        "Total number of jobs published to the work queue"
    );
    describe_counter!(
        names::JOBS_COMPLETED_TOTAL,
        "Total number of execution outcomes, tagged by success"
    );
    describe_counter!(
        names::JOBS_RETRIED_TOTAL,
        "Total number of retry attempts"
    );
    describe_counter!(
        names::JOBS_DEAD_LETTERED_TOTAL,
        "Total number of jobs moved to dead letter"
    );
    describe_counter!(
        names::JOBS_TIMED_OUT_TOTAL,
        "Total number of executions that hit the timeout"
    );
    describe_counter!(
        names::JOBS_RECOVERED_TOTAL,
        "Total number of stale running jobs recovered"
    );
    describe_counter!(
        names::LOCK_CONTENTION_TOTAL,
        "Total number of task deliveries skipped due to a held lease"
    );
    describe_histogram!(
        names::JOB_DURATION_SECONDS,
        "Job execution duration in seconds"
    );
}

/// Job metrics recorder.
#[derive(Clone)]
pub struct JobMetrics;

impl JobMetrics {
    pub fn job_submitted(job_type: &str) {
        counter!(names::JOBS_SUBMITTED_TOTAL, "type" => job_type.to_string()).increment(1);
    }

    pub fn job_queued(job_type: &str) {
        counter!(names::JOBS_QUEUED_TOTAL, "type" => job_type.to_string()).increment(1);
    }

    /// Record an applied execution outcome.
    pub fn job_completed(job_type: &str, success: bool, duration: Option<Duration>) {
        counter!(
            names::JOBS_COMPLETED_TOTAL,
            "type" => job_type.to_string(),
            "success" => success.to_string()
        )
        .increment(1);

        if let Some(duration) = duration {
            histogram!(
                names::JOB_DURATION_SECONDS,
                "type" => job_type.to_string(),
                "outcome" => if success { "completed" } else { "failed" }
            )
            .record(duration.as_secs_f64());
        }
    }

    pub fn job_retried(job_type: &str) {
        counter!(names::JOBS_RETRIED_TOTAL, "type" => job_type.to_string()).increment(1);
    }

    pub fn job_dead_lettered(job_type: &str) {
        counter!(names::JOBS_DEAD_LETTERED_TOTAL, "type" => job_type.to_string()).increment(1);
    }

    pub fn job_timed_out(job_type: &str) {
        counter!(names::JOBS_TIMED_OUT_TOTAL, "type" => job_type.to_string()).increment(1);
    }

    pub fn job_recovered(job_type: &str) {
        counter!(names::JOBS_RECOVERED_TOTAL, "type" => job_type.to_string()).increment(1);
    }

    pub fn lock_contended() {
        counter!(names::LOCK_CONTENTION_TOTAL).increment(1);
    }
}
