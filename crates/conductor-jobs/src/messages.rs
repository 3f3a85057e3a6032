//! Wire messages carried by the work queue.

use chrono::{DateTime, Utc};
use conductor_core::{Job, JobId};
use serde::{Deserialize, Serialize};

/// Projection of a job sufficient for execution, sent once per distribution
/// attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobTask {
    pub job_id: JobId,
    #[serde(rename = "type")]
    pub job_type: String,
    pub payload: String,
    pub retry_count: i32,
    pub max_retries: i32,
}

impl From<&Job> for JobTask {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            job_type: job.job_type.clone(),
            payload: job.payload.clone(),
            retry_count: job.retry_count,
            max_retries: job.max_retries,
        }
    }
}

/// Outcome of one execution attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub job_id: JobId,
    /// The job's `retry_count` when the attempt was distributed.
    pub retry_count: i32,
    pub success: bool,
    pub error_message: Option<String>,
    pub worker_id: String,
    /// When the worker began executing, if it got that far.
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: DateTime<Utc>,
}

impl JobResult {
    /// Successful attempt of `task`.
    pub fn succeeded(
        task: &JobTask,
        worker_id: impl Into<String>,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id: task.job_id,
            retry_count: task.retry_count,
            success: true,
            error_message: None,
            worker_id: worker_id.into(),
            started_at: Some(started_at),
            completed_at,
        }
    }

    /// Failed attempt of `task` with its cause.
    pub fn failed(
        task: &JobTask,
        worker_id: impl Into<String>,
        error: impl Into<String>,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id: task.job_id,
            retry_count: task.retry_count,
            success: false,
            error_message: Some(error.into()),
            worker_id: worker_id.into(),
            started_at: Some(started_at),
            completed_at,
        }
    }
}
