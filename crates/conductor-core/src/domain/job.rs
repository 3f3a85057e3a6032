//! Job entity.

use super::status::JobStatus;
use crate::validation::rules::not_blank;
use crate::{ConductorError, ConductorResult, JobId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Longest error message kept on a job, in characters.
pub const MAX_ERROR_MESSAGE_LEN: usize = 2000;

/// Default retry budget for submissions that don't specify one.
pub const DEFAULT_MAX_RETRIES: i32 = 3;

/// A unit of work with an immutable type/payload and a mutable lifecycle.
///
/// Status changes go through the `mark_*` methods, which enforce the
/// transition graph of [`JobStatus`] and keep the timestamps and
/// retry accounting consistent with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Unique identifier, assigned at creation.
    pub id: JobId,

    /// Human-readable name.
    pub name: String,

    /// Selects the task implementation.
    #[serde(rename = "type")]
    pub job_type: String,

    /// Opaque payload interpreted only by the task implementation.
    pub payload: String,

    /// Current lifecycle status.
    pub status: JobStatus,

    /// 0-10, higher is scheduled first.
    pub priority: i32,

    /// Number of retry attempts made so far.
    pub retry_count: i32,

    /// Cap for `retry_count`.
    pub max_retries: i32,

    pub created_at: DateTime<Utc>,

    /// Set each time the job's task is published.
    pub queued_at: Option<DateTime<Utc>>,

    /// Set when a worker begins execution.
    pub started_at: Option<DateTime<Utc>>,

    /// Set on every COMPLETED/FAILED outcome.
    pub completed_at: Option<DateTime<Utc>>,

    /// Last failure reason.
    pub error_message: Option<String>,

    /// Worker that last processed the job.
    pub worker_id: Option<String>,
}

impl Job {
    /// Creates a new pending job.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        job_type: impl Into<String>,
        payload: impl Into<String>,
        priority: i32,
        max_retries: i32,
    ) -> Self {
        Self {
            id: JobId::new(),
            name: name.into(),
            job_type: job_type.into(),
            payload: payload.into(),
            status: JobStatus::Pending,
            priority,
            retry_count: 0,
            max_retries,
            created_at: Utc::now(),
            queued_at: None,
            started_at: None,
            completed_at: None,
            error_message: None,
            worker_id: None,
        }
    }

    /// Moves the job to `next`, rejecting edges outside the lifecycle graph.
    pub fn transition_to(&mut self, next: JobStatus) -> ConductorResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(ConductorError::IllegalTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// PENDING or RETRYING -> QUEUED.
    pub fn mark_queued(&mut self) -> ConductorResult<()> {
        self.transition_to(JobStatus::Queued)?;
        self.queued_at = Some(Utc::now());
        Ok(())
    }

    /// QUEUED -> RUNNING, recording who started it and when.
    pub fn mark_running(&mut self, worker_id: &str, at: DateTime<Utc>) -> ConductorResult<()> {
        self.transition_to(JobStatus::Running)?;
        self.started_at = Some(at);
        self.worker_id = Some(worker_id.to_string());
        Ok(())
    }

    /// RUNNING -> COMPLETED.
    pub fn mark_completed(&mut self, worker_id: &str, at: DateTime<Utc>) -> ConductorResult<()> {
        self.transition_to(JobStatus::Completed)?;
        self.completed_at = Some(at);
        self.worker_id = Some(worker_id.to_string());
        self.error_message = None;
        Ok(())
    }

    /// Moves the job to FAILED with the given reason.
    ///
    /// `worker_id` is only overwritten when the failure came from a worker.
    pub fn mark_failed(
        &mut self,
        error: &str,
        worker_id: Option<&str>,
        at: DateTime<Utc>,
    ) -> ConductorResult<()> {
        self.transition_to(JobStatus::Failed)?;
        self.completed_at = Some(at);
        self.error_message = Some(truncate_error(error));
        if let Some(worker_id) = worker_id {
            self.worker_id = Some(worker_id.to_string());
        }
        Ok(())
    }

    /// FAILED -> RETRYING, consuming one unit of the retry budget.
    pub fn mark_retrying(&mut self) -> ConductorResult<()> {
        if self.is_exhausted() {
            return Err(ConductorError::conflict(format!(
                "job {} has exhausted its retry budget ({}/{})",
                self.id, self.retry_count, self.max_retries
            )));
        }
        self.transition_to(JobStatus::Retrying)?;
        self.retry_count += 1;
        self.error_message = None;
        Ok(())
    }

    /// FAILED -> DEAD_LETTER. Only legal once the retry budget is spent.
    pub fn mark_dead_letter(&mut self) -> ConductorResult<()> {
        if !self.is_exhausted() {
            return Err(ConductorError::conflict(format!(
                "job {} still has retries left ({}/{})",
                self.id, self.retry_count, self.max_retries
            )));
        }
        self.transition_to(JobStatus::DeadLetter)
    }

    /// PENDING or QUEUED -> CANCELLED.
    pub fn mark_cancelled(&mut self) -> ConductorResult<()> {
        self.transition_to(JobStatus::Cancelled)
    }

    /// True when the job is FAILED and has retry budget left.
    #[must_use]
    pub fn can_retry(&self) -> bool {
        self.status == JobStatus::Failed && !self.is_exhausted()
    }

    /// True when `retry_count` has reached `max_retries`.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    /// Instant at which a failed job becomes eligible for another attempt.
    #[must_use]
    pub fn retry_due_at(&self, backoff: Duration) -> Option<DateTime<Utc>> {
        self.completed_at.map(|at| at + backoff)
    }
}

impl From<NewJob> for Job {
    fn from(request: NewJob) -> Self {
        Self::new(
            request.name,
            request.job_type,
            request.payload,
            request.priority,
            request.max_retries,
        )
    }
}

/// Truncates an error message to [`MAX_ERROR_MESSAGE_LEN`] characters.
#[must_use]
pub fn truncate_error(message: &str) -> String {
    match message.char_indices().nth(MAX_ERROR_MESSAGE_LEN) {
        Some((cut, _)) => message[..cut].to_string(),
        None => message.to_string(),
    }
}

/// Job submission request.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewJob {
    #[validate(length(min = 3, max = 255, message = "must be between 3 and 255 characters"))]
    pub name: String,

    #[serde(rename = "type")]
    #[validate(
        length(max = 100, message = "must be at most 100 characters"),
        custom(function = "not_blank")
    )]
    pub job_type: String,

    #[validate(custom(function = "not_blank"))]
    pub payload: String,

    #[serde(default)]
    #[validate(range(min = 0, max = 10, message = "must be between 0 and 10"))]
    pub priority: i32,

    #[serde(default = "default_max_retries")]
    #[validate(range(min = 0, max = 10, message = "must be between 0 and 10"))]
    pub max_retries: i32,
}

const fn default_max_retries() -> i32 {
    DEFAULT_MAX_RETRIES
}

impl NewJob {
    /// Creates a submission with default priority and retry budget.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        job_type: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            job_type: job_type.into(),
            payload: payload.into(),
            priority: 0,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    #[must_use]
    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries;
        self
    }
}
