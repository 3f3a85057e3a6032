//! Orchestration error types.

use conductor_core::{ConductorError, JobStatus};
use thiserror::Error;

/// Result type for orchestration operations.
pub type JobsResult<T> = Result<T, JobError>;

/// Error message recorded when a task overruns its wall-clock budget.
pub const EXECUTION_TIMEOUT: &str = "execution timeout";

/// Orchestration errors.
///
/// Grouped by how the loops react to them:
/// transient infrastructure failures (`Redis`, `Pool`, `Publish`, `Store`)
/// are left to the retry engine, configuration errors are never retried,
/// execution errors count against the retry budget and data integrity errors
/// are logged and dropped.
#[derive(Debug, Error)]
pub enum JobError {
    /// The task implementation reported a failure.
    #[error("{0}")]
    ExecutionFailed(String),

    /// The task exceeded its wall-clock budget.
    #[error("execution timeout")]
    Timeout,

    /// The task observed its cancellation signal and stopped.
    #[error("Task was cancelled")]
    Cancelled,

    /// No implementation is registered for the job type.
    #[error("Unknown task type: {0}")]
    UnknownTaskType(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Redis pool error.
    #[error("Redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    /// Job not found.
    #[error("Job not found: {0}")]
    NotFound(String),

    /// The job was not in a status that allows the requested change.
    #[error("Illegal job transition: {from} -> {to}")]
    IllegalTransition { from: JobStatus, to: JobStatus },

    /// Submission rejected by validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A concurrent writer changed the job first.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Publishing to the work queue failed or timed out.
    #[error("Publish failed: {0}")]
    Publish(String),

    /// The job store failed.
    #[error("Job store error: {0}")]
    Store(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl JobError {
    /// Infrastructure failures that may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            JobError::Redis(_) | JobError::Pool(_) | JobError::Publish(_) | JobError::Store(_)
        )
    }

    /// Returns true if this error should count against the retry budget
    /// and be picked up again by the retry engine.
    pub fn is_retryable(&self) -> bool {
        self.is_transient() || matches!(self, JobError::ExecutionFailed(_) | JobError::Timeout)
    }

    /// Errors that need operator action and must not be retried automatically.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            JobError::UnknownTaskType(_) | JobError::Configuration(_)
        )
    }
}

impl From<ConductorError> for JobError {
    fn from(err: ConductorError) -> Self {
        match err {
            ConductorError::NotFound { id, .. } => JobError::NotFound(id),
            ConductorError::IllegalTransition { from, to } => {
                JobError::IllegalTransition { from, to }
            }
            ConductorError::Validation(msg) => JobError::Validation(msg),
            ConductorError::Conflict(msg) => JobError::Conflict(msg),
            ConductorError::Database(msg)
            | ConductorError::Cache(msg)
            | ConductorError::Timeout(msg) => JobError::Store(msg),
            ConductorError::Queue(msg) => JobError::Publish(msg),
            ConductorError::Configuration(msg) => JobError::Configuration(msg),
            other => JobError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_is_stable() {
        assert_eq!(JobError::Timeout.to_string(), EXECUTION_TIMEOUT);
    }

    #[test]
    fn test_execution_failure_keeps_cause_verbatim() {
        let err = JobError::ExecutionFailed("smtp refused".into());
        assert_eq!(err.to_string(), "smtp refused");
        assert!(err.is_retryable());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_unknown_task_type_is_configuration() {
        let err = JobError::UnknownTaskType("FAX".into());
        assert!(err.is_configuration());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_store_and_publish_are_transient() {
        assert!(JobError::Store("down".into()).is_transient());
        assert!(JobError::Publish("timeout".into()).is_transient());
        assert!(!JobError::NotFound("abc".into()).is_transient());
    }

    #[test]
    fn test_from_conductor_error() {
        let err = JobError::from(ConductorError::Database("connection reset".into()));
        assert!(matches!(err, JobError::Store(ref msg) if msg == "connection reset"));

        let err = JobError::from(ConductorError::IllegalTransition {
            from: JobStatus::Completed,
            to: JobStatus::Failed,
        });
        assert!(matches!(
            err,
            JobError::IllegalTransition {
                from: JobStatus::Completed,
                to: JobStatus::Failed
            }
        ));

        let err = JobError::from(ConductorError::not_found("Job", "42"));
        assert!(matches!(err, JobError::NotFound(ref id) if id == "42"));
    }

    #[test]
    fn test_cancelled_is_not_retryable() {
        assert!(!JobError::Cancelled.is_retryable());
        assert!(!JobError::Cancelled.is_configuration());
    }
}
