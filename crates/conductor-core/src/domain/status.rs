//! Job lifecycle status and its transition graph.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a job.
///
/// ```text
/// PENDING ──► QUEUED ──► RUNNING ──► COMPLETED
///    │          │           │
///    │          │           ▼
///    └──────────┴──────►  FAILED ──► DEAD_LETTER
///    │          │           │  ▲
///    ▼          ▼           ▼  │
///   CANCELLED            RETRYING ──► QUEUED
/// ```
///
/// `COMPLETED`, `DEAD_LETTER` and `CANCELLED` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Created, not yet published to the work queue.
    #[default]
    Pending,
    /// Published and waiting for a worker.
    Queued,
    /// A worker holds the lease and is executing it.
    Running,
    /// Finished successfully.
    Completed,
    /// The last attempt failed; retry budget decides what happens next.
    Failed,
    /// Selected for another attempt, about to be re-queued.
    Retrying,
    /// Retry budget exhausted. Needs an operator.
    DeadLetter,
    /// Withdrawn before execution started.
    Cancelled,
}

impl JobStatus {
    /// Returns true if `next` is a legal successor of this status.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Queued | Self::Failed | Self::Cancelled)
                | (Self::Queued, Self::Running | Self::Failed | Self::Cancelled)
                | (Self::Running, Self::Completed | Self::Failed)
                | (Self::Failed, Self::Retrying | Self::DeadLetter)
                | (Self::Retrying, Self::Queued | Self::Failed)
        )
    }

    /// Terminal statuses have no outgoing transitions.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::DeadLetter | Self::Cancelled)
    }

    /// Cancellation is only allowed before execution starts.
    #[must_use]
    pub const fn is_cancellable(&self) -> bool {
        matches!(self, Self::Pending | Self::Queued)
    }

    /// Returns the storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Retrying => "RETRYING",
            Self::DeadLetter => "DEAD_LETTER",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Returns all statuses.
    #[must_use]
    pub const fn all() -> [Self; 8] {
        [
            Self::Pending,
            Self::Queued,
            Self::Running,
            Self::Completed,
            Self::Failed,
            Self::Retrying,
            Self::DeadLetter,
            Self::Cancelled,
        ]
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown job status: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_is_allowed() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Queued));
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Completed));
    }

    #[test]
    fn test_retry_path_is_allowed() {
        assert!(JobStatus::Running.can_transition_to(JobStatus::Failed));
        assert!(JobStatus::Failed.can_transition_to(JobStatus::Retrying));
        assert!(JobStatus::Retrying.can_transition_to(JobStatus::Queued));
        assert!(JobStatus::Failed.can_transition_to(JobStatus::DeadLetter));
    }

    #[test]
    fn test_terminal_statuses_have_no_successors() {
        for terminal in [JobStatus::Completed, JobStatus::DeadLetter, JobStatus::Cancelled] {
            assert!(terminal.is_terminal());
            for next in JobStatus::all() {
                assert!(
                    !terminal.can_transition_to(next),
                    "{terminal} must not move to {next}"
                );
            }
        }
    }

    #[test]
    fn test_forbidden_shortcuts() {
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::Queued.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Queued));
        assert!(!JobStatus::Running.can_transition_to(JobStatus::DeadLetter));
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Cancelled));
        assert!(!JobStatus::Retrying.can_transition_to(JobStatus::Running));
    }

    #[test]
    fn test_no_self_loops() {
        for status in JobStatus::all() {
            assert!(!status.can_transition_to(status));
        }
    }

    #[test]
    fn test_cancellable_only_before_execution() {
        let cancellable: Vec<_> = JobStatus::all()
            .into_iter()
            .filter(JobStatus::is_cancellable)
            .collect();
        assert_eq!(cancellable, vec![JobStatus::Pending, JobStatus::Queued]);
    }

    #[test]
    fn test_display_and_parse() {
        assert_eq!(JobStatus::DeadLetter.to_string(), "DEAD_LETTER");
        assert_eq!("dead_letter".parse::<JobStatus>(), Ok(JobStatus::DeadLetter));
        assert!("bogus".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_serialization() {
        let json = serde_json::to_string(&JobStatus::Retrying).unwrap();
        assert_eq!(json, "\"RETRYING\"");
        let back: JobStatus = serde_json::from_str("\"QUEUED\"").unwrap();
        assert_eq!(back, JobStatus::Queued);
    }
}
