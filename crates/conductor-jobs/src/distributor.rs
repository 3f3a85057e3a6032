//! Moves jobs onto the work queue.

use crate::error::{JobError, JobsResult};
use crate::messages::JobTask;
use crate::metrics::JobMetrics;
use crate::queue::WorkQueue;
use chrono::Utc;
use conductor_core::{Job, JobStatus};
use conductor_repository::JobStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Result of one distribution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distribution {
    /// QUEUED and published.
    Queued,
    /// A concurrent writer moved the job first; nothing was published.
    Skipped,
    /// Publishing failed and the job was marked FAILED for the retry engine.
    PublishFailed,
}

/// Transitions a job to QUEUED and publishes its `JobTask`.
///
/// Shared by the scheduler (first attempts) and the retry engine (retries);
/// the two are only told apart by the retry count in the task.
pub struct Distributor {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn WorkQueue>,
    task_topic: String,
    publish_timeout: Duration,
}

impl Distributor {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn WorkQueue>,
        task_topic: impl Into<String>,
        publish_timeout: Duration,
    ) -> Self {
        Self {
            store,
            queue,
            task_topic: task_topic.into(),
            publish_timeout,
        }
    }

    /// Distributes a PENDING or RETRYING job.
    ///
    /// The publish is never retried here. On failure the job goes to FAILED
    /// with `completed_at` set, which makes it a retry candidate.
    pub async fn distribute(&self, mut job: Job) -> JobsResult<Distribution> {
        let expected = job.status;
        job.mark_queued()?;
        if !self.store.update_if_status(&job, expected).await? {
            debug!(job_id = %job.id, from = %expected, "Job moved concurrently, not distributing");
            return Ok(Distribution::Skipped);
        }

        JobMetrics::job_queued(&job.job_type);
        info!(
            job_id = %job.id,
            job_type = %job.job_type,
            priority = job.priority,
            retry_count = job.retry_count,
            "Job queued"
        );

        match self.publish(&job).await {
            Ok(()) => Ok(Distribution::Queued),
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Failed to publish job task");
                self.fail_queued(job, &format!("failed to publish job task: {e}"))
                    .await?;
                Ok(Distribution::PublishFailed)
            }
        }
    }

    async fn publish(&self, job: &Job) -> JobsResult<()> {
        let body = serde_json::to_string(&JobTask::from(job))?;
        tokio::time::timeout(
            self.publish_timeout,
            self.queue.publish(&self.task_topic, job.id, &body),
        )
        .await
        .map_err(|_| {
            JobError::Publish(format!(
                "timed out after {}ms",
                self.publish_timeout.as_millis()
            ))
        })?
    }

    async fn fail_queued(&self, mut job: Job, reason: &str) -> JobsResult<()> {
        job.mark_failed(reason, None, Utc::now())?;
        if !self.store.update_if_status(&job, JobStatus::Queued).await? {
            // Cancelled or picked up in the meantime.
            debug!(job_id = %job.id, "Job left QUEUED before it could be failed");
            return Ok(());
        }
        error!(job_id = %job.id, error = reason, "Job failed during distribution");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryWorkQueue;
    use conductor_repository::InMemoryJobStore;

    fn distributor(store: &Arc<InMemoryJobStore>, queue: &Arc<InMemoryWorkQueue>) -> Distributor {
        Distributor::new(store.clone(), queue.clone(), "job-tasks", Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_pending_job_is_queued_and_published() {
        let store = Arc::new(InMemoryJobStore::new());
        let queue = Arc::new(InMemoryWorkQueue::default());
        let job = Job::new("welcome", "EMAIL", "{}", 5, 3);
        store.insert(&job).await.unwrap();

        let outcome = distributor(&store, &queue).distribute(job.clone()).await.unwrap();
        assert_eq!(outcome, Distribution::Queued);
        assert_eq!(
            store.find_by_id(job.id).await.unwrap().unwrap().status,
            JobStatus::Queued
        );

        let payloads = queue.ready_payloads("job-tasks");
        assert_eq!(payloads.len(), 1);
        let task: JobTask = serde_json::from_str(&payloads[0]).unwrap();
        assert_eq!(task.job_id, job.id);
        assert_eq!(task.job_type, "EMAIL");
    }

    #[tokio::test]
    async fn test_stale_snapshot_is_skipped() {
        let store = Arc::new(InMemoryJobStore::new());
        let queue = Arc::new(InMemoryWorkQueue::default());
        let job = Job::new("welcome", "EMAIL", "{}", 5, 3);
        store.insert(&job).await.unwrap();
        let distributor = distributor(&store, &queue);

        assert_eq!(
            distributor.distribute(job.clone()).await.unwrap(),
            Distribution::Queued
        );
        // Same PENDING snapshot again, as a concurrent scheduler run would.
        assert_eq!(
            distributor.distribute(job).await.unwrap(),
            Distribution::Skipped
        );
        assert_eq!(queue.stats("job-tasks").published, 1);
    }

    #[tokio::test]
    async fn test_publish_failure_marks_job_failed() {
        let store = Arc::new(InMemoryJobStore::new());
        let queue = Arc::new(InMemoryWorkQueue::default());
        queue.set_publish_failure(true);
        let job = Job::new("welcome", "EMAIL", "{}", 5, 3);
        store.insert(&job).await.unwrap();

        let outcome = distributor(&store, &queue).distribute(job.clone()).await.unwrap();
        assert_eq!(outcome, Distribution::PublishFailed);

        let stored = store.find_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert!(stored.completed_at.is_some());
        assert_eq!(stored.retry_count, 0);
        assert!(stored
            .error_message
            .unwrap()
            .starts_with("failed to publish job task"));
    }

    #[tokio::test]
    async fn test_terminal_job_is_rejected() {
        let store = Arc::new(InMemoryJobStore::new());
        let queue = Arc::new(InMemoryWorkQueue::default());
        let mut job = Job::new("welcome", "EMAIL", "{}", 5, 3);
        job.mark_cancelled().unwrap();

        let err = distributor(&store, &queue).distribute(job).await.unwrap_err();
        assert!(matches!(
            err,
            JobError::IllegalTransition {
                from: JobStatus::Cancelled,
                to: JobStatus::Queued
            }
        ));
    }
}
