//! Applies execution results to the job store.

use crate::error::{JobError, JobsResult};
use crate::messages::JobResult;
use crate::metrics::JobMetrics;
use crate::queue::{Delivery, WorkQueue};
use conductor_config::QueueConfig;
use conductor_core::JobStatus;
use conductor_repository::JobStore;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// What applying a result did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// The job moved to this status.
    Applied(JobStatus),
    /// A concurrent writer changed the job between read and write.
    Stale,
    /// The result belongs to an earlier attempt than the stored job.
    Superseded,
}

/// Consumes `JobResult`s and moves RUNNING jobs to COMPLETED or FAILED.
pub struct ResultReconciler {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn WorkQueue>,
    result_topic: String,
    consumer_group: String,
}

impl ResultReconciler {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn WorkQueue>,
        result_topic: impl Into<String>,
        consumer_group: impl Into<String>,
    ) -> Self {
        Self {
            store,
            queue,
            result_topic: result_topic.into(),
            consumer_group: consumer_group.into(),
        }
    }

    pub fn from_config(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn WorkQueue>,
        config: &QueueConfig,
    ) -> Self {
        Self::new(
            store,
            queue,
            config.result_topic.clone(),
            config.result_consumer_group.clone(),
        )
    }

    /// Applies one result with a compare-and-set on the status it read.
    ///
    /// Results from an attempt other than the job's current one are dropped.
    /// A QUEUED job gets the RUNNING the executor could not record first,
    /// using the result's `started_at`.
    pub async fn apply(&self, result: &JobResult) -> JobsResult<Reconciliation> {
        let mut job = self
            .store
            .find_by_id(result.job_id)
            .await?
            .ok_or_else(|| JobError::NotFound(result.job_id.to_string()))?;
        let expected = job.status;

        if result.retry_count != job.retry_count {
            warn!(
                job_id = %job.id,
                result_attempt = result.retry_count,
                current_attempt = job.retry_count,
                status = %job.status,
                "Dropping result of a superseded attempt"
            );
            return Ok(Reconciliation::Superseded);
        }

        if job.status == JobStatus::Queued {
            let started_at = result.started_at.unwrap_or(result.completed_at);
            job.mark_running(&result.worker_id, started_at)?;
            debug!(job_id = %job.id, "Applied implicit RUNNING from result");
        }

        if result.success {
            job.mark_completed(&result.worker_id, result.completed_at)?;
        } else {
            let reason = result
                .error_message
                .as_deref()
                .unwrap_or("execution failed without a message");
            job.mark_failed(reason, Some(&result.worker_id), result.completed_at)?;
        }

        if !self.store.update_if_status(&job, expected).await? {
            warn!(job_id = %job.id, from = %expected, "Job changed concurrently, result not applied");
            return Ok(Reconciliation::Stale);
        }

        let duration = job
            .started_at
            .and_then(|started| (result.completed_at - started).to_std().ok());
        JobMetrics::job_completed(&job.job_type, result.success, duration);
        if result.success {
            info!(job_id = %job.id, worker_id = %result.worker_id, "Job completed");
        } else {
            warn!(
                job_id = %job.id,
                worker_id = %result.worker_id,
                retry_count = job.retry_count,
                max_retries = job.max_retries,
                error = job.error_message.as_deref().unwrap_or_default(),
                "Job failed"
            );
        }

        Ok(Reconciliation::Applied(job.status))
    }

    /// Applies one delivery and acknowledges it.
    ///
    /// Only transient store failures put the result back on the queue.
    /// Results for unknown jobs and rejected transitions are logged and
    /// dropped.
    pub async fn process(&self, delivery: &Delivery) {
        let result = match delivery.decode::<JobResult>() {
            Ok(result) => result,
            Err(e) => {
                error!(message_id = %delivery.message_id, error = %e, "Dropping undecodable result message");
                self.ack(delivery).await;
                return;
            }
        };

        let span = info_span!("reconcile", job_id = %result.job_id, success = result.success);
        match self.apply(&result).instrument(span).await {
            Ok(_) => self.ack(delivery).await,
            Err(e) if e.is_transient() => {
                warn!(job_id = %result.job_id, error = %e, "Store unavailable, re-queueing result");
                if let Err(e) = self.queue.nack(delivery).await {
                    error!(job_id = %result.job_id, error = %e, "Failed to re-queue result");
                }
            }
            Err(JobError::NotFound(_)) => {
                error!(job_id = %result.job_id, "Result references unknown job, dropping");
                self.ack(delivery).await;
            }
            Err(e) => {
                error!(job_id = %result.job_id, error = %e, "Rejected result");
                self.ack(delivery).await;
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) {
        if let Err(e) = self.queue.ack(delivery).await {
            error!(message_id = %delivery.message_id, error = %e, "Failed to acknowledge result message");
        }
    }

    /// Consumes results until `shutdown` fires.
    pub async fn run(self: Arc<Self>, consumer: String, shutdown: CancellationToken) {
        info!(consumer = %consumer, topic = %self.result_topic, "Result reconciler started");
        loop {
            let received = tokio::select! {
                () = shutdown.cancelled() => break,
                received = self.queue.receive(&self.result_topic, &self.consumer_group, &consumer) => received,
            };

            match received {
                Ok(Some(delivery)) => self.process(&delivery).await,
                Ok(None) => {}
                Err(e) => {
                    error!(error = %e, "Failed to receive result");
                    tokio::select! {
                        () = shutdown.cancelled() => break,
                        () = tokio::time::sleep(RECEIVE_ERROR_BACKOFF) => {}
                    }
                }
            }
        }
        info!(consumer = %consumer, "Result reconciler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryWorkQueue;
    use crate::messages::JobTask;
    use chrono::Utc;
    use conductor_core::Job;
    use conductor_repository::InMemoryJobStore;

    fn reconciler(store: &Arc<InMemoryJobStore>, queue: &Arc<InMemoryWorkQueue>) -> ResultReconciler {
        ResultReconciler::new(store.clone(), queue.clone(), "job-results", "orchestrators")
    }

    async fn running_job(store: &InMemoryJobStore) -> Job {
        let mut job = Job::new("sync", "DATA_SYNC", "{}", 0, 3);
        job.mark_queued().unwrap();
        job.mark_running("worker-1", Utc::now()).unwrap();
        store.insert(&job).await.unwrap();
        job
    }

    #[tokio::test]
    async fn test_success_completes_job() {
        let store = Arc::new(InMemoryJobStore::new());
        let queue = Arc::new(InMemoryWorkQueue::default());
        let job = running_job(&store).await;
        let result =
            JobResult::succeeded(&JobTask::from(&job), "worker-1", job.started_at.unwrap(), Utc::now());

        let outcome = reconciler(&store, &queue).apply(&result).await.unwrap();
        assert_eq!(outcome, Reconciliation::Applied(JobStatus::Completed));

        let stored = store.find_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.completed_at, Some(result.completed_at));
        assert!(stored.error_message.is_none());
    }

    #[tokio::test]
    async fn test_failure_records_error_and_worker() {
        let store = Arc::new(InMemoryJobStore::new());
        let queue = Arc::new(InMemoryWorkQueue::default());
        let job = running_job(&store).await;
        let result = JobResult::failed(
            &JobTask::from(&job),
            "worker-2",
            "api returned 503",
            Utc::now(),
            Utc::now(),
        );

        reconciler(&store, &queue).apply(&result).await.unwrap();

        let stored = store.find_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.error_message.as_deref(), Some("api returned 503"));
        assert_eq!(stored.worker_id.as_deref(), Some("worker-2"));
        assert_eq!(stored.retry_count, 0);
    }

    #[tokio::test]
    async fn test_queued_job_gets_implicit_running() {
        let store = Arc::new(InMemoryJobStore::new());
        let queue = Arc::new(InMemoryWorkQueue::default());
        let mut job = Job::new("sync", "DATA_SYNC", "{}", 0, 3);
        job.mark_queued().unwrap();
        store.insert(&job).await.unwrap();
        let started = Utc::now();
        let result = JobResult::succeeded(&JobTask::from(&job), "worker-1", started, Utc::now());

        reconciler(&store, &queue).apply(&result).await.unwrap();

        let stored = store.find_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.started_at, Some(started));
    }

    #[tokio::test]
    async fn test_result_of_earlier_attempt_is_superseded() {
        let store = Arc::new(InMemoryJobStore::new());
        let queue = Arc::new(InMemoryWorkQueue::new(1, Duration::from_millis(10)));
        let job = running_job(&store).await;
        let first_attempt = JobTask::from(&job);
        let first_started = job.started_at;

        // The first attempt is lost and the job is re-queued as attempt 1.
        let mut retried = job.clone();
        retried.mark_failed("worker lost", None, Utc::now()).unwrap();
        retried.mark_retrying().unwrap();
        retried.mark_queued().unwrap();
        assert!(store.update_if_status(&retried, JobStatus::Running).await.unwrap());

        let late = JobResult::failed(&first_attempt, "worker-1", "attempt 0 error", Utc::now(), Utc::now());
        let body = serde_json::to_string(&late).unwrap();
        queue.publish("job-results", job.id, &body).await.unwrap();
        let delivery = queue.receive("job-results", "orchestrators", "o").await.unwrap().unwrap();

        let reconciler = reconciler(&store, &queue);
        assert_eq!(reconciler.apply(&late).await.unwrap(), Reconciliation::Superseded);
        reconciler.process(&delivery).await;
        assert_eq!(queue.stats("job-results").acked, 1);

        let stored = store.find_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Queued);
        assert_eq!(stored.retry_count, 1);
        assert!(stored.error_message.is_none());
        assert_eq!(stored.started_at, first_started);
    }

    #[tokio::test]
    async fn test_duplicate_result_is_rejected() {
        let store = Arc::new(InMemoryJobStore::new());
        let queue = Arc::new(InMemoryWorkQueue::default());
        let job = running_job(&store).await;
        let result = JobResult::succeeded(&JobTask::from(&job), "worker-1", Utc::now(), Utc::now());
        let reconciler = reconciler(&store, &queue);

        reconciler.apply(&result).await.unwrap();
        let err = reconciler.apply(&result).await.unwrap_err();
        assert!(matches!(
            err,
            JobError::IllegalTransition {
                from: JobStatus::Completed,
                to: JobStatus::Completed
            }
        ));
    }

    #[tokio::test]
    async fn test_unknown_job_is_acked_and_dropped() {
        let store = Arc::new(InMemoryJobStore::new());
        let queue = Arc::new(InMemoryWorkQueue::new(1, Duration::from_millis(10)));
        let task = JobTask::from(&Job::new("gone", "EMAIL", "{}", 0, 3));
        let body = serde_json::to_string(&JobResult::succeeded(&task, "w", Utc::now(), Utc::now())).unwrap();
        queue.publish("job-results", task.job_id, &body).await.unwrap();
        let delivery = queue.receive("job-results", "orchestrators", "o").await.unwrap().unwrap();

        reconciler(&store, &queue).process(&delivery).await;

        let stats = queue.stats("job-results");
        assert_eq!(stats.acked, 1);
        assert_eq!(stats.nacked, 0);
        assert_eq!(stats.ready, 0);
    }

    #[tokio::test]
    async fn test_store_outage_requeues_result() {
        let store = Arc::new(InMemoryJobStore::new());
        let queue = Arc::new(InMemoryWorkQueue::new(1, Duration::from_millis(10)));
        let job = running_job(&store).await;
        let task = JobTask::from(&job);
        let body = serde_json::to_string(&JobResult::succeeded(&task, "w", Utc::now(), Utc::now())).unwrap();
        queue.publish("job-results", job.id, &body).await.unwrap();
        let delivery = queue.receive("job-results", "orchestrators", "o").await.unwrap().unwrap();

        store.set_unavailable(true);
        reconciler(&store, &queue).process(&delivery).await;

        let stats = queue.stats("job-results");
        assert_eq!(stats.nacked, 1);
        assert_eq!(stats.ready, 1);

        // Once the store is back the redelivered result lands.
        store.set_unavailable(false);
        let redelivered = queue.receive("job-results", "orchestrators", "o").await.unwrap().unwrap();
        reconciler(&store, &queue).process(&redelivered).await;
        assert_eq!(
            store.find_by_id(job.id).await.unwrap().unwrap().status,
            JobStatus::Completed
        );
    }
}
