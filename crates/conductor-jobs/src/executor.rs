//! Task execution on workers.
//!
//! A consumer takes one `JobTask` at a time, takes the job's lease, records
//! the start, runs the implementation under a hard timeout and publishes
//! exactly one `JobResult`. The task message is always acknowledged; failed
//! attempts are retried from the job store by the retry engine, never by
//! redelivering the task.

use crate::error::{JobsResult, EXECUTION_TIMEOUT};
use crate::lock::LockManager;
use crate::messages::{JobResult, JobTask};
use crate::metrics::JobMetrics;
use crate::queue::{Delivery, WorkQueue};
use crate::registry::{TaskContext, TaskRegistry};
use chrono::{DateTime, Utc};
use conductor_config::{QueueConfig, WorkerConfig};
use conductor_core::JobStatus;
use conductor_repository::JobStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Pause after a failed receive before polling again.
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Time a timed-out attempt gets to observe its cancellation before it is
/// aborted.
pub const ABORT_GRACE: Duration = Duration::from_secs(5);

/// Worker-side settings.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub worker_id: String,
    pub job_timeout: Duration,
    pub task_topic: String,
    pub result_topic: String,
    pub consumer_group: String,
    pub concurrency: usize,
    pub shutdown_timeout: Duration,
}

impl ExecutorSettings {
    pub fn from_config(worker: &WorkerConfig, queue: &QueueConfig) -> Self {
        Self {
            worker_id: worker.id.clone(),
            job_timeout: worker.job_timeout(),
            task_topic: queue.task_topic.clone(),
            result_topic: queue.result_topic.clone(),
            consumer_group: queue.task_consumer_group.clone(),
            concurrency: worker.concurrency.max(1),
            shutdown_timeout: worker.shutdown_timeout(),
        }
    }
}

/// What happened to one task message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Execution {
    /// Another worker holds the lease; nothing ran.
    LockHeld,
    /// The job was no longer QUEUED for this attempt; nothing ran.
    NotQueued,
    /// An attempt ran and this result was published.
    Finished(JobResult),
}

/// Executes job tasks under a lease and a wall-clock timeout.
pub struct TaskExecutor {
    store: Arc<dyn JobStore>,
    locks: Arc<LockManager>,
    registry: Arc<TaskRegistry>,
    queue: Arc<dyn WorkQueue>,
    settings: ExecutorSettings,
}

impl TaskExecutor {
    pub fn new(
        store: Arc<dyn JobStore>,
        locks: Arc<LockManager>,
        registry: Arc<TaskRegistry>,
        queue: Arc<dyn WorkQueue>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            store,
            locks,
            registry,
            queue,
            settings,
        }
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Handles one delivery and acknowledges it, whatever the outcome.
    pub async fn process(&self, delivery: &Delivery) {
        match delivery.decode::<JobTask>() {
            Ok(task) => {
                let span = info_span!(
                    "execute_task",
                    job_id = %task.job_id,
                    job_type = %task.job_type,
                    retry_count = task.retry_count,
                    worker_id = %self.settings.worker_id,
                );
                if let Err(e) = self.handle(&task).instrument(span).await {
                    error!(job_id = %task.job_id, error = %e, "Task handling failed");
                }
            }
            Err(e) => {
                error!(message_id = %delivery.message_id, error = %e, "Dropping undecodable task message");
            }
        }

        if let Err(e) = self.queue.ack(delivery).await {
            error!(message_id = %delivery.message_id, error = %e, "Failed to acknowledge task message");
        }
    }

    /// Runs one task if this worker wins its lease.
    pub async fn handle(&self, task: &JobTask) -> JobsResult<Execution> {
        let acquired = match self.locks.acquire(task.job_id).await {
            Ok(acquired) => acquired,
            Err(e) => {
                // Without the lease we cannot execute safely; hand the job
                // to the retry engine instead of leaving it QUEUED.
                self.fail_job(
                    task,
                    &[JobStatus::Queued],
                    &format!("lock store unavailable: {e}"),
                )
                .await;
                return Err(e);
            }
        };
        if !acquired {
            JobMetrics::lock_contended();
            debug!(job_id = %task.job_id, "Lease held elsewhere, skipping task");
            return Ok(Execution::LockHeld);
        }

        let outcome = self.execute_locked(task).await;

        if let Err(e) = self.locks.release(task.job_id).await {
            warn!(job_id = %task.job_id, error = %e, "Failed to release job lease");
        }
        outcome
    }

    async fn execute_locked(&self, task: &JobTask) -> JobsResult<Execution> {
        let started_at = Utc::now();
        match self.record_running(task, started_at).await {
            Ok(true) => {}
            Ok(false) => return Ok(Execution::NotQueued),
            Err(e) => {
                // The reconciler applies the implicit QUEUED -> RUNNING from
                // the result's started_at.
                warn!(job_id = %task.job_id, error = %e, "Could not record job start, executing anyway");
            }
        }

        let result = self.run_attempt(task, started_at).await;
        let body = serde_json::to_string(&result)?;
        if let Err(e) = self
            .queue
            .publish(&self.settings.result_topic, task.job_id, &body)
            .await
        {
            // Still holding the lease, so nobody else can be running it.
            error!(job_id = %task.job_id, error = %e, "Failed to publish result");
            self.fail_job(
                task,
                &[JobStatus::Queued, JobStatus::Running],
                &format!("result not delivered: {e}"),
            )
            .await;
            return Err(e);
        }
        Ok(Execution::Finished(result))
    }

    async fn record_running(&self, task: &JobTask, started_at: DateTime<Utc>) -> JobsResult<bool> {
        let Some(mut job) = self.store.find_by_id(task.job_id).await? else {
            warn!(job_id = %task.job_id, "Task references a job missing from the store");
            return Ok(false);
        };
        if job.status != JobStatus::Queued {
            debug!(job_id = %task.job_id, status = %job.status, "Job is no longer queued, skipping");
            return Ok(false);
        }
        if job.retry_count != task.retry_count {
            debug!(
                job_id = %task.job_id,
                attempt = task.retry_count,
                current = job.retry_count,
                "Task belongs to an earlier attempt, skipping"
            );
            return Ok(false);
        }

        job.mark_running(&self.settings.worker_id, started_at)?;
        let recorded = self.store.update_if_status(&job, JobStatus::Queued).await?;
        if recorded {
            info!(job_id = %task.job_id, "Job running");
        }
        Ok(recorded)
    }

    async fn run_attempt(&self, task: &JobTask, started_at: DateTime<Utc>) -> JobResult {
        let worker_id = self.settings.worker_id.as_str();

        let implementation = match self.registry.resolve(&task.job_type) {
            Ok(implementation) => implementation,
            Err(e) => {
                error!(job_type = %task.job_type, "No task implementation registered for job type");
                return JobResult::failed(task, worker_id, e.to_string(), started_at, Utc::now());
            }
        };

        let ctx = TaskContext::new(task.job_id, &task.job_type, task.retry_count, worker_id);
        let cancel = ctx.cancellation_token();
        let payload = task.payload.clone();
        let attempt = tokio::spawn(
            async move { implementation.execute(&payload, &ctx).await }.in_current_span(),
        );
        let abort = attempt.abort_handle();

        let outcome = tokio::time::timeout(self.settings.job_timeout, attempt).await;
        let completed_at = Utc::now();

        match outcome {
            Ok(Ok(Ok(()))) => {
                info!(job_id = %task.job_id, "Task completed");
                JobResult::succeeded(task, worker_id, started_at, completed_at)
            }
            Ok(Ok(Err(e))) => {
                warn!(job_id = %task.job_id, error = %e, "Task failed");
                JobResult::failed(task, worker_id, e.to_string(), started_at, completed_at)
            }
            Ok(Err(join_error)) => {
                error!(job_id = %task.job_id, error = %join_error, "Task aborted");
                JobResult::failed(
                    task,
                    worker_id,
                    format!("task aborted: {join_error}"),
                    started_at,
                    completed_at,
                )
            }
            Err(_) => {
                // Signal and move on. An attempt that ignores the token is
                // aborted once the grace period ends.
                cancel.cancel();
                tokio::spawn(async move {
                    tokio::time::sleep(ABORT_GRACE).await;
                    abort.abort();
                });
                JobMetrics::job_timed_out(&task.job_type);
                warn!(
                    job_id = %task.job_id,
                    timeout_secs = self.settings.job_timeout.as_secs(),
                    "Task exceeded its timeout"
                );
                JobResult::failed(task, worker_id, EXECUTION_TIMEOUT, started_at, completed_at)
            }
        }
    }

    /// Fails the task's attempt directly in the store when no result will
    /// reach the reconciler.
    async fn fail_job(&self, task: &JobTask, from: &[JobStatus], reason: &str) {
        match self.try_fail_job(task, from, reason).await {
            Ok(true) => warn!(job_id = %task.job_id, reason, "Job failed by worker"),
            Ok(false) => {}
            Err(e) => error!(job_id = %task.job_id, error = %e, "Could not mark job failed"),
        }
    }

    async fn try_fail_job(&self, task: &JobTask, from: &[JobStatus], reason: &str) -> JobsResult<bool> {
        let Some(mut job) = self.store.find_by_id(task.job_id).await? else {
            return Ok(false);
        };
        let expected = job.status;
        if !from.contains(&expected) || job.retry_count != task.retry_count {
            return Ok(false);
        }
        job.mark_failed(reason, Some(&self.settings.worker_id), Utc::now())?;
        Ok(self.store.update_if_status(&job, expected).await?)
    }

    /// Consumer loop: one delivery at a time until `shutdown` fires.
    ///
    /// A delivery already being processed runs to completion.
    pub async fn consume(&self, consumer: &str, shutdown: &CancellationToken) {
        info!(consumer, topic = %self.settings.task_topic, "Task consumer started");
        loop {
            let received = tokio::select! {
                () = shutdown.cancelled() => break,
                received = self.queue.receive(
                    &self.settings.task_topic,
                    &self.settings.consumer_group,
                    consumer,
                ) => received,
            };

            match received {
                Ok(Some(delivery)) => self.process(&delivery).await,
                Ok(None) => {}
                Err(e) => {
                    error!(consumer, error = %e, "Failed to receive task");
                    tokio::select! {
                        () = shutdown.cancelled() => break,
                        () = tokio::time::sleep(RECEIVE_ERROR_BACKOFF) => {}
                    }
                }
            }
        }
        info!(consumer, "Task consumer stopped");
    }
}

/// Bounded pool of task consumers on one worker.
pub struct ExecutorPool {
    executor: Arc<TaskExecutor>,
}

impl ExecutorPool {
    pub fn new(executor: Arc<TaskExecutor>) -> Self {
        Self { executor }
    }

    /// Runs `concurrency` consumers until `shutdown` fires, then waits up to
    /// the shutdown timeout for in-flight tasks.
    pub async fn run(&self, shutdown: CancellationToken) {
        let settings = self.executor.settings().clone();
        info!(
            worker_id = %settings.worker_id,
            concurrency = settings.concurrency,
            "Starting executor pool"
        );

        let mut consumers = JoinSet::new();
        for index in 0..settings.concurrency {
            let executor = self.executor.clone();
            let shutdown = shutdown.clone();
            let consumer = format!("{}-{index}", settings.worker_id);
            consumers.spawn(async move { executor.consume(&consumer, &shutdown).await });
        }

        shutdown.cancelled().await;
        info!(worker_id = %settings.worker_id, "Waiting for in-flight tasks...");

        let drained = tokio::time::timeout(settings.shutdown_timeout, async {
            while consumers.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                timeout_secs = settings.shutdown_timeout.as_secs(),
                "Shutdown timeout elapsed, abandoning in-flight tasks"
            );
            consumers.abort_all();
        }

        info!(worker_id = %settings.worker_id, "Executor pool stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JobError;
    use crate::memory::{InMemoryLockStore, InMemoryWorkQueue};
    use crate::registry::Task;
    use async_trait::async_trait;
    use conductor_core::Job;
    use conductor_repository::InMemoryJobStore;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Succeed;

    #[async_trait]
    impl Task for Succeed {
        fn task_type(&self) -> &str {
            "EMAIL"
        }

        async fn execute(&self, _payload: &str, _ctx: &TaskContext) -> JobsResult<()> {
            Ok(())
        }
    }

    /// Ignores cancellation; flags `dropped` once its future is torn down.
    struct Hang {
        dropped: Arc<AtomicBool>,
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Task for Hang {
        fn task_type(&self) -> &str {
            "HANG"
        }

        async fn execute(&self, _payload: &str, _ctx: &TaskContext) -> JobsResult<()> {
            let _flag = DropFlag(self.dropped.clone());
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    struct Fixture {
        store: Arc<InMemoryJobStore>,
        locks: Arc<LockManager>,
        lock_store: Arc<InMemoryLockStore>,
        queue: Arc<InMemoryWorkQueue>,
        executor: TaskExecutor,
        hang_dropped: Arc<AtomicBool>,
    }

    fn fixture(timeout: Duration) -> Fixture {
        let store = Arc::new(InMemoryJobStore::new());
        let lock_store = Arc::new(InMemoryLockStore::new());
        let locks = Arc::new(LockManager::new(
            lock_store.clone(),
            "job:lock",
            "worker-1",
            Duration::from_secs(660),
        ));
        let queue = Arc::new(InMemoryWorkQueue::new(2, Duration::from_millis(10)));
        let hang_dropped = Arc::new(AtomicBool::new(false));
        let registry = TaskRegistry::new()
            .with(Arc::new(Succeed))
            .unwrap()
            .with(Arc::new(Hang {
                dropped: hang_dropped.clone(),
            }))
            .unwrap();
        let settings = ExecutorSettings {
            worker_id: "worker-1".into(),
            job_timeout: timeout,
            task_topic: "job-tasks".into(),
            result_topic: "job-results".into(),
            consumer_group: "workers".into(),
            concurrency: 1,
            shutdown_timeout: Duration::from_secs(1),
        };
        let executor = TaskExecutor::new(
            store.clone(),
            locks.clone(),
            Arc::new(registry),
            queue.clone(),
            settings,
        );
        Fixture {
            store,
            locks,
            lock_store,
            queue,
            executor,
            hang_dropped,
        }
    }

    async fn queued_job(store: &InMemoryJobStore, job_type: &str) -> Job {
        let mut job = Job::new("job", job_type, "{}", 0, 3);
        job.mark_queued().unwrap();
        store.insert(&job).await.unwrap();
        job
    }

    #[tokio::test]
    async fn test_success_records_running_and_publishes_result() {
        let f = fixture(Duration::from_secs(5));
        let job = queued_job(&f.store, "EMAIL").await;

        let execution = f.executor.handle(&JobTask::from(&job)).await.unwrap();
        let Execution::Finished(result) = execution else {
            panic!("expected a result, got {execution:?}");
        };
        assert!(result.success);
        assert_eq!(result.worker_id, "worker-1");

        let stored = f.store.find_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Running);
        assert_eq!(stored.worker_id.as_deref(), Some("worker-1"));
        assert_eq!(f.queue.stats("job-results").published, 1);
        assert!(f.locks.holder(job.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_held_lease_skips_without_result() {
        let f = fixture(Duration::from_secs(5));
        let job = queued_job(&f.store, "EMAIL").await;
        let other = LockManager::new(
            f.lock_store.clone(),
            "job:lock",
            "worker-2",
            Duration::from_secs(660),
        );
        assert!(other.acquire(job.id).await.unwrap());

        let execution = f.executor.handle(&JobTask::from(&job)).await.unwrap();
        assert_eq!(execution, Execution::LockHeld);
        assert_eq!(f.queue.stats("job-results").published, 0);
        assert_eq!(
            f.store.find_by_id(job.id).await.unwrap().unwrap().status,
            JobStatus::Queued
        );
        // The other worker's lease is untouched.
        assert_eq!(other.holder(job.id).await.unwrap().as_deref(), Some("worker-2"));
    }

    #[tokio::test]
    async fn test_cancelled_job_is_not_executed() {
        let f = fixture(Duration::from_secs(5));
        let mut job = queued_job(&f.store, "EMAIL").await;
        job.mark_cancelled().unwrap();
        assert!(f.store.update_if_status(&job, JobStatus::Queued).await.unwrap());

        let execution = f.executor.handle(&JobTask::from(&job)).await.unwrap();
        assert_eq!(execution, Execution::NotQueued);
        assert_eq!(f.queue.stats("job-results").published, 0);
        assert!(f.locks.holder(job.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_task_of_earlier_attempt_is_not_executed() {
        let f = fixture(Duration::from_secs(5));
        let job = queued_job(&f.store, "EMAIL").await;
        let stale = JobTask::from(&job);

        let mut current = job.clone();
        current.retry_count = 1;
        assert!(f.store.update_if_status(&current, JobStatus::Queued).await.unwrap());

        let execution = f.executor.handle(&stale).await.unwrap();
        assert_eq!(execution, Execution::NotQueued);
        assert_eq!(f.queue.stats("job-results").published, 0);
        let stored = f.store.find_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Queued);
        assert!(stored.worker_id.is_none());
    }

    #[tokio::test]
    async fn test_unknown_type_reports_configuration_failure() {
        let f = fixture(Duration::from_secs(5));
        let job = queued_job(&f.store, "FAX").await;

        let Execution::Finished(result) = f.executor.handle(&JobTask::from(&job)).await.unwrap()
        else {
            panic!("expected a result");
        };
        assert!(!result.success);
        assert_eq!(
            result.error_message.as_deref(),
            Some(JobError::UnknownTaskType("FAX".into()).to_string().as_str())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_reports_and_releases_lease() {
        let timeout = Duration::from_secs(30);
        let f = fixture(timeout);
        let job = queued_job(&f.store, "HANG").await;

        let began = tokio::time::Instant::now();
        let Execution::Finished(result) = f.executor.handle(&JobTask::from(&job)).await.unwrap()
        else {
            panic!("expected a result");
        };
        let elapsed = began.elapsed();
        assert!(elapsed >= timeout);
        assert!(elapsed <= timeout + Duration::from_millis(100), "result after {elapsed:?}");

        assert!(!result.success);
        assert_eq!(result.error_message.as_deref(), Some(EXECUTION_TIMEOUT));
        assert_eq!(f.queue.stats("job-results").published, 1);
        assert!(f.locks.holder(job.id).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_attempt_is_aborted_after_grace() {
        let f = fixture(Duration::from_secs(30));
        let job = queued_job(&f.store, "HANG").await;

        f.executor.handle(&JobTask::from(&job)).await.unwrap();
        assert!(!f.hang_dropped.load(Ordering::SeqCst));

        tokio::time::sleep(ABORT_GRACE + Duration::from_secs(1)).await;
        for _ in 0..10 {
            if f.hang_dropped.load(Ordering::SeqCst) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(f.hang_dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_result_carries_attempt() {
        let f = fixture(Duration::from_secs(5));
        let mut job = Job::new("job", "EMAIL", "{}", 0, 3);
        job.retry_count = 2;
        job.mark_queued().unwrap();
        f.store.insert(&job).await.unwrap();

        let Execution::Finished(result) = f.executor.handle(&JobTask::from(&job)).await.unwrap()
        else {
            panic!("expected a result");
        };
        assert_eq!(result.retry_count, 2);
    }

    #[tokio::test]
    async fn test_undeliverable_result_fails_job() {
        let f = fixture(Duration::from_secs(5));
        let job = queued_job(&f.store, "EMAIL").await;
        f.queue.set_publish_failure(true);

        assert!(f.executor.handle(&JobTask::from(&job)).await.is_err());

        let stored = f.store.find_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert!(stored
            .error_message
            .unwrap()
            .starts_with("result not delivered"));
        assert_eq!(stored.worker_id.as_deref(), Some("worker-1"));
        assert!(f.locks.holder(job.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lock_store_outage_fails_queued_job() {
        let f = fixture(Duration::from_secs(5));
        let job = queued_job(&f.store, "EMAIL").await;
        f.lock_store.set_unavailable(true);

        assert!(f.executor.handle(&JobTask::from(&job)).await.is_err());
        let stored = f.store.find_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert!(stored
            .error_message
            .unwrap()
            .starts_with("lock store unavailable"));
    }

    #[tokio::test]
    async fn test_process_acknowledges_undecodable_message() {
        let f = fixture(Duration::from_secs(5));
        f.queue
            .publish("job-tasks", conductor_core::JobId::new(), "not json")
            .await
            .unwrap();
        let delivery = f
            .queue
            .receive("job-tasks", "workers", "c")
            .await
            .unwrap()
            .unwrap();

        f.executor.process(&delivery).await;
        assert_eq!(f.queue.stats("job-tasks").acked, 1);
    }
}
