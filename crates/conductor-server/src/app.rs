//! Role-based wiring of the orchestration loops.

use conductor_config::AppConfig;
use conductor_jobs::{
    Distributor, ExecutorPool, ExecutorSettings, LockManager, LockStore, RecoverySettings,
    RecoverySweep, ResultReconciler, RetryEngine, RetrySettings, Scheduler, TaskExecutor,
    TaskRegistry, WorkQueue, WorkerHeartbeat,
};
use conductor_repository::JobStore;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// The shared stores every loop talks to.
#[derive(Clone)]
pub struct Stores {
    pub jobs: Arc<dyn JobStore>,
    pub locks: Arc<dyn LockStore>,
    pub queue: Arc<dyn WorkQueue>,
}

/// One Conductor process: the loops its role selects over shared stores.
pub struct App {
    config: AppConfig,
    stores: Stores,
    registry: Arc<TaskRegistry>,
}

impl App {
    pub fn new(config: AppConfig, stores: Stores, registry: TaskRegistry) -> Self {
        Self {
            config,
            stores,
            registry: Arc::new(registry),
        }
    }

    /// Runs until `shutdown` fires and every loop has stopped.
    pub async fn run(self, shutdown: CancellationToken) {
        let node_id = self.config.worker.id.clone();
        info!(node_id = %node_id, role = %self.config.role, "Starting loops");

        let mut loops = JoinSet::new();
        if self.config.role.runs_orchestrator() {
            self.spawn_orchestrator(&mut loops, &shutdown);
        }
        if self.config.role.runs_worker() {
            self.spawn_worker(&mut loops, &shutdown);
        }

        while let Some(joined) = loops.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Loop terminated abnormally");
            }
        }
        info!(node_id = %node_id, "All loops stopped");
    }

    fn spawn_orchestrator(&self, loops: &mut JoinSet<()>, shutdown: &CancellationToken) {
        let config = &self.config;
        let stores = &self.stores;

        let distributor = Arc::new(Distributor::new(
            stores.jobs.clone(),
            stores.queue.clone(),
            config.queue.task_topic.clone(),
            config.queue.publish_timeout(),
        ));

        let scheduler = Arc::new(Scheduler::new(
            stores.jobs.clone(),
            distributor.clone(),
            config.scheduler.batch_size,
        ));
        loops.spawn(scheduler.run(config.scheduler.interval(), shutdown.clone()));

        let reconciler = Arc::new(ResultReconciler::from_config(
            stores.jobs.clone(),
            stores.queue.clone(),
            &config.queue,
        ));
        loops.spawn(reconciler.run(format!("{}-reconciler", config.worker.id), shutdown.clone()));

        let retry = Arc::new(RetryEngine::new(
            stores.jobs.clone(),
            distributor,
            RetrySettings::from(&config.retry),
        ));
        loops.spawn(retry.run(shutdown.clone()));

        let observer = Arc::new(LockManager::new(
            stores.locks.clone(),
            config.lock.key_prefix.clone(),
            format!("{}-recovery", config.worker.id),
            config.lock.ttl(),
        ));
        let recovery = Arc::new(RecoverySweep::new(
            stores.jobs.clone(),
            observer,
            RecoverySettings::from_config(&config.worker, &config.recovery),
        ));
        loops.spawn(recovery.run(config.recovery.interval(), shutdown.clone()));

        info!("Orchestrator loops started");
    }

    fn spawn_worker(&self, loops: &mut JoinSet<()>, shutdown: &CancellationToken) {
        let config = &self.config;
        let stores = &self.stores;

        let locks = Arc::new(LockManager::new(
            stores.locks.clone(),
            config.lock.key_prefix.clone(),
            config.worker.id.clone(),
            config.lock.ttl(),
        ));
        let executor = Arc::new(TaskExecutor::new(
            stores.jobs.clone(),
            locks,
            self.registry.clone(),
            stores.queue.clone(),
            ExecutorSettings::from_config(&config.worker, &config.queue),
        ));
        let pool = ExecutorPool::new(executor);
        let pool_shutdown = shutdown.clone();
        loops.spawn(async move { pool.run(pool_shutdown).await });

        let heartbeat = Arc::new(WorkerHeartbeat::new(
            stores.locks.clone(),
            config.worker.id.clone(),
            config.worker.heartbeat_ttl(),
        ));
        loops.spawn(heartbeat.run(config.worker.heartbeat_interval(), shutdown.clone()));

        info!(task_types = ?self.registry.types(), "Worker loops started");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::EmailTask;
    use conductor_config::NodeRole;
    use conductor_core::{JobStatus, NewJob};
    use conductor_jobs::{InMemoryLockStore, InMemoryWorkQueue, JobService, JobServiceImpl};
    use conductor_repository::InMemoryJobStore;
    use std::time::Duration;

    fn fast_config(role: NodeRole) -> AppConfig {
        let mut config = AppConfig::default();
        config.role = role;
        config.worker.id = "worker-test".into();
        config.scheduler.interval_ms = 10;
        config.retry.interval_ms = 10;
        config.retry.dead_letter_interval_ms = 10;
        config.recovery.interval_ms = 1_000;
        config.worker.shutdown_timeout_secs = 1;
        config
    }

    fn stores(jobs: Arc<InMemoryJobStore>, locks: Arc<InMemoryLockStore>) -> Stores {
        Stores {
            jobs,
            locks,
            queue: Arc::new(InMemoryWorkQueue::new(3, Duration::from_millis(10))),
        }
    }

    fn registry() -> TaskRegistry {
        TaskRegistry::new()
            .with(Arc::new(EmailTask::new(Duration::ZERO)))
            .unwrap()
    }

    async fn wait_for(store: &InMemoryJobStore, id: conductor_core::JobId, status: JobStatus) {
        for _ in 0..200 {
            if store.find_by_id(id).await.unwrap().unwrap().status == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} never reached {status}");
    }

    #[tokio::test]
    async fn test_single_node_runs_job_to_completion() {
        let jobs = Arc::new(InMemoryJobStore::new());
        let locks = Arc::new(InMemoryLockStore::new());
        let app = App::new(fast_config(NodeRole::All), stores(jobs.clone(), locks.clone()), registry());

        let job = JobServiceImpl::new(jobs.clone())
            .submit(NewJob::new("welcome mail", "EMAIL", r#"{"to":"a@b.c"}"#))
            .await
            .unwrap();

        let shutdown = CancellationToken::new();
        let running = tokio::spawn(app.run(shutdown.clone()));

        wait_for(&jobs, job.id, JobStatus::Completed).await;
        assert!(WorkerHeartbeat::new(locks, "worker-test", Duration::from_secs(30))
            .is_alive("worker-test")
            .await
            .unwrap());

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_orchestrator_only_queues_without_executing() {
        let jobs = Arc::new(InMemoryJobStore::new());
        let app = App::new(
            fast_config(NodeRole::Orchestrator),
            stores(jobs.clone(), Arc::new(InMemoryLockStore::new())),
            registry(),
        );
        let job = JobServiceImpl::new(jobs.clone())
            .submit(NewJob::new("welcome mail", "EMAIL", r#"{"to":"a@b.c"}"#))
            .await
            .unwrap();

        let shutdown = CancellationToken::new();
        let running = tokio::spawn(app.run(shutdown.clone()));

        wait_for(&jobs, job.id, JobStatus::Queued).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            jobs.find_by_id(job.id).await.unwrap().unwrap().status,
            JobStatus::Queued
        );

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .unwrap()
            .unwrap();
    }
}
