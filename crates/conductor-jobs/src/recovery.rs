//! Recovery of jobs orphaned by a lost worker.
//!
//! A worker that dies after taking the lease but before publishing a result
//! leaves its job RUNNING. Once the job has been running longer than the
//! execution timeout plus a grace period and its lease is gone, the sweep
//! fails it so the retry engine takes over.
//!
//! A worker that dies after receiving a task but before taking the lease
//! leaves its job QUEUED. The queue hands such a task to another consumer
//! once it has been idle for the reclaim window; a job still QUEUED well past
//! that window has lost its task and is failed the same way.

use crate::error::JobsResult;
use crate::lock::LockManager;
use crate::metrics::JobMetrics;
use crate::periodic::{run_periodic, SweepReport};
use chrono::{DateTime, Utc};
use conductor_config::{RecoveryConfig, WorkerConfig};
use conductor_core::{Job, JobStatus};
use conductor_repository::JobStore;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Error recorded on RUNNING jobs failed by the sweep.
pub const WORKER_LOST: &str = "worker lost: no live execution lease";

/// Error recorded on QUEUED jobs failed by the sweep.
pub const TASK_LOST: &str = "task lost: never picked up from the queue";

#[derive(Debug, Clone)]
pub struct RecoverySettings {
    /// Age of `started_at` after which a RUNNING job is considered orphaned.
    pub running_stale_after: Duration,
    /// Age of `queued_at` after which a QUEUED job is considered orphaned.
    /// Must exceed the queue's reclaim idle time.
    pub queued_stale_after: Duration,
    pub batch_size: u32,
}

impl RecoverySettings {
    pub fn from_config(worker: &WorkerConfig, recovery: &RecoveryConfig) -> Self {
        Self {
            running_stale_after: worker.job_timeout() + recovery.grace(),
            queued_stale_after: recovery.queued_stale(),
            batch_size: recovery.batch_size,
        }
    }
}

/// Fails stale RUNNING and QUEUED jobs that no worker holds a lease for.
pub struct RecoverySweep {
    store: Arc<dyn JobStore>,
    locks: Arc<LockManager>,
    settings: RecoverySettings,
}

impl RecoverySweep {
    pub fn new(
        store: Arc<dyn JobStore>,
        locks: Arc<LockManager>,
        settings: RecoverySettings,
    ) -> Self {
        Self {
            store,
            locks,
            settings: RecoverySettings {
                batch_size: settings.batch_size.max(1),
                ..settings
            },
        }
    }

    pub async fn run_once(&self, now: DateTime<Utc>) -> JobsResult<SweepReport> {
        let running = self
            .store
            .find_stale_running(
                now - to_chrono(self.settings.running_stale_after),
                self.settings.batch_size,
            )
            .await?;
        let queued = self
            .store
            .find_stale_queued(
                now - to_chrono(self.settings.queued_stale_after),
                self.settings.batch_size,
            )
            .await?;
        let mut report = SweepReport {
            selected: running.len() + queued.len(),
            ..SweepReport::default()
        };

        let candidates = running
            .into_iter()
            .map(|job| (job, JobStatus::Running))
            .chain(queued.into_iter().map(|job| (job, JobStatus::Queued)));
        for (job, status) in candidates {
            let job_id = job.id;
            match self.recover(job, status, now).await {
                Ok(true) => report.processed += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    error!(job_id = %job_id, error = %e, "Failed to recover job");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    async fn recover(
        &self,
        mut job: Job,
        status: JobStatus,
        now: DateTime<Utc>,
    ) -> JobsResult<bool> {
        if let Some(holder) = self.locks.holder(job.id).await? {
            debug!(job_id = %job.id, holder = %holder, %status, "Lease still live, leaving job alone");
            return Ok(false);
        }

        let reason = if status == JobStatus::Queued {
            TASK_LOST
        } else {
            WORKER_LOST
        };
        let lost_worker = job.worker_id.clone().unwrap_or_default();
        job.mark_failed(reason, None, now)?;
        if !self.store.update_if_status(&job, status).await? {
            return Ok(false);
        }

        JobMetrics::job_recovered(&job.job_type);
        warn!(
            job_id = %job.id,
            worker_id = %lost_worker,
            from = %status,
            queued_at = ?job.queued_at,
            started_at = ?job.started_at,
            "Recovered job from lost worker"
        );
        Ok(true)
    }

    pub async fn run(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        run_periodic("recovery", interval, shutdown, || self.run_once(Utc::now())).await;
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(1))
}
