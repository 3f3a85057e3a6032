//! Periodic hand-off of pending jobs to the distributor.

use crate::distributor::{Distribution, Distributor};
use crate::error::JobsResult;
use crate::periodic::{run_periodic, SweepReport};
use chrono::Utc;
use conductor_core::{Job, JobStatus};
use conductor_repository::JobStore;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// Pulls PENDING jobs in priority order and distributes them.
///
/// Safe to run concurrently with itself: the distributor's
/// compare-and-set from PENDING is the only mutation, so a job another run
/// already took is skipped.
pub struct Scheduler {
    store: Arc<dyn JobStore>,
    distributor: Arc<Distributor>,
    batch_size: u32,
}

impl Scheduler {
    pub fn new(store: Arc<dyn JobStore>, distributor: Arc<Distributor>, batch_size: u32) -> Self {
        Self {
            store,
            distributor,
            batch_size: batch_size.max(1),
        }
    }

    /// One scheduling pass over up to `batch_size` pending jobs.
    pub async fn run_once(&self) -> JobsResult<SweepReport> {
        let jobs = self.store.find_pending_by_priority(self.batch_size).await?;
        let mut report = SweepReport {
            selected: jobs.len(),
            ..SweepReport::default()
        };

        for job in jobs {
            match self.distributor.distribute(job.clone()).await {
                Ok(Distribution::Queued) => report.processed += 1,
                Ok(Distribution::Skipped) => report.skipped += 1,
                Ok(Distribution::PublishFailed) => report.failed += 1,
                Err(e) => {
                    error!(job_id = %job.id, error = %e, "Failed to schedule job");
                    self.fail_pending(job, &format!("scheduling failed: {e}"))
                        .await;
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Runs [`run_once`](Self::run_once) every `interval` until shutdown.
    pub async fn run(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        run_periodic("scheduler", interval, shutdown, || self.run_once()).await;
    }

    async fn fail_pending(&self, mut job: Job, reason: &str) {
        if let Err(e) = job.mark_failed(reason, None, Utc::now()) {
            warn!(job_id = %job.id, error = %e, "Cannot mark job failed");
            return;
        }
        match self.store.update_if_status(&job, JobStatus::Pending).await {
            Ok(true) => {}
            Ok(false) => warn!(job_id = %job.id, "Job left PENDING before it could be failed"),
            Err(e) => warn!(job_id = %job.id, error = %e, "Could not record scheduling failure"),
        }
    }
}
