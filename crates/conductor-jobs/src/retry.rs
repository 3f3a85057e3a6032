//! Retry and dead-letter sweeps over failed jobs.

use crate::distributor::{Distribution, Distributor};
use crate::error::JobsResult;
use crate::metrics::JobMetrics;
use crate::periodic::{run_periodic, SweepReport};
use chrono::{DateTime, Utc};
use conductor_config::RetryConfig;
use conductor_core::{Job, JobStatus, RetryBackoff};
use conductor_repository::JobStore;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Sweep intervals and batch size.
#[derive(Debug, Clone, Copy)]
pub struct RetrySettings {
    pub backoff: RetryBackoff,
    pub retry_interval: Duration,
    pub dead_letter_interval: Duration,
    pub batch_size: u32,
}

impl From<&RetryConfig> for RetrySettings {
    fn from(config: &RetryConfig) -> Self {
        Self {
            backoff: RetryBackoff::new(config.initial_backoff(), config.max_backoff()),
            retry_interval: config.interval(),
            dead_letter_interval: config.dead_letter_interval(),
            batch_size: config.batch_size.max(1),
        }
    }
}

/// Re-queues failed jobs after their backoff and quarantines exhausted ones.
///
/// The only writer that moves jobs out of FAILED.
pub struct RetryEngine {
    store: Arc<dyn JobStore>,
    distributor: Arc<Distributor>,
    settings: RetrySettings,
}

impl RetryEngine {
    pub fn new(
        store: Arc<dyn JobStore>,
        distributor: Arc<Distributor>,
        settings: RetrySettings,
    ) -> Self {
        Self {
            store,
            distributor,
            settings,
        }
    }

    pub fn backoff(&self) -> &RetryBackoff {
        &self.settings.backoff
    }

    /// Retries every FAILED job with budget left whose backoff has elapsed
    /// at `now`.
    pub async fn retry_sweep(&self, now: DateTime<Utc>) -> JobsResult<SweepReport> {
        let candidates = self
            .store
            .find_retry_candidates(now, &self.settings.backoff, self.settings.batch_size)
            .await?;
        let mut report = SweepReport {
            selected: candidates.len(),
            ..SweepReport::default()
        };

        for job in candidates {
            let job_id = job.id;
            match self.retry(job).await {
                Ok(true) => report.processed += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    error!(job_id = %job_id, error = %e, "Failed to retry job");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    async fn retry(&self, mut job: Job) -> JobsResult<bool> {
        job.mark_retrying()?;
        if !self.store.update_if_status(&job, JobStatus::Failed).await? {
            return Ok(false);
        }

        JobMetrics::job_retried(&job.job_type);
        info!(
            job_id = %job.id,
            retry_count = job.retry_count,
            max_retries = job.max_retries,
            "Retrying job"
        );

        match self.distributor.distribute(job.clone()).await {
            Ok(Distribution::Queued | Distribution::PublishFailed) => Ok(true),
            Ok(Distribution::Skipped) => Ok(false),
            Err(e) => {
                // Don't strand the job in RETRYING; the attempt is spent.
                job.mark_failed(&format!("retry distribution failed: {e}"), None, Utc::now())?;
                self.store
                    .update_if_status(&job, JobStatus::Retrying)
                    .await?;
                Err(e)
            }
        }
    }

    /// Moves every FAILED job with no retry budget left to DEAD_LETTER.
    pub async fn dead_letter_sweep(&self) -> JobsResult<SweepReport> {
        let candidates = self
            .store
            .find_dead_letter_candidates(self.settings.batch_size)
            .await?;
        let mut report = SweepReport {
            selected: candidates.len(),
            ..SweepReport::default()
        };

        for mut job in candidates {
            if let Err(e) = job.mark_dead_letter() {
                error!(job_id = %job.id, error = %e, "Cannot dead-letter job");
                report.failed += 1;
                continue;
            }
            match self.store.update_if_status(&job, JobStatus::Failed).await {
                Ok(true) => {
                    JobMetrics::job_dead_lettered(&job.job_type);
                    warn!(
                        job_id = %job.id,
                        job_type = %job.job_type,
                        retry_count = job.retry_count,
                        error = job.error_message.as_deref().unwrap_or_default(),
                        "Job moved to dead letter"
                    );
                    report.processed += 1;
                }
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    error!(job_id = %job.id, error = %e, "Failed to dead-letter job");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    /// Runs both sweeps on their own intervals until shutdown.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let retry = run_periodic(
            "retry",
            self.settings.retry_interval,
            shutdown.clone(),
            || self.retry_sweep(Utc::now()),
        );
        let dead_letter = run_periodic(
            "dead_letter",
            self.settings.dead_letter_interval,
            shutdown,
            || self.dead_letter_sweep(),
        );
        tokio::join!(retry, dead_letter);
    }
}
