//! Fixed-interval driver for the orchestration sweeps.

use crate::error::JobsResult;
use std::future::Future;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};

/// Tally of one sweep over a batch of jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Jobs the sweep selected.
    pub selected: usize,
    /// Jobs it moved.
    pub processed: usize,
    /// Jobs left alone because a concurrent writer got there first or the
    /// job no longer qualified.
    pub skipped: usize,
    /// Jobs whose handling failed.
    pub failed: usize,
}

impl SweepReport {
    pub fn is_idle(&self) -> bool {
        self.selected == 0
    }
}

/// Calls `sweep` every `period` until `shutdown` fires.
///
/// Runs are never overlapped: a slow run delays the next tick instead of
/// bunching ticks up. A failing run is logged and the loop carries on.
pub async fn run_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    shutdown: CancellationToken,
    mut sweep: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = JobsResult<SweepReport>>,
{
    let span = info_span!("periodic", task = name);
    async move {
        info!(interval_ms = period.as_millis(), "Periodic task started");

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match sweep().await {
                Ok(report) if report.is_idle() => debug!("Nothing to do"),
                Ok(report) => info!(
                    selected = report.selected,
                    processed = report.processed,
                    skipped = report.skipped,
                    failed = report.failed,
                    "Sweep finished"
                ),
                Err(e) => error!(error = %e, "Sweep failed"),
            }
        }

        info!("Periodic task stopped");
    }
    .instrument(span)
    .await;
}
