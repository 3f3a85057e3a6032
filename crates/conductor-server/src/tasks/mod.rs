//! Built-in task implementations.
//!
//! Each parses its JSON payload up front, so a payload missing a required
//! field fails the attempt before any work starts.

mod data_sync;
mod email;
mod report;

pub use data_sync::DataSyncTask;
pub use email::EmailTask;
pub use report::ReportTask;

use conductor_jobs::{JobError, JobsResult, TaskContext, TaskRegistry};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

/// Job types served by the built-in implementations.
pub const BUILT_IN_TYPES: [&str; 3] = [EmailTask::TYPE, DataSyncTask::TYPE, ReportTask::TYPE];

/// Registry with every built-in implementation.
pub fn built_in_registry() -> JobsResult<TaskRegistry> {
    TaskRegistry::new()
        .with(Arc::new(EmailTask::default()))?
        .with(Arc::new(DataSyncTask::default()))?
        .with(Arc::new(ReportTask::default()))
}

fn parse_payload<T: DeserializeOwned>(payload: &str) -> JobsResult<T> {
    serde_json::from_str(payload)
        .map_err(|e| JobError::ExecutionFailed(format!("invalid payload: {e}")))
}

/// Waits out `work` unless the attempt is abandoned first.
async fn simulate_work(work: Duration, ctx: &TaskContext) -> JobsResult<()> {
    tokio::select! {
        () = ctx.cancelled() => Err(JobError::Cancelled),
        () = tokio::time::sleep(work) => Ok(()),
    }
}
