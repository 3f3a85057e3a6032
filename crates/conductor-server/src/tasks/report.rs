use super::{parse_payload, simulate_work};
use async_trait::async_trait;
use conductor_jobs::{JobsResult, Task, TaskContext};
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReportPayload {
    report_type: String,
}

/// Generates a report. Rendering is simulated.
pub struct ReportTask {
    work: Duration,
}

impl ReportTask {
    pub const TYPE: &'static str = "REPORT";

    pub fn new(work: Duration) -> Self {
        Self { work }
    }
}

impl Default for ReportTask {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl Task for ReportTask {
    fn task_type(&self) -> &str {
        Self::TYPE
    }

    async fn execute(&self, payload: &str, ctx: &TaskContext) -> JobsResult<()> {
        let report: ReportPayload = parse_payload(payload)?;
        info!(job_id = %ctx.job_id, report_type = %report.report_type, "Generating report");

        simulate_work(self.work, ctx).await?;

        info!(job_id = %ctx.job_id, report_type = %report.report_type, "Report generated");
        Ok(())
    }
}
