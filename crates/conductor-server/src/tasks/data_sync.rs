use super::{parse_payload, simulate_work};
use async_trait::async_trait;
use conductor_jobs::{JobsResult, Task, TaskContext};
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DataSyncPayload {
    api_url: String,
    #[serde(default)]
    entity: Option<String>,
}

/// Pulls an entity from a remote API. The call is simulated.
pub struct DataSyncTask {
    work: Duration,
}

impl DataSyncTask {
    pub const TYPE: &'static str = "DATA_SYNC";

    pub fn new(work: Duration) -> Self {
        Self { work }
    }
}

impl Default for DataSyncTask {
    fn default() -> Self {
        Self::new(Duration::from_secs(3))
    }
}

#[async_trait]
impl Task for DataSyncTask {
    fn task_type(&self) -> &str {
        Self::TYPE
    }

    async fn execute(&self, payload: &str, ctx: &TaskContext) -> JobsResult<()> {
        let sync: DataSyncPayload = parse_payload(payload)?;
        let entity = sync.entity.as_deref().unwrap_or("unknown");
        info!(job_id = %ctx.job_id, api_url = %sync.api_url, entity, "Syncing data");

        simulate_work(self.work, ctx).await?;

        info!(job_id = %ctx.job_id, entity, "Data sync completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::JobId;
    use conductor_jobs::JobError;

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_sync() {
        let task = DataSyncTask::default();
        let ctx = TaskContext::new(JobId::new(), "DATA_SYNC", 1, "worker-1");
        let payload = r#"{"apiUrl":"https://api.example.com/users","entity":"users"}"#;

        let (result, ()) = tokio::join!(task.execute(payload, &ctx), async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            ctx.cancel();
        });
        assert!(matches!(result, Err(JobError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_completes() {
        let task = DataSyncTask::default();
        let ctx = TaskContext::new(JobId::new(), "DATA_SYNC", 0, "worker-1");
        task.execute(r#"{"apiUrl":"https://api.example.com"}"#, &ctx)
            .await
            .unwrap();
    }
}
