use super::{parse_payload, simulate_work};
use async_trait::async_trait;
use conductor_jobs::{JobsResult, Task, TaskContext};
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EmailPayload {
    to: String,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    body: Option<String>,
}

/// Sends an email. Delivery is simulated.
pub struct EmailTask {
    work: Duration,
}

impl EmailTask {
    pub const TYPE: &'static str = "EMAIL";

    pub fn new(work: Duration) -> Self {
        Self { work }
    }
}

impl Default for EmailTask {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

#[async_trait]
impl Task for EmailTask {
    fn task_type(&self) -> &str {
        Self::TYPE
    }

    async fn execute(&self, payload: &str, ctx: &TaskContext) -> JobsResult<()> {
        let email: EmailPayload = parse_payload(payload)?;
        let subject = email.subject.as_deref().unwrap_or("No Subject");
        info!(
            job_id = %ctx.job_id,
            to = %email.to,
            subject,
            body_len = email.body.as_deref().map_or(0, str::len),
            "Sending email"
        );

        simulate_work(self.work, ctx).await?;

        info!(job_id = %ctx.job_id, "Email sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::JobId;
    use conductor_jobs::JobError;

    fn ctx() -> TaskContext {
        TaskContext::new(JobId::new(), "EMAIL", 0, "worker-1")
    }

    #[tokio::test]
    async fn test_sends_with_optional_fields_missing() {
        let task = EmailTask::new(Duration::ZERO);
        task.execute(r#"{"to":"ops@example.com"}"#, &ctx()).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_recipient_fails() {
        let task = EmailTask::new(Duration::ZERO);
        let err = task
            .execute(r#"{"subject":"hi"}"#, &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::ExecutionFailed(_)));
    }
}
