//! MySQL job store implementation.

use crate::{traits::JobStore, DatabasePoolInterface};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conductor_core::{
    ConductorError, ConductorResult, Job, JobId, JobStatus, Page, PageRequest, RetryBackoff,
};
use shaku::Component;
use sqlx::FromRow;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

const SELECT_COLUMNS: &str = r"
    SELECT id, name, type, payload, status, priority, retry_count, max_retries,
           created_at, queued_at, started_at, completed_at, error_message, worker_id
    FROM jobs
";

/// MySQL job store.
#[derive(Component, Clone)]
#[shaku(interface = JobStore)]
pub struct MySqlJobStore {
    #[shaku(inject)]
    pool: Arc<dyn DatabasePoolInterface>,
}

impl MySqlJobStore {
    /// Creates a new MySQL job store.
    #[must_use]
    pub fn new(pool: Arc<dyn DatabasePoolInterface>) -> Self {
        Self { pool }
    }

    async fn fetch_list(&self, sql: &str, binds: ListBinds<'_>) -> ConductorResult<Vec<Job>> {
        let mut query = sqlx::query_as::<_, JobRow>(sql);
        match binds {
            ListBinds::None => {}
            ListBinds::Status(status) => query = query.bind(status.as_str()),
            ListBinds::Type(job_type) => query = query.bind(job_type),
            ListBinds::Before(instant) => query = query.bind(instant),
        }
        let rows = query.fetch_all(self.pool.inner()).await?;
        rows.into_iter().map(Job::try_from).collect()
    }

    async fn fetch_page(
        &self,
        filter: &str,
        binds: ListBinds<'_>,
        page: PageRequest,
    ) -> ConductorResult<Page<Job>> {
        let count_sql = format!("SELECT COUNT(*) FROM jobs {filter}");
        let mut count = sqlx::query_scalar::<_, i64>(&count_sql);
        match binds {
            ListBinds::None | ListBinds::Before(_) => {}
            ListBinds::Status(status) => count = count.bind(status.as_str()),
            ListBinds::Type(job_type) => count = count.bind(job_type),
        }
        let total = count.fetch_one(self.pool.inner()).await?;

        let sql = format!(
            "{SELECT_COLUMNS} {filter} ORDER BY created_at DESC LIMIT {} OFFSET {}",
            page.limit(),
            page.offset()
        );
        let jobs = self.fetch_list(&sql, binds).await?;
        Ok(Page::new(jobs, page, u64::try_from(total).unwrap_or(0)))
    }
}

#[derive(Clone, Copy)]
enum ListBinds<'a> {
    None,
    Status(JobStatus),
    Type(&'a str),
    Before(DateTime<Utc>),
}

/// Database row representation of a job.
#[derive(Debug, FromRow)]
struct JobRow {
    id: String, // CHAR(36)
    name: String,
    #[sqlx(rename = "type")]
    job_type: String,
    payload: String,
    status: String,
    priority: i32,
    retry_count: i32,
    max_retries: i32,
    created_at: DateTime<Utc>,
    queued_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    worker_id: Option<String>,
}

impl TryFrom<JobRow> for Job {
    type Error = ConductorError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let id = Uuid::parse_str(&row.id)
            .map_err(|e| ConductorError::Internal(format!("Invalid UUID in database: {e}")))?;
        let status = row
            .status
            .parse::<JobStatus>()
            .map_err(ConductorError::Internal)?;

        Ok(Job {
            id: JobId::from_uuid(id),
            name: row.name,
            job_type: row.job_type,
            payload: row.payload,
            status,
            priority: row.priority,
            retry_count: row.retry_count,
            max_retries: row.max_retries,
            created_at: row.created_at,
            queued_at: row.queued_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            error_message: row.error_message,
            worker_id: row.worker_id,
        })
    }
}

#[async_trait]
impl JobStore for MySqlJobStore {
    async fn find_by_id(&self, id: JobId) -> ConductorResult<Option<Job>> {
        debug!("Finding job by id: {}", id);

        let sql = format!("{SELECT_COLUMNS} WHERE id = ?");
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(id.to_string())
            .fetch_optional(self.pool.inner())
            .await?;

        row.map(Job::try_from).transpose()
    }

    async fn insert(&self, job: &Job) -> ConductorResult<()> {
        debug!(job_id = %job.id, job_type = %job.job_type, "Inserting job");

        sqlx::query(
            r"
            INSERT INTO jobs (id, name, type, payload, status, priority, retry_count,
                              max_retries, created_at, queued_at, started_at,
                              completed_at, error_message, worker_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(job.id.to_string())
        .bind(&job.name)
        .bind(&job.job_type)
        .bind(&job.payload)
        .bind(job.status.as_str())
        .bind(job.priority)
        .bind(job.retry_count)
        .bind(job.max_retries)
        .bind(job.created_at)
        .bind(job.queued_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(&job.error_message)
        .bind(&job.worker_id)
        .execute(self.pool.inner())
        .await?;

        Ok(())
    }

    async fn update_if_status(&self, job: &Job, expected: JobStatus) -> ConductorResult<bool> {
        debug!(job_id = %job.id, from = %expected, to = %job.status, "Updating job");

        let result = sqlx::query(
            r"
            UPDATE jobs
            SET status = ?, retry_count = ?, queued_at = ?, started_at = ?,
                completed_at = ?, error_message = ?, worker_id = ?
            WHERE id = ? AND status = ?
            ",
        )
        .bind(job.status.as_str())
        .bind(job.retry_count)
        .bind(job.queued_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(&job.error_message)
        .bind(&job.worker_id)
        .bind(job.id.to_string())
        .bind(expected.as_str())
        .execute(self.pool.inner())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_pending_by_priority(&self, limit: u32) -> ConductorResult<Vec<Job>> {
        let sql = format!(
            "{SELECT_COLUMNS} WHERE status = 'PENDING' ORDER BY priority DESC, created_at ASC LIMIT {limit}"
        );
        self.fetch_list(&sql, ListBinds::None).await
    }

    async fn find_retry_candidates(
        &self,
        now: DateTime<Utc>,
        backoff: &RetryBackoff,
        limit: u32,
    ) -> ConductorResult<Vec<Job>> {
        let initial_ms = u64::try_from(backoff.initial().as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(backoff.max().as_millis()).unwrap_or(u64::MAX);

        // Eligible at completed_at + min(initial * 2^retry_count, max).
        let sql = format!(
            r"{SELECT_COLUMNS}
            WHERE status = 'FAILED'
              AND retry_count < max_retries
              AND completed_at IS NOT NULL
              AND TIMESTAMPADD(
                    MICROSECOND,
                    CAST(LEAST(? * POW(2, retry_count), ?) AS UNSIGNED) * 1000,
                    completed_at) <= ?
            ORDER BY completed_at ASC
            LIMIT {limit}"
        );
        let rows = sqlx::query_as::<_, JobRow>(&sql)
            .bind(initial_ms)
            .bind(max_ms)
            .bind(now)
            .fetch_all(self.pool.inner())
            .await?;
        rows.into_iter().map(Job::try_from).collect()
    }

    async fn find_dead_letter_candidates(&self, limit: u32) -> ConductorResult<Vec<Job>> {
        let sql = format!(
            "{SELECT_COLUMNS} WHERE status = 'FAILED' AND retry_count >= max_retries ORDER BY completed_at ASC LIMIT {limit}"
        );
        self.fetch_list(&sql, ListBinds::None).await
    }

    async fn find_stale_running(
        &self,
        started_before: DateTime<Utc>,
        limit: u32,
    ) -> ConductorResult<Vec<Job>> {
        let sql = format!(
            "{SELECT_COLUMNS} WHERE status = 'RUNNING' AND started_at < ? ORDER BY started_at ASC LIMIT {limit}"
        );
        self.fetch_list(&sql, ListBinds::Before(started_before)).await
    }

    async fn find_stale_queued(
        &self,
        queued_before: DateTime<Utc>,
        limit: u32,
    ) -> ConductorResult<Vec<Job>> {
        let sql = format!(
            "{SELECT_COLUMNS} WHERE status = 'QUEUED' AND queued_at < ? ORDER BY queued_at ASC LIMIT {limit}"
        );
        self.fetch_list(&sql, ListBinds::Before(queued_before)).await
    }

    async fn find_by_status(&self, status: JobStatus, page: PageRequest) -> ConductorResult<Page<Job>> {
        self.fetch_page("WHERE status = ?", ListBinds::Status(status), page)
            .await
    }

    async fn find_by_type(&self, job_type: &str, page: PageRequest) -> ConductorResult<Page<Job>> {
        self.fetch_page("WHERE type = ?", ListBinds::Type(job_type), page)
            .await
    }

    async fn find_all(&self, page: PageRequest) -> ConductorResult<Page<Job>> {
        self.fetch_page("", ListBinds::None, page).await
    }

    async fn count(&self) -> ConductorResult<u64> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs")
            .fetch_one(self.pool.inner())
            .await?;
        Ok(u64::try_from(total).unwrap_or(0))
    }

    async fn count_by_status(&self, status: JobStatus) -> ConductorResult<u64> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(self.pool.inner())
            .await?;
        Ok(u64::try_from(total).unwrap_or(0))
    }
}
