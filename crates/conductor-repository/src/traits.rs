//! Job store contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conductor_core::{ConductorResult, Interface, Job, JobId, JobStatus, Page, PageRequest, RetryBackoff};

/// Durable store of job records; the only place job status is mutated.
///
/// Writers never overwrite blindly. Every status change goes through
/// [`update_if_status`](JobStore::update_if_status), which only persists when
/// the stored status still matches what the writer read.
#[async_trait]
pub trait JobStore: Interface + Send + Sync {
    /// Finds a job by ID.
    async fn find_by_id(&self, id: JobId) -> ConductorResult<Option<Job>>;

    /// Inserts a new job. Fails with `Conflict` if the id already exists.
    async fn insert(&self, job: &Job) -> ConductorResult<()>;

    /// Persists the mutable fields of `job` if the stored status equals `expected`.
    ///
    /// Returns `false` when a concurrent writer already moved the job.
    /// Name, type, payload, priority, max retries and creation time are never
    /// rewritten.
    async fn update_if_status(&self, job: &Job, expected: JobStatus) -> ConductorResult<bool>;

    /// PENDING jobs, highest priority first, then oldest first.
    async fn find_pending_by_priority(&self, limit: u32) -> ConductorResult<Vec<Job>>;

    /// FAILED jobs with retry budget left whose backoff has elapsed at `now`.
    async fn find_retry_candidates(
        &self,
        now: DateTime<Utc>,
        backoff: &RetryBackoff,
        limit: u32,
    ) -> ConductorResult<Vec<Job>>;

    /// FAILED jobs whose retry budget is spent.
    async fn find_dead_letter_candidates(&self, limit: u32) -> ConductorResult<Vec<Job>>;

    /// RUNNING jobs that started before `started_before`.
    async fn find_stale_running(
        &self,
        started_before: DateTime<Utc>,
        limit: u32,
    ) -> ConductorResult<Vec<Job>>;

    /// QUEUED jobs whose task was published before `queued_before`.
    async fn find_stale_queued(
        &self,
        queued_before: DateTime<Utc>,
        limit: u32,
    ) -> ConductorResult<Vec<Job>>;

    /// Jobs in a status, newest first.
    async fn find_by_status(&self, status: JobStatus, page: PageRequest) -> ConductorResult<Page<Job>>;

    /// Jobs of a type, newest first.
    async fn find_by_type(&self, job_type: &str, page: PageRequest) -> ConductorResult<Page<Job>>;

    /// All jobs, newest first.
    async fn find_all(&self, page: PageRequest) -> ConductorResult<Page<Job>>;

    /// Counts all jobs.
    async fn count(&self) -> ConductorResult<u64>;

    /// Counts jobs in a status.
    async fn count_by_status(&self, status: JobStatus) -> ConductorResult<u64>;
}
