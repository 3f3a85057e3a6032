//! Job submission and inspection.
//!
//! The boundary the API layer talks to. Jobs enter here as PENDING and are
//! only ever moved by the orchestration loops, except for cancellation.

use crate::metrics::JobMetrics;
use async_trait::async_trait;
use conductor_core::{
    ConductorError, ConductorResult, Interface, Job, JobId, JobStatus, NewJob, Page, PageRequest,
    ValidateExt,
};
use conductor_repository::JobStore;
use serde::Serialize;
use shaku::Component;
use std::sync::Arc;
use tracing::{debug, info};

/// Listing filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum JobFilter {
    #[default]
    All,
    Status(JobStatus),
    Type(String),
}

/// Number of jobs in one status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCount {
    pub status: JobStatus,
    pub count: u64,
}

/// Job counts overall and per status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatistics {
    pub total: u64,
    pub by_status: Vec<StatusCount>,
}

impl JobStatistics {
    pub fn count(&self, status: JobStatus) -> u64 {
        self.by_status
            .iter()
            .find(|entry| entry.status == status)
            .map_or(0, |entry| entry.count)
    }
}

/// Job service trait.
#[async_trait]
pub trait JobService: Interface + Send + Sync {
    /// Validates and stores a new PENDING job.
    async fn submit(&self, request: NewJob) -> ConductorResult<Job>;

    /// Gets a job by ID.
    async fn get(&self, id: JobId) -> ConductorResult<Job>;

    /// Lists jobs newest first.
    async fn list(&self, filter: JobFilter, page: PageRequest) -> ConductorResult<Page<Job>>;

    /// Counts jobs overall and per status.
    async fn statistics(&self) -> ConductorResult<JobStatistics>;

    /// Cancels a PENDING or QUEUED job.
    async fn cancel(&self, id: JobId) -> ConductorResult<Job>;
}

/// Job service backed by the job store.
#[derive(Component)]
#[shaku(interface = JobService)]
pub struct JobServiceImpl {
    #[shaku(inject)]
    store: Arc<dyn JobStore>,
}

impl JobServiceImpl {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl JobService for JobServiceImpl {
    async fn submit(&self, request: NewJob) -> ConductorResult<Job> {
        debug!("Submitting job: {}", request.name);

        request.validate_request()?;

        let job = Job::from(request);
        self.store.insert(&job).await?;

        JobMetrics::job_submitted(&job.job_type);
        info!(
            job_id = %job.id,
            job_type = %job.job_type,
            priority = job.priority,
            max_retries = job.max_retries,
            "Job submitted"
        );
        Ok(job)
    }

    async fn get(&self, id: JobId) -> ConductorResult<Job> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or_else(|| ConductorError::not_found("Job", id))
    }

    async fn list(&self, filter: JobFilter, page: PageRequest) -> ConductorResult<Page<Job>> {
        debug!(?filter, page = page.page, size = page.size, "Listing jobs");

        match filter {
            JobFilter::All => self.store.find_all(page).await,
            JobFilter::Status(status) => self.store.find_by_status(status, page).await,
            JobFilter::Type(job_type) => self.store.find_by_type(&job_type, page).await,
        }
    }

    async fn statistics(&self) -> ConductorResult<JobStatistics> {
        let total = self.store.count().await?;
        let mut by_status = Vec::with_capacity(JobStatus::all().len());
        for status in JobStatus::all() {
            let count = self.store.count_by_status(status).await?;
            by_status.push(StatusCount { status, count });
        }
        Ok(JobStatistics { total, by_status })
    }

    async fn cancel(&self, id: JobId) -> ConductorResult<Job> {
        let mut job = self.get(id).await?;
        let expected = job.status;
        job.mark_cancelled()?;

        if !self.store.update_if_status(&job, expected).await? {
            return Err(ConductorError::conflict(format!(
                "job {id} changed while cancelling"
            )));
        }

        info!(job_id = %id, from = %expected, "Job cancelled");
        Ok(job)
    }
}
