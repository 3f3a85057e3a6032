//! In-memory job store.
//!
//! Same contract as the MySQL store, including compare-and-set updates, so
//! the orchestration loops can run end to end without a database.

use crate::traits::JobStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conductor_core::{
    ConductorError, ConductorResult, Job, JobId, JobStatus, Page, PageRequest, RetryBackoff,
};
use parking_lot::Mutex;
use shaku::Component;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// In-memory job store.
#[derive(Component, Default)]
#[shaku(interface = JobStore)]
pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<JobId, Job>>,
    unavailable: AtomicBool,
}

impl InMemoryJobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `jobs`.
    #[must_use]
    pub fn with_jobs(jobs: impl IntoIterator<Item = Job>) -> Self {
        let store = Self::new();
        {
            let mut map = store.jobs.lock();
            for job in jobs {
                map.insert(job.id, job);
            }
        }
        store
    }

    /// Makes every operation fail with a database error until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Copy of every stored job.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Job> {
        self.jobs.lock().values().cloned().collect()
    }

    fn check_available(&self) -> ConductorResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ConductorError::Database("job store unavailable".to_string()));
        }
        Ok(())
    }

    fn select<F>(&self, filter: F) -> Vec<Job>
    where
        F: Fn(&Job) -> bool,
    {
        self.jobs.lock().values().filter(|job| filter(job)).cloned().collect()
    }

    fn page_newest_first<F>(&self, page: PageRequest, filter: F) -> Page<Job>
    where
        F: Fn(&Job) -> bool,
    {
        let mut jobs = self.select(filter);
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Page::from_slice(&jobs, page)
    }
}

fn take(mut jobs: Vec<Job>, limit: u32) -> Vec<Job> {
    jobs.truncate(limit as usize);
    jobs
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn find_by_id(&self, id: JobId) -> ConductorResult<Option<Job>> {
        self.check_available()?;
        Ok(self.jobs.lock().get(&id).cloned())
    }

    async fn insert(&self, job: &Job) -> ConductorResult<()> {
        self.check_available()?;
        let mut jobs = self.jobs.lock();
        if jobs.contains_key(&job.id) {
            return Err(ConductorError::conflict(format!("job {} already exists", job.id)));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn update_if_status(&self, job: &Job, expected: JobStatus) -> ConductorResult<bool> {
        self.check_available()?;
        let mut jobs = self.jobs.lock();
        let Some(stored) = jobs.get_mut(&job.id) else {
            return Ok(false);
        };
        if stored.status != expected {
            return Ok(false);
        }
        stored.status = job.status;
        stored.retry_count = job.retry_count;
        stored.queued_at = job.queued_at;
        stored.started_at = job.started_at;
        stored.completed_at = job.completed_at;
        stored.error_message.clone_from(&job.error_message);
        stored.worker_id.clone_from(&job.worker_id);
        Ok(true)
    }

    async fn find_pending_by_priority(&self, limit: u32) -> ConductorResult<Vec<Job>> {
        self.check_available()?;
        let mut jobs = self.select(|job| job.status == JobStatus::Pending);
        jobs.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        Ok(take(jobs, limit))
    }

    async fn find_retry_candidates(
        &self,
        now: DateTime<Utc>,
        backoff: &RetryBackoff,
        limit: u32,
    ) -> ConductorResult<Vec<Job>> {
        self.check_available()?;
        let mut jobs = self.select(|job| {
            job.can_retry()
                && job
                    .retry_due_at(backoff.chrono_delay_for(job.retry_count))
                    .is_some_and(|due| due <= now)
        });
        jobs.sort_by_key(|job| job.completed_at);
        Ok(take(jobs, limit))
    }

    async fn find_dead_letter_candidates(&self, limit: u32) -> ConductorResult<Vec<Job>> {
        self.check_available()?;
        let mut jobs = self.select(|job| job.status == JobStatus::Failed && job.is_exhausted());
        jobs.sort_by_key(|job| job.completed_at);
        Ok(take(jobs, limit))
    }

    async fn find_stale_running(
        &self,
        started_before: DateTime<Utc>,
        limit: u32,
    ) -> ConductorResult<Vec<Job>> {
        self.check_available()?;
        let mut jobs = self.select(|job| {
            job.status == JobStatus::Running
                && job.started_at.is_some_and(|started| started < started_before)
        });
        jobs.sort_by_key(|job| job.started_at);
        Ok(take(jobs, limit))
    }

    async fn find_stale_queued(
        &self,
        queued_before: DateTime<Utc>,
        limit: u32,
    ) -> ConductorResult<Vec<Job>> {
        self.check_available()?;
        let mut jobs = self.select(|job| {
            job.status == JobStatus::Queued
                && job.queued_at.is_some_and(|queued| queued < queued_before)
        });
        jobs.sort_by_key(|job| job.queued_at);
        Ok(take(jobs, limit))
    }

    async fn find_by_status(&self, status: JobStatus, page: PageRequest) -> ConductorResult<Page<Job>> {
        self.check_available()?;
        Ok(self.page_newest_first(page, |job| job.status == status))
    }

    async fn find_by_type(&self, job_type: &str, page: PageRequest) -> ConductorResult<Page<Job>> {
        self.check_available()?;
        Ok(self.page_newest_first(page, |job| job.job_type == job_type))
    }

    async fn find_all(&self, page: PageRequest) -> ConductorResult<Page<Job>> {
        self.check_available()?;
        Ok(self.page_newest_first(page, |_| true))
    }

    async fn count(&self) -> ConductorResult<u64> {
        self.check_available()?;
        Ok(self.jobs.lock().len() as u64)
    }

    async fn count_by_status(&self, status: JobStatus) -> ConductorResult<u64> {
        self.check_available()?;
        Ok(self.select(|job| job.status == status).len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn job(name: &str, priority: i32) -> Job {
        Job::new(name, "EMAIL", "{}", priority, 3)
    }

    fn failed(retry_count: i32, max_retries: i32, completed_at: DateTime<Utc>) -> Job {
        let mut job = Job::new("failing", "REPORT", "{}", 0, max_retries);
        job.status = JobStatus::Failed;
        job.retry_count = retry_count;
        job.completed_at = Some(completed_at);
        job.error_message = Some("boom".to_string());
        job
    }

    #[tokio::test]
    async fn test_insert_and_find_by_id() {
        let store = InMemoryJobStore::new();
        let job = job("first", 1);
        store.insert(&job).await.unwrap();

        let found = store.find_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(found, job);
        assert!(store.find_by_id(JobId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_insert_conflicts() {
        let store = InMemoryJobStore::new();
        let job = job("first", 1);
        store.insert(&job).await.unwrap();
        let err = store.insert(&job).await.unwrap_err();
        assert!(matches!(err, ConductorError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_update_if_status_is_compare_and_set() {
        let mut queued = job("first", 1);
        let store = InMemoryJobStore::with_jobs([queued.clone()]);

        queued.mark_queued().unwrap();
        assert!(store.update_if_status(&queued, JobStatus::Pending).await.unwrap());
        // A second writer that still believes the job is PENDING loses.
        assert!(!store.update_if_status(&queued, JobStatus::Pending).await.unwrap());

        let stored = store.find_by_id(queued.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn test_update_never_rewrites_immutable_fields() {
        let original = job("first", 4);
        let store = InMemoryJobStore::with_jobs([original.clone()]);

        let mut tampered = original.clone();
        tampered.name = "renamed".to_string();
        tampered.priority = 9;
        tampered.mark_queued().unwrap();
        assert!(store.update_if_status(&tampered, JobStatus::Pending).await.unwrap());

        let stored = store.find_by_id(original.id).await.unwrap().unwrap();
        assert_eq!(stored.name, "first");
        assert_eq!(stored.priority, 4);
    }

    #[tokio::test]
    async fn test_pending_ordering() {
        let now = Utc::now();
        let mut low = job("low", 1);
        let mut high_old = job("high-old", 9);
        let mut high_new = job("high-new", 9);
        low.created_at = now - Duration::seconds(30);
        high_old.created_at = now - Duration::seconds(20);
        high_new.created_at = now - Duration::seconds(10);
        let mut queued = job("queued", 10);
        queued.status = JobStatus::Queued;

        let store = InMemoryJobStore::with_jobs([low, high_new, queued, high_old]);
        let names: Vec<String> = store
            .find_pending_by_priority(10)
            .await
            .unwrap()
            .into_iter()
            .map(|job| job.name)
            .collect();
        assert_eq!(names, vec!["high-old", "high-new", "low"]);

        assert_eq!(store.find_pending_by_priority(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_retry_candidates_respect_backoff() {
        let now = Utc::now();
        let backoff = RetryBackoff::new(
            std::time::Duration::from_secs(1),
            std::time::Duration::from_secs(30),
        );
        // retry_count 2 -> 4s backoff
        let due = failed(2, 3, now - Duration::seconds(5));
        let not_due = failed(2, 3, now - Duration::seconds(3));
        let exhausted = failed(3, 3, now - Duration::hours(1));

        let store = InMemoryJobStore::with_jobs([due.clone(), not_due, exhausted.clone()]);
        let candidates = store.find_retry_candidates(now, &backoff, 100).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, due.id);

        let dead = store.find_dead_letter_candidates(100).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].id, exhausted.id);
    }

    #[tokio::test]
    async fn test_stale_running() {
        let now = Utc::now();
        let mut stale = job("stale", 0);
        stale.status = JobStatus::Running;
        stale.started_at = Some(now - Duration::hours(1));
        let mut fresh = job("fresh", 0);
        fresh.status = JobStatus::Running;
        fresh.started_at = Some(now);

        let store = InMemoryJobStore::with_jobs([stale.clone(), fresh]);
        let found = store
            .find_stale_running(now - Duration::minutes(10), 10)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, stale.id);
    }

    #[tokio::test]
    async fn test_stale_queued() {
        let now = Utc::now();
        let mut stranded = job("stranded", 0);
        stranded.mark_queued().unwrap();
        stranded.queued_at = Some(now - Duration::hours(1));
        let mut fresh = job("fresh", 0);
        fresh.mark_queued().unwrap();

        let store = InMemoryJobStore::with_jobs([stranded.clone(), fresh, job("pending", 0)]);
        let found = store
            .find_stale_queued(now - Duration::minutes(30), 10)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, stranded.id);
    }

    #[tokio::test]
    async fn test_listing_and_counts() {
        let mut report = Job::new("report", "REPORT", "{}", 0, 3);
        report.status = JobStatus::Completed;
        let store = InMemoryJobStore::with_jobs([job("a", 0), job("b", 0), report]);

        assert_eq!(store.count().await.unwrap(), 3);
        assert_eq!(store.count_by_status(JobStatus::Pending).await.unwrap(), 2);

        let emails = store.find_by_type("EMAIL", PageRequest::new(0, 1)).await.unwrap();
        assert_eq!(emails.content.len(), 1);
        assert_eq!(emails.total_elements, 2);

        let completed = store
            .find_by_status(JobStatus::Completed, PageRequest::default())
            .await
            .unwrap();
        assert_eq!(completed.content[0].name, "report");
        assert_eq!(store.find_all(PageRequest::default()).await.unwrap().total_elements, 3);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails() {
        let store = InMemoryJobStore::new();
        store.set_unavailable(true);
        let err = store.count().await.unwrap_err();
        assert!(err.is_retriable());
        store.set_unavailable(false);
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
