//! Task implementations and their lookup by job type.

use crate::error::{JobError, JobsResult};
use async_trait::async_trait;
use conductor_core::JobId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::info;

/// Everything a task gets to know about the attempt it is running.
///
/// Cancellation is advisory. When the executor gives up on an attempt it
/// cancels the token and reports the timeout right away; long-running tasks
/// should check [`is_cancelled`](Self::is_cancelled) or await
/// [`cancelled`](Self::cancelled) at safe points and stop.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub job_id: JobId,
    pub job_type: String,
    pub retry_count: i32,
    pub worker_id: String,
    cancel: CancellationToken,
}

impl TaskContext {
    pub fn new(
        job_id: JobId,
        job_type: impl Into<String>,
        retry_count: i32,
        worker_id: impl Into<String>,
    ) -> Self {
        Self {
            job_id,
            job_type: job_type.into(),
            retry_count,
            worker_id: worker_id.into(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the attempt has been abandoned.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Returns `Err(Cancelled)` once the attempt has been abandoned.
    pub fn checkpoint(&self) -> JobsResult<()> {
        if self.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        Ok(())
    }

    /// Abandons the attempt.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub(crate) fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// An executable implementation for one job type.
#[async_trait]
pub trait Task: Send + Sync {
    /// Job type this implementation handles.
    fn task_type(&self) -> &str;

    /// Runs one attempt against the job's payload.
    async fn execute(&self, payload: &str, ctx: &TaskContext) -> JobsResult<()>;
}

/// Job type to implementation mapping, built once at start-up.
#[derive(Default, Clone)]
pub struct TaskRegistry {
    tasks: HashMap<String, Arc<dyn Task>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an implementation. Two implementations for one type is a
    /// configuration error.
    pub fn register(&mut self, task: Arc<dyn Task>) -> JobsResult<()> {
        let task_type = task.task_type().to_string();
        if self.tasks.contains_key(&task_type) {
            return Err(JobError::Configuration(format!(
                "duplicate task implementation for type {task_type}"
            )));
        }
        info!(job_type = %task_type, "Registered task implementation");
        self.tasks.insert(task_type, task);
        Ok(())
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, task: Arc<dyn Task>) -> JobsResult<Self> {
        self.register(task)?;
        Ok(self)
    }

    /// Implementation for `job_type`.
    pub fn resolve(&self, job_type: &str) -> JobsResult<Arc<dyn Task>> {
        self.tasks
            .get(job_type)
            .cloned()
            .ok_or_else(|| JobError::UnknownTaskType(job_type.to_string()))
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.tasks.contains_key(job_type)
    }

    /// Registered types, sorted.
    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.tasks.keys().cloned().collect();
        types.sort();
        types
    }

    /// Types from `expected` that have no implementation, sorted and
    /// de-duplicated.
    pub fn audit<'a>(&self, expected: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let mut missing: Vec<String> = expected
            .into_iter()
            .filter(|job_type| !self.contains(job_type))
            .map(str::to_string)
            .collect();
        missing.sort();
        missing.dedup();
        missing
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("types", &self.types())
            .finish()
    }
}
