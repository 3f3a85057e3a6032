//! Conductor Jobs - Distributed Job Orchestration
//!
//! Moves jobs from the durable store through a partitioned work queue to
//! workers and back:
//! - Priority-ordered scheduling of PENDING jobs
//! - Partitioned distribution keyed by job id
//! - Exclusive execution leases with owner-only release
//! - A task registry resolving job types to implementations
//! - Result reconciliation with compare-and-set status writes
//! - Exponential-backoff retries and a dead-letter sweep
//! - Recovery of jobs orphaned by lost workers
//!
//! # Architecture
//!
//! ```text
//!   JobService ──insert──► JobStore (PENDING)
//!                              │
//!   Scheduler ──find pending──►│
//!       │                      │
//!       ▼                      │
//!   Distributor ──QUEUED──────►│
//!       │ publish JobTask      │
//!       ▼                      │
//!   ┌──────────────┐           │
//!   │  job-tasks   │ partitioned by job id
//!   └──────┬───────┘           │
//!          ▼                   │
//!   TaskExecutor ──lease──► LockManager
//!       │ RUNNING ────────────►│
//!       │ Task::execute        │
//!       │ publish JobResult    │
//!       ▼                      │
//!   ┌──────────────┐           │
//!   │ job-results  │           │
//!   └──────┬───────┘           │
//!          ▼                   │
//!   ResultReconciler ─COMPLETED/FAILED─►│
//!                              │
//!   RetryEngine ──FAILED → RETRYING → QUEUED / DEAD_LETTER
//!   RecoverySweep ──stale RUNNING / QUEUED → FAILED
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use conductor_jobs::prelude::*;
//! use std::sync::Arc;
//!
//! struct SendEmail;
//!
//! #[async_trait::async_trait]
//! impl Task for SendEmail {
//!     fn task_type(&self) -> &str {
//!         "EMAIL"
//!     }
//!
//!     async fn execute(&self, payload: &str, ctx: &TaskContext) -> JobsResult<()> {
//!         ctx.checkpoint()?;
//!         // deliver
//!         Ok(())
//!     }
//! }
//!
//! let registry = TaskRegistry::new().with(Arc::new(SendEmail))?;
//! ```

pub mod distributor;
pub mod error;
pub mod executor;
pub mod heartbeat;
pub mod lock;
pub mod memory;
pub mod messages;
pub mod metrics;
pub mod periodic;
pub mod queue;
pub mod reconciler;
pub mod recovery;
pub mod redis;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod service;

pub use distributor::{Distribution, Distributor};
pub use error::{JobError, JobsResult, EXECUTION_TIMEOUT};
pub use executor::{Execution, ExecutorPool, ExecutorSettings, TaskExecutor};
pub use heartbeat::WorkerHeartbeat;
pub use lock::{LockManager, LockStore};
pub use memory::{InMemoryLockStore, InMemoryWorkQueue, TopicStats};
pub use messages::{JobResult, JobTask};
pub use self::metrics::{register_metrics, JobMetrics};
pub use periodic::{run_periodic, SweepReport};
pub use queue::{Delivery, WorkQueue};
pub use reconciler::{Reconciliation, ResultReconciler};
pub use recovery::{RecoverySettings, RecoverySweep, TASK_LOST, WORKER_LOST};
pub use self::redis::{create_pool, RedisKeys, RedisLockStore, RedisWorkQueue};
pub use registry::{Task, TaskContext, TaskRegistry};
pub use retry::{RetryEngine, RetrySettings};
pub use scheduler::Scheduler;
pub use service::{JobFilter, JobService, JobServiceImpl, JobStatistics, StatusCount};

/// Re-export commonly used traits
pub mod prelude {
    pub use crate::queue::WorkQueue;
    pub use crate::registry::{Task, TaskContext, TaskRegistry};
    pub use crate::service::JobService;
    pub use crate::{JobError, JobResult, JobTask, JobsResult};
}
