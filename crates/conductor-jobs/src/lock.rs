//! Per-job execution leases.

use crate::error::JobsResult;
use async_trait::async_trait;
use conductor_core::JobId;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Key/value store with the atomic primitives leases need.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Creates `key = value` with a TTL only if `key` is absent.
    ///
    /// Returns `true` when this call created the entry.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> JobsResult<bool>;

    /// Deletes `key` only if its current value equals `expected`.
    async fn delete_if_equals(&self, key: &str, expected: &str) -> JobsResult<bool>;

    /// Unconditionally writes `key = value` with a TTL.
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> JobsResult<()>;

    /// Current value of `key`, if present and not expired.
    async fn get(&self, key: &str) -> JobsResult<Option<String>>;
}

/// Acquires and releases per-job leases tagged with this worker's identity.
///
/// Leases are never renewed. The TTL has to outlast the longest execution,
/// which configuration validation enforces against the job timeout.
pub struct LockManager {
    store: Arc<dyn LockStore>,
    key_prefix: String,
    owner: String,
    ttl: Duration,
}

impl LockManager {
    pub fn new(
        store: Arc<dyn LockStore>,
        key_prefix: impl Into<String>,
        owner: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            key_prefix: key_prefix.into(),
            owner: owner.into(),
            ttl,
        }
    }

    /// Identity written into every lease this manager creates.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Lease key for a job.
    pub fn key(&self, job_id: JobId) -> String {
        format!("{}:{}", self.key_prefix, job_id)
    }

    /// Tries to create the lease.
    ///
    /// Any existing lease yields `false`, including one left behind by this
    /// same worker before a crash.
    pub async fn acquire(&self, job_id: JobId) -> JobsResult<bool> {
        let acquired = self
            .store
            .set_if_absent(&self.key(job_id), &self.owner, self.ttl)
            .await?;
        if acquired {
            debug!(job_id = %job_id, owner = %self.owner, "Acquired job lease");
        } else {
            debug!(job_id = %job_id, "Job lease already held");
        }
        Ok(acquired)
    }

    /// Deletes the lease if this worker owns it.
    pub async fn release(&self, job_id: JobId) -> JobsResult<bool> {
        let released = self
            .store
            .delete_if_equals(&self.key(job_id), &self.owner)
            .await?;
        if !released {
            warn!(job_id = %job_id, owner = %self.owner, "Lease not released: expired or owned by another worker");
        }
        Ok(released)
    }

    /// Worker currently holding the lease, if any.
    pub async fn holder(&self, job_id: JobId) -> JobsResult<Option<String>> {
        self.store.get(&self.key(job_id)).await
    }
}
