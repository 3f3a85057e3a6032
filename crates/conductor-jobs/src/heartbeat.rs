//! Worker liveness beacons.

use crate::error::JobsResult;
use crate::lock::LockStore;
use crate::periodic::{run_periodic, SweepReport};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const KEY_PREFIX: &str = "worker:heartbeat";

/// Periodically refreshes `worker:heartbeat:<worker_id>` with a TTL.
pub struct WorkerHeartbeat {
    store: Arc<dyn LockStore>,
    worker_id: String,
    ttl: Duration,
}

impl WorkerHeartbeat {
    pub fn new(store: Arc<dyn LockStore>, worker_id: impl Into<String>, ttl: Duration) -> Self {
        Self {
            store,
            worker_id: worker_id.into(),
            ttl,
        }
    }

    pub fn key(worker_id: &str) -> String {
        format!("{KEY_PREFIX}:{worker_id}")
    }

    /// Writes the current time under this worker's key.
    pub async fn beat(&self) -> JobsResult<()> {
        self.store
            .put(&Self::key(&self.worker_id), &Utc::now().to_rfc3339(), self.ttl)
            .await
    }

    /// True while `worker_id` has a heartbeat that has not expired.
    pub async fn is_alive(&self, worker_id: &str) -> JobsResult<bool> {
        Ok(self.store.get(&Self::key(worker_id)).await?.is_some())
    }

    async fn beat_once(&self) -> JobsResult<SweepReport> {
        self.beat().await?;
        Ok(SweepReport::default())
    }

    pub async fn run(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        run_periodic("heartbeat", interval, shutdown, || self.beat_once()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryLockStore;

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_expires_without_refresh() {
        let store = Arc::new(InMemoryLockStore::new());
        let heartbeat = WorkerHeartbeat::new(store.clone(), "worker-1", Duration::from_secs(30));

        assert!(!heartbeat.is_alive("worker-1").await.unwrap());
        heartbeat.beat().await.unwrap();
        assert!(heartbeat.is_alive("worker-1").await.unwrap());

        let value = store.get("worker:heartbeat:worker-1").await.unwrap().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(&value).is_ok());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(!heartbeat.is_alive("worker-1").await.unwrap());
    }
}
