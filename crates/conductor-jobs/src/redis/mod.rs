//! Redis-backed lock store and work queue.

mod lock;
mod queue;

pub use lock::RedisLockStore;
pub use queue::RedisWorkQueue;

use crate::error::{JobError, JobsResult};
use conductor_config::RedisConfig;
use deadpool_redis::{Config, Pool, Runtime};
use tracing::info;

/// Create a Redis connection pool.
pub async fn create_pool(config: &RedisConfig) -> JobsResult<Pool> {
    info!("Creating Redis connection pool...");

    let cfg = Config::from_url(&config.url);

    let pool = cfg
        .builder()
        .map_err(|e| JobError::Configuration(format!("Invalid Redis config: {e}")))?
        .max_size(config.pool_size)
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| JobError::Configuration(format!("Failed to create pool: {e}")))?;

    // Test connection
    let mut conn = pool.get().await?;
    let _: String = redis::cmd("PING").query_async(&mut *conn).await?;

    info!("Redis connection pool created successfully");

    Ok(pool)
}

/// Redis key builder for work queue streams.
#[derive(Debug, Clone)]
pub struct RedisKeys {
    prefix: String,
}

impl RedisKeys {
    /// Create a new key builder with the given prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Stream holding one partition of a topic.
    pub fn stream(&self, topic: &str, partition: u32) -> String {
        format!("{}:{}:{}", self.prefix, topic, partition)
    }

    /// Every partition stream of a topic, in partition order.
    pub fn streams(&self, topic: &str, partitions: u32) -> Vec<String> {
        (0..partitions.max(1))
            .map(|partition| self.stream(topic, partition))
            .collect()
    }
}

impl Default for RedisKeys {
    fn default() -> Self {
        Self::new("conductor")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_keys() {
        let keys = RedisKeys::new("test");

        assert_eq!(keys.stream("job-tasks", 3), "test:job-tasks:3");
        assert_eq!(
            keys.streams("job-results", 2),
            vec!["test:job-results:0", "test:job-results:1"]
        );
        assert_eq!(keys.streams("t", 0).len(), 1);
    }
}
