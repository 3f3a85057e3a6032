//! Redis lease store.

use crate::error::JobsResult;
use crate::lock::LockStore;
use async_trait::async_trait;
use deadpool_redis::Pool;
use redis::{AsyncCommands, Script};
use std::time::Duration;

/// Deletes KEYS[1] only while it still holds ARGV[1].
const COMPARE_AND_DELETE: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Lease store on plain Redis string keys.
pub struct RedisLockStore {
    pool: Pool,
    release: Script,
}

impl RedisLockStore {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            release: Script::new(COMPARE_AND_DELETE),
        }
    }

    async fn conn(&self) -> JobsResult<deadpool_redis::Connection> {
        Ok(self.pool.get().await?)
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl LockStore for RedisLockStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> JobsResult<bool> {
        let mut conn = self.conn().await?;
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut *conn)
            .await?;
        Ok(result.is_some())
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> JobsResult<bool> {
        let mut conn = self.conn().await?;
        let deleted: i64 = self
            .release
            .key(key)
            .arg(expected)
            .invoke_async(&mut *conn)
            .await?;
        Ok(deleted == 1)
    }

    async fn put(&self, key: &str, value: &str, ttl: Duration) -> JobsResult<()> {
        let mut conn = self.conn().await?;
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut *conn)
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> JobsResult<Option<String>> {
        let mut conn = self.conn().await?;
        Ok(conn.get(key).await?)
    }
}
