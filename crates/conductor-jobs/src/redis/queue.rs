//! Redis Streams work queue.
//!
//! Topic `T` with `P` partitions is stored as the streams `<prefix>:T:0` to
//! `<prefix>:T:(P-1)`. Consumers read through consumer groups, so an entry
//! stays in the group's pending list until it is acknowledged.
//!
//! A receive hands out, in order:
//! 1. an entry already pending for this consumer (left over from a read that
//!    returned several entries, or from a receive whose caller went away);
//! 2. an entry another consumer left unacknowledged for longer than the
//!    reclaim idle time (`XAUTOCLAIM`);
//! 3. a new entry (`XREADGROUP >`).
//!
//! Nothing is buffered in process, so a crashed consumer's entries stay
//! claimable by the rest of the group.

use super::RedisKeys;
use crate::error::JobsResult;
use crate::queue::{Delivery, WorkQueue};
use async_trait::async_trait;
use conductor_config::QueueConfig;
use conductor_core::JobId;
use deadpool_redis::Pool;
use parking_lot::Mutex;
use redis::streams::{
    StreamAutoClaimOptions, StreamAutoClaimReply, StreamId, StreamReadOptions, StreamReadReply,
};
use redis::AsyncCommands;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

const FIELD_KEY: &str = "key";
const FIELD_PAYLOAD: &str = "payload";

/// Redis Streams work queue.
pub struct RedisWorkQueue {
    pool: Pool,
    keys: RedisKeys,
    partitions: u32,
    block_ms: usize,
    reclaim_idle: Duration,
    /// (topic, group) pairs whose groups exist on every partition.
    groups: Mutex<HashSet<(String, String)>>,
}

impl RedisWorkQueue {
    pub fn new(pool: Pool, config: &QueueConfig) -> Self {
        Self {
            pool,
            keys: RedisKeys::new(&config.key_prefix),
            partitions: config.partitions.max(1),
            block_ms: usize::try_from(config.block_ms).unwrap_or(usize::MAX),
            reclaim_idle: config.reclaim_idle(),
            groups: Mutex::new(HashSet::new()),
        }
    }

    async fn conn(&self) -> JobsResult<deadpool_redis::Connection> {
        Ok(self.pool.get().await?)
    }

    async fn ensure_group(
        &self,
        conn: &mut deadpool_redis::Connection,
        topic: &str,
        group: &str,
    ) -> JobsResult<()> {
        let marker = (topic.to_string(), group.to_string());
        if self.groups.lock().contains(&marker) {
            return Ok(());
        }

        for stream in self.keys.streams(topic, self.partitions) {
            // Start at 0 so tasks published before the first worker came up
            // are still delivered.
            let created: redis::RedisResult<()> =
                conn.xgroup_create_mkstream(&stream, group, "0").await;
            match created {
                Ok(()) => debug!(stream = %stream, group = %group, "Created consumer group"),
                Err(e) if e.code() == Some("BUSYGROUP") => {}
                Err(e) => return Err(e.into()),
            }
        }

        self.groups.lock().insert(marker);
        Ok(())
    }

    /// First usable entry of a read reply. Malformed or deleted entries are
    /// acknowledged and skipped; any other entries stay pending for this
    /// consumer and come back on its next receive.
    async fn first_delivery(
        conn: &mut deadpool_redis::Connection,
        topic: &str,
        group: &str,
        reply: StreamReadReply,
    ) -> JobsResult<Option<Delivery>> {
        for stream in reply.keys {
            for entry in &stream.ids {
                if let Some(delivery) = Self::to_delivery(topic, group, &stream.key, entry) {
                    return Ok(Some(delivery));
                }
                warn!(stream = %stream.key, message_id = %entry.id, "Dropping malformed stream entry");
                let _: i64 = conn.xack(&stream.key, group, &[&entry.id]).await?;
            }
        }
        Ok(None)
    }

    /// Entry already delivered to `consumer` and not yet acknowledged.
    async fn own_pending(
        &self,
        conn: &mut deadpool_redis::Connection,
        topic: &str,
        group: &str,
        consumer: &str,
        streams: &[String],
    ) -> JobsResult<Option<Delivery>> {
        let ids = vec!["0"; streams.len()];
        let options = StreamReadOptions::default().group(group, consumer).count(1);
        let reply: Option<StreamReadReply> = conn.xread_options(streams, &ids, &options).await?;
        match reply {
            Some(reply) => Self::first_delivery(conn, topic, group, reply).await,
            None => Ok(None),
        }
    }

    /// Takes over one entry left idle by another consumer.
    async fn reclaim(
        &self,
        conn: &mut deadpool_redis::Connection,
        topic: &str,
        group: &str,
        consumer: &str,
        streams: &[String],
    ) -> JobsResult<Option<Delivery>> {
        let min_idle_ms = u64::try_from(self.reclaim_idle.as_millis()).unwrap_or(u64::MAX);
        for stream in streams {
            let reply: StreamAutoClaimReply = conn
                .xautoclaim_options(
                    stream,
                    group,
                    consumer,
                    min_idle_ms,
                    "0-0",
                    StreamAutoClaimOptions::default().count(1),
                )
                .await?;
            for entry in &reply.claimed {
                if let Some(delivery) = Self::to_delivery(topic, group, stream, entry) {
                    info!(stream = %stream, message_id = %entry.id, consumer, "Reclaimed idle entry");
                    return Ok(Some(delivery));
                }
                warn!(stream = %stream, message_id = %entry.id, "Dropping malformed stream entry");
                let _: i64 = conn.xack(stream, group, &[&entry.id]).await?;
            }
        }
        Ok(None)
    }

    fn to_delivery(topic: &str, group: &str, stream: &str, entry: &StreamId) -> Option<Delivery> {
        let key: String = entry.get(FIELD_KEY)?;
        let payload: String = entry.get(FIELD_PAYLOAD)?;
        Some(Delivery {
            topic: topic.to_string(),
            group: group.to_string(),
            partition: stream.to_string(),
            message_id: entry.id.clone(),
            key: JobId::parse(&key).ok()?,
            payload,
        })
    }
}

#[async_trait]
impl WorkQueue for RedisWorkQueue {
    async fn publish(&self, topic: &str, key: JobId, payload: &str) -> JobsResult<()> {
        let stream = self.keys.stream(topic, key.partition(self.partitions));
        let routing_key = key.to_string();

        let mut conn = self.conn().await?;
        let message_id: String = conn
            .xadd(
                &stream,
                "*",
                &[(FIELD_KEY, routing_key.as_str()), (FIELD_PAYLOAD, payload)],
            )
            .await?;

        debug!(stream = %stream, message_id = %message_id, job_id = %key, "Published message");
        Ok(())
    }

    async fn receive(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
    ) -> JobsResult<Option<Delivery>> {
        let mut conn = self.conn().await?;
        self.ensure_group(&mut conn, topic, group).await?;
        let streams = self.keys.streams(topic, self.partitions);

        if let Some(delivery) = self
            .own_pending(&mut conn, topic, group, consumer, &streams)
            .await?
        {
            return Ok(Some(delivery));
        }
        if let Some(delivery) = self
            .reclaim(&mut conn, topic, group, consumer, &streams)
            .await?
        {
            return Ok(Some(delivery));
        }

        let ids = vec![">"; streams.len()];
        let options = StreamReadOptions::default()
            .group(group, consumer)
            .count(1)
            .block(self.block_ms);
        let reply: Option<StreamReadReply> =
            conn.xread_options(&streams, &ids, &options).await?;
        match reply {
            Some(reply) => Self::first_delivery(&mut conn, topic, group, reply).await,
            None => Ok(None),
        }
    }

    async fn ack(&self, delivery: &Delivery) -> JobsResult<()> {
        let mut conn = self.conn().await?;
        let _: i64 = conn
            .xack(&delivery.partition, &delivery.group, &[&delivery.message_id])
            .await?;
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery) -> JobsResult<()> {
        let routing_key = delivery.key.to_string();
        let mut conn = self.conn().await?;
        let _: () = redis::pipe()
            .atomic()
            .xack(&delivery.partition, &delivery.group, &[&delivery.message_id])
            .ignore()
            .xadd(
                &delivery.partition,
                "*",
                &[
                    (FIELD_KEY, routing_key.as_str()),
                    (FIELD_PAYLOAD, delivery.payload.as_str()),
                ],
            )
            .ignore()
            .query_async(&mut *conn)
            .await?;
        debug!(stream = %delivery.partition, job_id = %delivery.key, "Re-queued message");
        Ok(())
    }
}
