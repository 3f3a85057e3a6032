//! Work queue contract.
//!
//! At-least-once, partitioned topics. Messages are keyed by job id so every
//! attempt for a job routes to the same partition. Consumers acknowledge
//! only after handling a delivery; an unacknowledged delivery stays pending.

use crate::error::JobsResult;
use async_trait::async_trait;
use conductor_core::JobId;
use serde::de::DeserializeOwned;

/// One message handed to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Logical topic name.
    pub topic: String,
    /// Consumer group that received it.
    pub group: String,
    /// Physical partition (stream key for Redis).
    pub partition: String,
    /// Backend message id, unique within the partition.
    pub message_id: String,
    /// Routing key.
    pub key: JobId,
    /// JSON body.
    pub payload: String,
}

impl Delivery {
    /// Decodes the JSON body.
    pub fn decode<T: DeserializeOwned>(&self) -> JobsResult<T> {
        Ok(serde_json::from_str(&self.payload)?)
    }
}

/// Partitioned publish/subscribe channel.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Appends `payload` to the partition of `topic` owned by `key`.
    async fn publish(&self, topic: &str, key: JobId, payload: &str) -> JobsResult<()>;

    /// Waits a bounded time for the next message of `topic` for `group`.
    ///
    /// Returns `None` when nothing arrived in time.
    async fn receive(&self, topic: &str, group: &str, consumer: &str)
        -> JobsResult<Option<Delivery>>;

    /// Marks the delivery as handled.
    async fn ack(&self, delivery: &Delivery) -> JobsResult<()>;

    /// Marks the delivery as handled and puts its body back on the partition.
    async fn nack(&self, delivery: &Delivery) -> JobsResult<()>;
}
