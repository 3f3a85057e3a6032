//! In-process lock store and work queue.
//!
//! Same contracts as the Redis backends, for single-process deployments and
//! tests. Expiry uses `tokio::time`, so paused-clock tests can step through
//! lease TTLs.

use crate::error::{JobError, JobsResult};
use crate::lock::LockStore;
use crate::queue::{Delivery, WorkQueue};
use async_trait::async_trait;
use conductor_core::JobId;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

struct Lease {
    value: String,
    expires_at: Instant,
}

/// In-memory lock store.
#[derive(Default)]
pub struct InMemoryLockStore {
    entries: Mutex<HashMap<String, Lease>>,
    unavailable: AtomicBool,
}

impl InMemoryLockStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every operation fail until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Drops `key` as if its TTL had run out.
    pub fn expire(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    fn check_available(&self) -> JobsResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(JobError::Store("lock store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> JobsResult<bool> {
        self.check_available()?;
        let now = Instant::now();
        let mut entries = self.entries.lock();
        if entries.get(key).is_some_and(|lease| lease.expires_at > now) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Lease {
                value: value.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> JobsResult<bool> {
        self.check_available()?;
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(lease) if lease.expires_at > now && lease.value == expected => {
                entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn put(&self, key: &str, value: &str, ttl: Duration) -> JobsResult<()> {
        self.check_available()?;
        self.entries.lock().insert(
            key.to_string(),
            Lease {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> JobsResult<Option<String>> {
        self.check_available()?;
        let now = Instant::now();
        Ok(self
            .entries
            .lock()
            .get(key)
            .filter(|lease| lease.expires_at > now)
            .map(|lease| lease.value.clone()))
    }
}

/// Counters for one topic of the in-memory queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TopicStats {
    pub published: u64,
    /// Waiting for a consumer.
    pub ready: usize,
    /// Received but not yet acknowledged.
    pub in_flight: usize,
    pub acked: u64,
    pub nacked: u64,
}

struct InFlight {
    delivery: Delivery,
    since: Instant,
}

#[derive(Default)]
struct TopicState {
    ready: VecDeque<Delivery>,
    in_flight: HashMap<String, InFlight>,
    published: u64,
    acked: u64,
    nacked: u64,
}

/// In-memory work queue.
///
/// Each topic behaves as a single consumer group: a message is handed to
/// exactly one receiver regardless of the group name it asks with. A message
/// left unacknowledged for longer than the reclaim idle time is handed out
/// again.
pub struct InMemoryWorkQueue {
    partitions: u32,
    block: Duration,
    reclaim_idle: Option<Duration>,
    topics: Mutex<HashMap<String, TopicState>>,
    next_id: AtomicU64,
    notify: Notify,
    fail_publish: AtomicBool,
}

impl InMemoryWorkQueue {
    /// Creates a queue with `partitions` partitions per topic, blocking
    /// receivers for at most `block`.
    #[must_use]
    pub fn new(partitions: u32, block: Duration) -> Self {
        Self {
            partitions: partitions.max(1),
            block,
            reclaim_idle: None,
            topics: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            notify: Notify::new(),
            fail_publish: AtomicBool::new(false),
        }
    }

    /// Redelivers messages left unacknowledged for longer than `idle`.
    #[must_use]
    pub fn with_reclaim_idle(mut self, idle: Duration) -> Self {
        self.reclaim_idle = Some(idle);
        self
    }

    /// Makes `publish` fail until reset.
    pub fn set_publish_failure(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn stats(&self, topic: &str) -> TopicStats {
        self.topics
            .lock()
            .get(topic)
            .map(|state| TopicStats {
                published: state.published,
                ready: state.ready.len(),
                in_flight: state.in_flight.len(),
                acked: state.acked,
                nacked: state.nacked,
            })
            .unwrap_or_default()
    }

    /// Bodies waiting on `topic`, oldest first.
    pub fn ready_payloads(&self, topic: &str) -> Vec<String> {
        self.topics
            .lock()
            .get(topic)
            .map(|state| state.ready.iter().map(|d| d.payload.clone()).collect())
            .unwrap_or_default()
    }

    fn next_message_id(&self) -> String {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{id}-0")
    }

    fn enqueue(&self, delivery: Delivery) {
        self.topics
            .lock()
            .entry(delivery.topic.clone())
            .or_default()
            .ready
            .push_back(delivery);
        self.notify.notify_waiters();
    }

    fn try_take(&self, topic: &str, group: &str) -> Option<Delivery> {
        let now = Instant::now();
        let mut topics = self.topics.lock();
        let state = topics.get_mut(topic)?;

        if let Some(idle) = self.reclaim_idle {
            let abandoned = state
                .in_flight
                .values_mut()
                .filter(|entry| now.duration_since(entry.since) >= idle)
                .min_by(|a, b| a.since.cmp(&b.since));
            if let Some(entry) = abandoned {
                entry.since = now;
                entry.delivery.group = group.to_string();
                return Some(entry.delivery.clone());
            }
        }

        let mut delivery = state.ready.pop_front()?;
        delivery.group = group.to_string();
        state.in_flight.insert(
            delivery.message_id.clone(),
            InFlight {
                delivery: delivery.clone(),
                since: now,
            },
        );
        Some(delivery)
    }
}

impl Default for InMemoryWorkQueue {
    fn default() -> Self {
        Self::new(6, Duration::from_millis(1000))
    }
}

#[async_trait]
impl WorkQueue for InMemoryWorkQueue {
    async fn publish(&self, topic: &str, key: JobId, payload: &str) -> JobsResult<()> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(JobError::Publish(format!("topic {topic} unavailable")));
        }
        let delivery = Delivery {
            topic: topic.to_string(),
            group: String::new(),
            partition: format!("{topic}:{}", key.partition(self.partitions)),
            message_id: self.next_message_id(),
            key,
            payload: payload.to_string(),
        };
        self.topics
            .lock()
            .entry(topic.to_string())
            .or_default()
            .published += 1;
        self.enqueue(delivery);
        Ok(())
    }

    async fn receive(
        &self,
        topic: &str,
        group: &str,
        _consumer: &str,
    ) -> JobsResult<Option<Delivery>> {
        let deadline = Instant::now() + self.block;
        loop {
            // Register interest before checking so a publish in between
            // still wakes us.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(delivery) = self.try_take(topic, group) {
                return Ok(Some(delivery));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> JobsResult<()> {
        let mut topics = self.topics.lock();
        if let Some(state) = topics.get_mut(&delivery.topic) {
            if state.in_flight.remove(&delivery.message_id).is_some() {
                state.acked += 1;
            }
        }
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery) -> JobsResult<()> {
        let requeued = {
            let mut topics = self.topics.lock();
            let Some(state) = topics.get_mut(&delivery.topic) else {
                return Ok(());
            };
            if state.in_flight.remove(&delivery.message_id).is_none() {
                return Ok(());
            }
            state.nacked += 1;
            let mut requeued = delivery.clone();
            requeued.message_id = self.next_message_id();
            requeued
        };
        self.enqueue(requeued);
        Ok(())
    }
}
