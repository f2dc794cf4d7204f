//! Ephemeral session storage and the cross-process message bus.
//!
//! Both capabilities sit behind traits so the token service and the relay
//! never depend on a concrete backend. [`memory::MemoryStore`] implements
//! both for single-process deployments and tests.

pub mod memory;
pub mod sweeper;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

pub use memory::MemoryStore;

/// Bus payload. Cheap to clone across every subscriber.
pub type Payload = Arc<str>;

/// A string-keyed hash record, as stored under one key.
pub type HashRecord = HashMap<String, String>;

/// TTL-capable key/value storage for hash records.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Replaces the record at `key` and sets its time-to-live.
    async fn put_hash(&self, key: &str, fields: HashRecord, ttl: Duration) -> anyhow::Result<()>;

    /// Reads and deletes the record at `key` in one atomic step. Of any
    /// number of concurrent callers at most one observes the record.
    async fn take_hash(&self, key: &str) -> anyhow::Result<Option<HashRecord>>;
}

/// Topic-addressed publish/subscribe.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Returns the number of subscribers the payload was handed to.
    async fn publish(&self, topic: &str, payload: Payload) -> anyhow::Result<usize>;

    async fn subscribe(&self, topic: &str) -> anyhow::Result<Subscription>;
}

/// A live subscription to one topic. Dropping it unsubscribes.
pub struct Subscription {
    topic: String,
    rx: broadcast::Receiver<Payload>,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, rx: broadcast::Receiver<Payload>) -> Self {
        Self {
            topic: topic.into(),
            rx,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next payload, or `None` once the backend closed the topic. A lagging
    /// subscriber skips what it missed and keeps receiving.
    pub async fn recv(&mut self) -> Option<Payload> {
        loop {
            match self.rx.recv().await {
                Ok(payload) => return Some(payload),
                Err(RecvError::Lagged(n)) => {
                    warn!("Subscription on {} lagged by {} messages", self.topic, n);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
