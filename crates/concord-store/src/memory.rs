use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex, broadcast};
use tracing::debug;

use crate::{HashRecord, MessageBus, Payload, SessionStore, Subscription};

/// Per-topic buffer. A subscriber further behind than this skips ahead.
const TOPIC_CAPACITY: usize = 1024;

struct Entry {
    fields: HashRecord,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// In-process session store and message bus.
///
/// Records expire lazily on access and eagerly through
/// [`MemoryStore::purge_expired`]. Topics are created on first subscribe
/// and dropped once a publish finds no subscribers left.
pub struct MemoryStore {
    hashes: Mutex<HashMap<String, Entry>>,
    topics: Mutex<HashMap<String, broadcast::Sender<Payload>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            hashes: Mutex::new(HashMap::new()),
            topics: Mutex::new(HashMap::new()),
        }
    }

    /// Removes every expired record. Returns how many were dropped.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut hashes = self.hashes.lock().await;
        let before = hashes.len();
        hashes.retain(|_, entry| entry.is_live(now));
        before - hashes.len()
    }

    /// Live subscribers on `topic`.
    pub async fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .await
            .get(topic)
            .map_or(0, |tx| tx.receiver_count())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn put_hash(&self, key: &str, fields: HashRecord, ttl: Duration) -> anyhow::Result<()> {
        let entry = Entry {
            fields,
            expires_at: Instant::now() + ttl,
        };
        self.hashes.lock().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn take_hash(&self, key: &str) -> anyhow::Result<Option<HashRecord>> {
        let now = Instant::now();
        let entry = self.hashes.lock().await.remove(key);
        Ok(entry.filter(|e| e.is_live(now)).map(|e| e.fields))
    }
}

#[async_trait]
impl MessageBus for MemoryStore {
    async fn publish(&self, topic: &str, payload: Payload) -> anyhow::Result<usize> {
        let mut topics = self.topics.lock().await;
        let Some(tx) = topics.get(topic) else {
            return Ok(0);
        };

        match tx.send(payload) {
            Ok(delivered) => Ok(delivered),
            Err(_) => {
                debug!("Dropping topic {} with no subscribers", topic);
                topics.remove(topic);
                Ok(0)
            }
        }
    }

    async fn subscribe(&self, topic: &str) -> anyhow::Result<Subscription> {
        let mut topics = self.topics.lock().await;
        let tx = topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0);
        Ok(Subscription::new(topic, tx.subscribe()))
    }
}
