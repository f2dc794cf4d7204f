use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;

use concord_db::Database;
use concord_types::models::{ChatMessage, UserProfile};

/// Durable append of chat messages, invoked before a message is broadcast.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persists `content` in `channel_id` authored by `author` and returns
    /// the stored message with the author's display attributes.
    async fn append(&self, channel_id: i64, author: &UserProfile, content: &str) -> anyhow::Result<ChatMessage>;
}

pub struct SqliteMessageStore {
    db: Arc<Database>,
}

impl SqliteMessageStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn append(&self, channel_id: i64, author: &UserProfile, content: &str) -> anyhow::Result<ChatMessage> {
        let db = self.db.clone();
        let user_id = author.user_id;
        let content = content.to_string();

        let row = tokio::task::spawn_blocking(move || db.insert_message(channel_id, user_id, &content))
            .await
            .context("message insert task failed")??;

        Ok(row.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn append_returns_enriched_message() {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(Database::open(&dir.path().join("concord.db")).unwrap());
        let user = db.create_user("alice", "hash", "#9B59B6").unwrap().unwrap();
        let server = db.create_server("home", user.id, true).unwrap();
        let channel = db.create_channel(server.id, "general", user.id).unwrap();

        let store = SqliteMessageStore::new(db.clone());
        let message = store.append(channel.id, &user.profile(), "hi").await.unwrap();

        assert_eq!(message.channel_id, channel.id);
        assert_eq!(message.username, "alice");
        assert_eq!(message.avatar_color, "#9B59B6");
        assert_eq!(db.get_messages(channel.id, 10, 0).unwrap().len(), 1);
    }
}
