//! Database row types. These map directly to SQLite rows and stay distinct
//! from the concord-types API models.

use chrono::{DateTime, Utc};
use tracing::warn;

use concord_types::models::{Channel, ChatMessage, Server, UserProfile};

pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub avatar_url: String,
    pub avatar_color: String,
    pub created_at: String,
}

pub struct ServerRow {
    pub id: i64,
    pub name: String,
    pub owner_id: i64,
    pub is_public: bool,
    pub created_at: String,
}

pub struct ChannelRow {
    pub id: i64,
    pub server_id: i64,
    pub name: String,
    pub created_by: i64,
    pub created_at: String,
}

/// A message joined with its author's current display attributes.
pub struct MessageRow {
    pub id: i64,
    pub channel_id: i64,
    pub user_id: i64,
    pub username: String,
    pub avatar_url: String,
    pub avatar_color: String,
    pub content: String,
    pub created_at: String,
}

impl UserRow {
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            user_id: self.id,
            username: self.username.clone(),
            avatar_url: self.avatar_url.clone(),
            avatar_color: self.avatar_color.clone(),
        }
    }
}

impl From<ServerRow> for Server {
    fn from(row: ServerRow) -> Self {
        Server {
            created_at: parse_timestamp(&row.created_at, "server", row.id),
            id: row.id,
            name: row.name,
            owner_id: row.owner_id,
            is_public: row.is_public,
        }
    }
}

impl From<ChannelRow> for Channel {
    fn from(row: ChannelRow) -> Self {
        Channel {
            created_at: parse_timestamp(&row.created_at, "channel", row.id),
            id: row.id,
            server_id: row.server_id,
            name: row.name,
            created_by: row.created_by,
        }
    }
}

impl From<MessageRow> for ChatMessage {
    fn from(row: MessageRow) -> Self {
        ChatMessage {
            created_at: parse_timestamp(&row.created_at, "message", row.id),
            id: row.id,
            channel_id: row.channel_id,
            user_id: row.user_id,
            username: row.username,
            content: row.content,
            avatar_url: row.avatar_url,
            avatar_color: row.avatar_color,
        }
    }
}

fn parse_timestamp(raw: &str, kind: &str, id: i64) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            warn!("Corrupt created_at '{}' on {} {}: {}", raw, kind, id, e);
            DateTime::default()
        })
}
