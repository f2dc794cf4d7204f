use crate::Database;
use crate::models::{ChannelRow, MessageRow, ServerRow, UserRow};
use anyhow::{Result, anyhow};
use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

const USER_COLUMNS: &str = "id, username, password_hash, avatar_url, avatar_color, created_at";
const SERVER_COLUMNS: &str = "s.id, s.name, s.owner_id, s.is_public, s.created_at";
const CHANNEL_COLUMNS: &str = "id, server_id, name, created_by, created_at";

impl Database {
    // -- Users --

    /// Inserts a user. Returns `None` when the username is already taken;
    /// the check and the insert share the writer lock.
    pub fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        avatar_color: &str,
    ) -> Result<Option<UserRow>> {
        self.with_conn_mut(|conn| {
            if query_user_by_username(conn, username)?.is_some() {
                return Ok(None);
            }

            conn.execute(
                "INSERT INTO users (username, password_hash, avatar_url, avatar_color, created_at)
                 VALUES (?1, ?2, '', ?3, ?4)",
                params![username, password_hash, avatar_color, now()],
            )?;

            let id = conn.last_insert_rowid();
            query_user_by_id(conn, id)?
                .map(Some)
                .ok_or_else(|| anyhow!("User {} vanished after insert", id))
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_username(conn, username))
    }

    // -- Servers --

    /// Creates a server and enrolls its owner as the first member.
    pub fn create_server(&self, name: &str, owner_id: i64, is_public: bool) -> Result<ServerRow> {
        self.with_conn_mut(|conn| {
            let tx = conn.unchecked_transaction()?;
            let created_at = now();

            tx.execute(
                "INSERT INTO servers (name, owner_id, is_public, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![name, owner_id, is_public, created_at],
            )?;
            let id = tx.last_insert_rowid();

            tx.execute(
                "INSERT INTO server_members (server_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
                params![id, owner_id, created_at],
            )?;
            tx.commit()?;

            Ok(ServerRow {
                id,
                name: name.to_string(),
                owner_id,
                is_public,
                created_at,
            })
        })
    }

    pub fn get_server(&self, id: i64) -> Result<Option<ServerRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {SERVER_COLUMNS} FROM servers s WHERE s.id = ?1"),
                    [id],
                    server_from_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Adds a member. Returns false if they already belonged to the server.
    pub fn add_server_member(&self, server_id: i64, user_id: i64) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO server_members (server_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
                params![server_id, user_id, now()],
            )?;
            Ok(inserted > 0)
        })
    }

    pub fn is_server_member(&self, server_id: i64, user_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM server_members WHERE server_id = ?1 AND user_id = ?2",
                    params![server_id, user_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    pub fn list_user_servers(&self, user_id: i64) -> Result<Vec<ServerRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SERVER_COLUMNS}
                 FROM servers s
                 JOIN server_members m ON m.server_id = s.id
                 WHERE m.user_id = ?1
                 ORDER BY s.id"
            ))?;
            let rows = stmt
                .query_map([user_id], server_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Channels --

    pub fn create_channel(&self, server_id: i64, name: &str, created_by: i64) -> Result<ChannelRow> {
        self.with_conn_mut(|conn| {
            let created_at = now();
            conn.execute(
                "INSERT INTO channels (server_id, name, created_by, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![server_id, name, created_by, created_at],
            )?;

            Ok(ChannelRow {
                id: conn.last_insert_rowid(),
                server_id,
                name: name.to_string(),
                created_by,
                created_at,
            })
        })
    }

    pub fn get_channel(&self, id: i64) -> Result<Option<ChannelRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {CHANNEL_COLUMNS} FROM channels WHERE id = ?1"),
                    [id],
                    channel_from_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn list_channels(&self, server_id: i64) -> Result<Vec<ChannelRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CHANNEL_COLUMNS} FROM channels WHERE server_id = ?1 ORDER BY id"
            ))?;
            let rows = stmt
                .query_map([server_id], channel_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Messages --

    /// Appends a message and returns it joined with the author's display
    /// attributes.
    pub fn insert_message(&self, channel_id: i64, user_id: i64, content: &str) -> Result<MessageRow> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO messages (channel_id, user_id, content, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![channel_id, user_id, content, now()],
            )?;

            let id = conn.last_insert_rowid();
            conn.query_row(
                "SELECT m.id, m.channel_id, m.user_id, u.username, u.avatar_url, u.avatar_color,
                        m.content, m.created_at
                 FROM messages m
                 JOIN users u ON m.user_id = u.id
                 WHERE m.id = ?1",
                [id],
                message_from_row,
            )
            .map_err(Into::into)
        })
    }

    /// Newest first.
    pub fn get_messages(&self, channel_id: i64, limit: u32, offset: u32) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_messages(conn, channel_id, limit, offset))
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn query_user_by_username(conn: &Connection, username: &str) -> Result<Option<UserRow>> {
    let row = conn
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
            [username],
            user_from_row,
        )
        .optional()?;
    Ok(row)
}

fn query_user_by_id(conn: &Connection, id: i64) -> Result<Option<UserRow>> {
    let row = conn
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            [id],
            user_from_row,
        )
        .optional()?;
    Ok(row)
}

fn query_messages(conn: &Connection, channel_id: i64, limit: u32, offset: u32) -> Result<Vec<MessageRow>> {
    // JOIN users to fetch author attributes in a single query
    let mut stmt = conn.prepare(
        "SELECT m.id, m.channel_id, m.user_id, u.username, u.avatar_url, u.avatar_color,
                m.content, m.created_at
         FROM messages m
         JOIN users u ON m.user_id = u.id
         WHERE m.channel_id = ?1
         ORDER BY m.created_at DESC, m.id DESC
         LIMIT ?2 OFFSET ?3",
    )?;

    let rows = stmt
        .query_map(params![channel_id, limit, offset], message_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        password_hash: row.get(2)?,
        avatar_url: row.get(3)?,
        avatar_color: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn server_from_row(row: &Row<'_>) -> rusqlite::Result<ServerRow> {
    Ok(ServerRow {
        id: row.get(0)?,
        name: row.get(1)?,
        owner_id: row.get(2)?,
        is_public: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn channel_from_row(row: &Row<'_>) -> rusqlite::Result<ChannelRow> {
    Ok(ChannelRow {
        id: row.get(0)?,
        server_id: row.get(1)?,
        name: row.get(2)?,
        created_by: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        channel_id: row.get(1)?,
        user_id: row.get(2)?,
        username: row.get(3)?,
        avatar_url: row.get(4)?,
        avatar_color: row.get(5)?,
        content: row.get(6)?,
        created_at: row.get(7)?,
    })
}
