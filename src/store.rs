//! User and message persistence
//!
//! Users are upserted on every update; both sides of each exchange are
//! appended to a message log. Neither feeds the provider window, which
//! lives in memory in [`crate::session`].

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use tracing::{debug, info};

use crate::session::Role;
use crate::transport::TelegramUser;

/// Stored user profile
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: Option<String>,
    pub is_bot: bool,
    pub language_code: Option<String>,
    pub message_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserStats {
    pub total_messages: i64,
    pub member_since: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// One logged message
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    pub chat_id: i64,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    pub fn now(chat_id: i64, role: Role, content: impl Into<String>) -> Self {
        Self {
            chat_id,
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

pub trait UserStore: Send + Sync {
    /// Insert or refresh a user's profile and bump `last_seen`
    fn upsert(&self, user: &TelegramUser) -> Result<User>;

    fn get(&self, user_id: i64) -> Result<Option<User>>;

    fn touch(&self, user_id: i64) -> Result<()>;

    fn increment_message_count(&self, user_id: i64) -> Result<()>;

    fn stats(&self, user_id: i64) -> Result<Option<UserStats>>;
}

pub trait MessageStore: Send + Sync {
    fn save(&self, message: &StoredMessage) -> Result<()>;

    /// Most recent messages for a chat, oldest first
    fn last_messages(&self, chat_id: i64, limit: usize) -> Result<Vec<StoredMessage>>;
}

/// SQLite implementation of both stores
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn ts(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn from_ts(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        is_bot: row.get(4)?,
        language_code: row.get(5)?,
        message_count: row.get(6)?,
        created_at: from_ts(row.get(7)?),
        updated_at: from_ts(row.get(8)?),
        last_seen: from_ts(row.get(9)?),
    })
}

const USER_COLUMNS: &str =
    "id, username, first_name, last_name, is_bot, language_code, message_count, created_at, updated_at, last_seen";

impl SqliteStore {
    /// Open or create the database file
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let store = Self::from_connection(conn)?;
        info!("Relay store opened: {}", path.display());
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY,
                username TEXT,
                first_name TEXT NOT NULL,
                last_name TEXT,
                is_bot INTEGER NOT NULL DEFAULT 0,
                language_code TEXT,
                message_count INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                last_seen INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id INTEGER NOT NULL,
                role TEXT NOT NULL CHECK(role IN ('user', 'assistant')),
                content TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_messages_chat
                ON messages(chat_id, created_at DESC);
            "#,
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }
}

impl UserStore for SqliteStore {
    fn upsert(&self, user: &TelegramUser) -> Result<User> {
        let now = ts(Utc::now());
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO users (id, username, first_name, last_name, is_bot, language_code, created_at, updated_at, last_seen)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, ?7)
             ON CONFLICT(id) DO UPDATE SET
                username = excluded.username,
                first_name = excluded.first_name,
                last_name = excluded.last_name,
                language_code = excluded.language_code,
                updated_at = excluded.updated_at,
                last_seen = excluded.last_seen",
            params![
                user.id,
                user.username,
                user.first_name,
                user.last_name,
                user.is_bot,
                user.language_code,
                now
            ],
        )?;

        let stored = conn.query_row(
            &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
            params![user.id],
            user_from_row,
        )?;
        debug!("Upserted user {}", user.id);
        Ok(stored)
    }

    fn get(&self, user_id: i64) -> Result<Option<User>> {
        let conn = self.conn.lock();
        let user = conn
            .query_row(
                &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
                params![user_id],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    fn touch(&self, user_id: i64) -> Result<()> {
        self.conn.lock().execute(
            "UPDATE users SET last_seen = ?1 WHERE id = ?2",
            params![ts(Utc::now()), user_id],
        )?;
        Ok(())
    }

    fn increment_message_count(&self, user_id: i64) -> Result<()> {
        self.conn.lock().execute(
            "UPDATE users SET message_count = message_count + 1 WHERE id = ?1",
            params![user_id],
        )?;
        Ok(())
    }

    fn stats(&self, user_id: i64) -> Result<Option<UserStats>> {
        Ok(self.get(user_id)?.map(|u| UserStats {
            total_messages: u.message_count,
            member_since: u.created_at,
            last_seen: u.last_seen,
        }))
    }
}

impl MessageStore for SqliteStore {
    fn save(&self, message: &StoredMessage) -> Result<()> {
        self.conn.lock().execute(
            "INSERT INTO messages (chat_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                message.chat_id,
                message.role.as_str(),
                message.content,
                ts(message.created_at)
            ],
        )?;
        Ok(())
    }

    fn last_messages(&self, chat_id: i64, limit: usize) -> Result<Vec<StoredMessage>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT chat_id, role, content, created_at FROM messages
             WHERE chat_id = ?1
             ORDER BY created_at DESC, id DESC
             LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![chat_id, limit as i64], |row| {
            let role: String = row.get(1)?;
            Ok((row.get::<_, i64>(0)?, role, row.get::<_, String>(2)?, row.get::<_, i64>(3)?))
        })?;

        let mut messages = Vec::new();
        for row in rows {
            let (chat_id, role, content, created_at) = row?;
            let role = Role::parse(&role).with_context(|| format!("unknown role in message log: {}", role))?;
            messages.push(StoredMessage {
                chat_id,
                role,
                content,
                created_at: from_ts(created_at),
            });
        }
        messages.reverse();
        Ok(messages)
    }
}
