//! Repository implementations for SQLite-backed persistence.
//!
//! `ChatRepository` stores chat records (messages serialized as JSON);
//! `SchemaCacheRepository` stores schema summaries keyed by content hash.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use tracing::debug;

use quarry_core::error::QuarryError;
use quarry_core::types::{ChatRecord, ChatSummary, Message};

use crate::db::Database;

/// Repository for persisted chat records.
pub struct ChatRepository {
    db: Arc<Database>,
}

impl ChatRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert or update a chat record.
    ///
    /// The owner and creation time of an existing row are never changed.
    pub fn save(&self, record: &ChatRecord) -> Result<(), QuarryError> {
        let messages = serde_json::to_string(&record.messages)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO chats (id, user_id, title, path, created_at, data_source_url, data_source_token, messages)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(id) DO UPDATE SET
                    title = excluded.title,
                    data_source_url = excluded.data_source_url,
                    data_source_token = excluded.data_source_token,
                    messages = excluded.messages,
                    updated_at = strftime('%s', 'now')",
                rusqlite::params![
                    record.id,
                    record.user_id,
                    record.title,
                    record.path,
                    record.created_at.to_rfc3339(),
                    record.data_source_url,
                    record.data_source_token,
                    messages,
                ],
            )
            .map_err(|e| QuarryError::Storage(format!("Failed to save chat: {}", e)))?;
            Ok(())
        })?;
        debug!(chat_id = %record.id, messages = record.messages.len(), "Chat saved");
        Ok(())
    }

    /// Find a chat by ID.
    pub fn find_by_id(&self, id: &str) -> Result<Option<ChatRecord>, QuarryError> {
        let row = self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, user_id, title, path, created_at, data_source_url, data_source_token, messages
                 FROM chats WHERE id = ?1",
                rusqlite::params![id],
                read_row,
            )
            .optional()
            .map_err(|e| QuarryError::Storage(e.to_string()))
        })?;

        row.map(row_to_record).transpose()
    }

    /// List a user's chats, newest first. Message logs are not read.
    pub fn list_by_user(&self, user_id: &str) -> Result<Vec<ChatSummary>, QuarryError> {
        let rows = self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, title, created_at, path
                     FROM chats WHERE user_id = ?1
                     ORDER BY created_at DESC",
                )
                .map_err(|e| QuarryError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map(rusqlite::params![user_id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })
                .map_err(|e| QuarryError::Storage(e.to_string()))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| QuarryError::Storage(e.to_string()))?;
            Ok(rows)
        })?;

        rows.into_iter()
            .map(|(id, title, created_at, path)| {
                let created_at = parse_created_at(&id, &created_at)?;
                Ok(ChatSummary {
                    id,
                    title,
                    created_at,
                    path,
                })
            })
            .collect()
    }
}

/// Durable schema-summary cache. Entries are never evicted.
pub struct SchemaCacheRepository {
    db: Arc<Database>,
}

impl SchemaCacheRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, QuarryError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT filtered FROM schema_cache WHERE key = ?1",
                rusqlite::params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| QuarryError::Storage(e.to_string()))
        })
    }

    pub fn put(&self, key: &str, filtered: &str) -> Result<(), QuarryError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO schema_cache (key, filtered) VALUES (?1, ?2)",
                rusqlite::params![key, filtered],
            )
            .map_err(|e| QuarryError::Storage(format!("Failed to store schema summary: {}", e)))?;
            Ok(())
        })
    }
}

// =============================================================================
// Row mapping
// =============================================================================

struct ChatRow {
    id: String,
    user_id: String,
    title: String,
    path: String,
    created_at: String,
    data_source_url: String,
    data_source_token: String,
    messages: String,
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatRow> {
    Ok(ChatRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        path: row.get(3)?,
        created_at: row.get(4)?,
        data_source_url: row.get(5)?,
        data_source_token: row.get(6)?,
        messages: row.get(7)?,
    })
}

fn parse_created_at(id: &str, raw: &str) -> Result<DateTime<Utc>, QuarryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| QuarryError::Storage(format!("Invalid created_at for chat {}: {}", id, e)))
}

fn row_to_record(row: ChatRow) -> Result<ChatRecord, QuarryError> {
    let created_at = parse_created_at(&row.id, &row.created_at)?;
    let messages: Vec<Message> = serde_json::from_str(&row.messages)?;

    Ok(ChatRecord {
        id: row.id,
        title: row.title,
        user_id: row.user_id,
        created_at,
        messages,
        path: row.path,
        data_source_url: row.data_source_url,
        data_source_token: row.data_source_token,
    })
}
