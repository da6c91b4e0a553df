//! SQLite-backed message cache
//!
//! The parsed message is stored as zstd-compressed JSON. The content flags
//! it was extracted with live in their own columns.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use rusqlite_migration::{M, Migrations};

use super::{CachedMessage, MessageCache};
use crate::models::{MessageId, StructuredMessage};
use crate::parser::ContentFlags;

/// zstd level 3 = good balance of speed vs compression
const ZSTD_LEVEL: i32 = 3;

/// Database migrations
///
/// The user_version pragma tracks which migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(
        r#"
        CREATE TABLE messages (
            id TEXT PRIMARY KEY,
            has_body INTEGER NOT NULL DEFAULT 0,
            has_headers INTEGER NOT NULL DEFAULT 0,
            has_attachments INTEGER NOT NULL DEFAULT 0,
            payload BLOB NOT NULL,  -- zstd compressed JSON
            cached_at TEXT NOT NULL
        );
        "#,
    )])
}

/// Message cache persisted in a SQLite database
pub struct SqliteMessageCache {
    conn: Mutex<Connection>,
}

impl SqliteMessageCache {
    /// Open (or create) the cache database at `db_path`
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create cache directory {parent:?}"))?;
        }

        let mut conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open cache database at {db_path:?}"))?;

        // WAL keeps readers unblocked while an entry is written
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            "#,
        )?;

        migrations()
            .to_latest(&mut conn)
            .context("Failed to run cache migrations")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl MessageCache for SqliteMessageCache {
    fn get(&self, id: &MessageId) -> Result<Option<CachedMessage>> {
        let row: Option<(ContentFlags, Vec<u8>)> = self
            .conn()
            .query_row(
                "SELECT has_body, has_headers, has_attachments, payload
                 FROM messages WHERE id = ?",
                [id.as_str()],
                |row| {
                    let content = ContentFlags {
                        body: row.get(0)?,
                        headers: row.get(1)?,
                        attachments: row.get(2)?,
                    };
                    Ok((content, row.get(3)?))
                },
            )
            .optional()?;

        let Some((content, payload)) = row else {
            return Ok(None);
        };

        let json = zstd::decode_all(payload.as_slice())
            .with_context(|| format!("Failed to decompress cached message {id}"))?;
        let message: StructuredMessage = serde_json::from_slice(&json)
            .with_context(|| format!("Failed to decode cached message {id}"))?;

        Ok(Some(CachedMessage::new(content, message)))
    }

    fn put(&self, entry: &CachedMessage) -> Result<()> {
        let json = serde_json::to_vec(&entry.message)?;
        let payload = zstd::encode_all(json.as_slice(), ZSTD_LEVEL)?;

        self.conn().execute(
            "INSERT OR REPLACE INTO messages
                (id, has_body, has_headers, has_attachments, payload, cached_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                entry.id().as_str(),
                entry.content.body,
                entry.content.headers,
                entry.content.attachments,
                payload,
                Utc::now().to_rfc3339(),
            ],
        )?;

        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.conn().execute("DELETE FROM messages", [])?;
        Ok(())
    }

    fn len(&self) -> Result<usize> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
