// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite-based storage for chunk metadata.
//!
//! One row per chunk id holding the source, position, cleaned text and the
//! caller's JSON annotations. Embeddings live in the vector store; the id is
//! the only link between the two.

use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::errors::{RagError, Result};

/// Caller-supplied key-value annotations attached to every chunk of a document.
pub type ChunkMeta = serde_json::Map<String, serde_json::Value>;

/// A chunk without its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Unique identifier, shared with the vector store
    pub id: String,
    /// URL or file path the chunk came from
    pub source: String,
    /// Position within the ingestion batch that produced it (0-based)
    pub chunk_index: usize,
    /// Cleaned chunk text
    pub text: String,
    /// Caller annotations
    #[serde(default)]
    pub meta: ChunkMeta,
}

/// SQLite-backed chunk table.
pub struct MetadataStore {
    conn: Connection,
}

impl MetadataStore {
    /// Opens or creates the metadata database at the specified path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Opens an existing database without write access.
    ///
    /// Returns `None` when the file does not exist; nothing is created.
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(None);
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Some(Self { conn }))
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS store_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                text TEXT NOT NULL,
                meta TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_chunks_source
                ON chunks(source, chunk_index);
            "#,
        )?;
        self.conn.execute(
            "INSERT OR IGNORE INTO store_meta (key, value) VALUES ('schema_version', '1')",
            [],
        )?;
        Ok(())
    }

    /// Inserts records in one transaction. A duplicate id replaces the earlier row.
    pub fn insert(&mut self, records: &[ChunkRecord]) -> Result<()> {
        self.insert_then(records, || Ok(()))
    }

    /// Inserts records, runs `before_commit`, and commits only if it succeeds.
    ///
    /// Lets a caller tie another durable write to this transaction: if
    /// `before_commit` fails, the inserted rows are rolled back.
    pub fn insert_then<F>(&mut self, records: &[ChunkRecord], before_commit: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        let tx = self.conn.transaction()?;
        let created_at = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO chunks (id, source, chunk_index, text, meta, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(id) DO UPDATE SET
                    source = excluded.source,
                    chunk_index = excluded.chunk_index,
                    text = excluded.text,
                    meta = excluded.meta,
                    created_at = excluded.created_at
                "#,
            )?;

            for record in records {
                let meta = serde_json::to_string(&record.meta)?;
                stmt.execute(params![
                    record.id,
                    record.source,
                    record.chunk_index as i64,
                    record.text,
                    meta,
                    created_at
                ])?;
            }
        }

        before_commit()?;
        tx.commit()?;
        Ok(())
    }

    /// Retrieves a chunk by id, or [`RagError::NotFound`].
    pub fn get(&self, id: &str) -> Result<ChunkRecord> {
        let row = self
            .conn
            .query_row(
                "SELECT id, source, chunk_index, text, meta FROM chunks WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, source, chunk_index, text, meta)) = row else {
            return Err(RagError::NotFound { id: id.to_string() });
        };

        let meta: ChunkMeta = serde_json::from_str(&meta)
            .map_err(|e| RagError::corrupt(format!("chunk {} has unreadable meta: {}", id, e)))?;
        let chunk_index = usize::try_from(chunk_index).map_err(|_| {
            RagError::corrupt(format!("chunk {} has negative index {}", id, chunk_index))
        })?;

        Ok(ChunkRecord {
            id,
            source,
            chunk_index,
            text,
            meta,
        })
    }

    /// Lists every chunk id.
    pub fn ids(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT id FROM chunks")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    /// Counts total number of chunk rows.
    pub fn count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Counts distinct sources.
    pub fn count_sources(&self) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(DISTINCT source) FROM chunks",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Gets store metadata value by key.
    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM store_meta WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Sets store metadata value.
    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO store_meta (key, value)
            VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
            params![key, value],
        )?;
        Ok(())
    }
}
