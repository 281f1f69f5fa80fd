//! SQLite Document Store
//!
//! Implements DocumentStore on a single key/value table. Each call opens the
//! database on the blocking pool so the async runtime never waits on disk.

use crate::domain::ports::DocumentStore;
use anyhow::Result;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};

/// Storage key of the shared document.
pub const DOCUMENT_KEY: &str = "tomodomo/code";

/// SQLite-backed document store.
pub struct SqliteDocumentStore {
    path: PathBuf,
    key: String,
}

impl SqliteDocumentStore {
    /// Open (creating if needed) the store at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let store = Self {
            path: path.as_ref().to_path_buf(),
            key: DOCUMENT_KEY.to_string(),
        };
        let db_path = store.path.clone();
        tokio::task::spawn_blocking(move || Self::init_db(&db_path)).await??;
        tracing::debug!("document store ready at {}", store.path.display());
        Ok(store)
    }

    /// Use a different storage key, e.g. to keep several documents in one file.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn init_db(path: &Path) -> Result<()> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS documents (
                key TEXT PRIMARY KEY,
                body TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );",
        )?;
        Ok(())
    }

    fn load_blocking(path: &Path, key: &str) -> Result<Option<String>> {
        let conn = Connection::open(path)?;
        let body = conn
            .query_row("SELECT body FROM documents WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;
        Ok(body)
    }

    fn save_blocking(path: &Path, key: &str, body: &str) -> Result<()> {
        let conn = Connection::open(path)?;
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default();
        conn.execute(
            "INSERT INTO documents (key, body, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
            params![key, body, now],
        )?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn load(&self) -> Result<Option<String>> {
        let path = self.path.clone();
        let key = self.key.clone();
        tokio::task::spawn_blocking(move || Self::load_blocking(&path, &key)).await?
    }

    async fn save(&self, text: &str) -> Result<()> {
        let path = self.path.clone();
        let key = self.key.clone();
        let body = text.to_string();
        tokio::task::spawn_blocking(move || Self::save_blocking(&path, &key, &body)).await??;
        tracing::debug!("saved {} bytes under {}", text.len(), self.key);
        Ok(())
    }
}
