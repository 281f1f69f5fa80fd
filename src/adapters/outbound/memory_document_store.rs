//! In-Memory Document Store
//!
//! Volatile DocumentStore for tests and for running without a database file.

use crate::domain::ports::DocumentStore;
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

/// Document store that keeps the text in memory.
#[derive(Default)]
pub struct MemoryDocumentStore {
    body: RwLock<Option<String>>,
    saves: AtomicU64,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with `text`.
    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            body: RwLock::new(Some(text.into())),
            saves: AtomicU64::new(0),
        }
    }

    /// Number of completed saves.
    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::Relaxed)
    }

    /// Last saved text without going through the async port.
    pub fn current(&self) -> Option<String> {
        self.body.read().clone()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn load(&self) -> Result<Option<String>> {
        Ok(self.body.read().clone())
    }

    async fn save(&self, text: &str) -> Result<()> {
        *self.body.write() = Some(text.to_string());
        self.saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
