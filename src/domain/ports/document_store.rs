//! Document Store Port
//!
//! Persists the last-known document between runs. Not part of the
//! consistency contract: a failed save is logged and forgotten.

use async_trait::async_trait;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Load the last saved document, if any.
    async fn load(&self) -> anyhow::Result<Option<String>>;

    /// Replace the saved document.
    async fn save(&self, text: &str) -> anyhow::Result<()>;
}
