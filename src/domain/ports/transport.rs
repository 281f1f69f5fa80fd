//! Transport Port
//!
//! Point-to-point, message-oriented channel addressed by opaque peer ids.
//! Connection setup, NAT traversal and per-link reliability live behind this
//! interface; the membership and sync layers only see text payloads.

use crate::domain::entities::PeerId;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Inbound payload handler.
///
/// Receives the sender id and the payload with the registered prefix
/// stripped. A returned value is sent back to the sender when the inbound
/// payload was a request.
pub type MessageHandler = Arc<dyn Fn(&PeerId, &str) -> Option<String> + Send + Sync>;

/// Transport errors surfaced to callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("deadline exceeded after {after:?} waiting for {peer}")]
    DeadlineExceeded { peer: PeerId, after: Duration },
    #[error("transport is not ready")]
    NotReady,
    #[error("transport closed")]
    Closed,
}

/// Message transport facade consumed by the core.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Resolve once the transport has a concrete local id.
    async fn wait_ready(&self) -> Result<PeerId, TransportError>;

    /// Local id, if the transport is ready.
    fn local_id(&self) -> Option<PeerId>;

    /// Best-effort, fire-and-forget send. Sends to self are dropped.
    fn send(&self, target: &PeerId, payload: String);

    /// Register a handler for payloads starting with `prefix`.
    ///
    /// Dispatch checks an exact match first, then the longest registered
    /// prefix. Registering the same prefix again replaces the handler.
    fn register_handler(&self, prefix: &str, handler: MessageHandler);

    /// Send a tagged request and wait for the matching reply.
    async fn request(&self, target: &PeerId, payload: String) -> Result<String, TransportError>;
}
