//! Transport double for unit tests: ready immediately, records every send.

use crate::domain::entities::PeerId;
use crate::domain::ports::{MessageHandler, Transport, TransportError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub struct RecordingTransport {
    id: PeerId,
    sent: Mutex<Vec<(PeerId, String)>>,
    handlers: Mutex<HashMap<String, MessageHandler>>,
}

impl RecordingTransport {
    pub fn ready(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: PeerId::new(id),
            sent: Mutex::new(Vec::new()),
            handlers: Mutex::new(HashMap::new()),
        })
    }

    pub fn sent_to(&self, peer: &str) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter(|(to, _)| to.as_str() == peer)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }

    /// Feed an inbound payload to the handler registered for `prefix`.
    pub fn deliver(&self, from: &str, prefix: &str, body: &str) -> Option<String> {
        let handler = self.handlers.lock().get(prefix).cloned()?;
        handler(&PeerId::new(from), body)
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn wait_ready(&self) -> Result<PeerId, TransportError> {
        Ok(self.id.clone())
    }

    fn local_id(&self) -> Option<PeerId> {
        Some(self.id.clone())
    }

    fn send(&self, target: &PeerId, payload: String) {
        if target != &self.id {
            self.sent.lock().push((target.clone(), payload));
        }
    }

    fn register_handler(&self, prefix: &str, handler: MessageHandler) {
        self.handlers.lock().insert(prefix.to_string(), handler);
    }

    async fn request(&self, target: &PeerId, _payload: String) -> Result<String, TransportError> {
        Err(TransportError::DeadlineExceeded {
            peer: target.clone(),
            after: Duration::from_secs(5),
        })
    }
}
