//! In-Process Transport
//!
//! Implements the Transport port over tokio channels. Every endpoint owns one
//! inbound queue drained by a single task, which gives per-link FIFO delivery
//! and serial handler execution. Used by the demo binary and the tests.
//!
//! Request/response framing follows the Sans-IO split: [`encode_request`],
//! [`encode_response`] and [`decode_frame`] are pure; the endpoint only moves
//! strings around.

use crate::domain::entities::PeerId;
use crate::domain::ports::{MessageHandler, Transport, TransportError};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, oneshot, watch};

/// Default deadline for [`Transport::request`].
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

// ==================== Sans-IO Functions ====================

/// A decoded inbound payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame<'a> {
    /// `>tag>body`: the sender waits for a reply
    Request { tag: u64, body: &'a str },
    /// `<tag<body`: reply to one of our requests
    Response { tag: u64, body: &'a str },
    /// Anything else
    Plain(&'a str),
}

/// Frame a request body with its tag.
pub fn encode_request(tag: u64, body: &str) -> String {
    format!(">{}>{}", tag, body)
}

/// Frame a reply body with the tag of the request it answers.
pub fn encode_response(tag: u64, body: &str) -> String {
    format!("<{}<{}", tag, body)
}

fn split_tag(payload: &str, marker: char) -> Option<(u64, &str)> {
    let rest = payload.strip_prefix(marker)?;
    let (digits, body) = rest.split_once(marker)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((digits.parse().ok()?, body))
}

/// Classify an inbound payload.
pub fn decode_frame(payload: &str) -> Frame<'_> {
    if let Some((tag, body)) = split_tag(payload, '<') {
        return Frame::Response { tag, body };
    }
    if let Some((tag, body)) = split_tag(payload, '>') {
        return Frame::Request { tag, body };
    }
    Frame::Plain(payload)
}

/// Prefix-keyed handler table.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, MessageHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, prefix: &str, handler: MessageHandler) {
        self.handlers.write().insert(prefix.to_string(), handler);
    }

    /// Find the handler for `payload`: exact match first, then the longest
    /// registered prefix. Returns the handler and the payload with the
    /// prefix stripped.
    pub fn resolve<'a>(&self, payload: &'a str) -> Option<(MessageHandler, &'a str)> {
        let guard = self.handlers.read();
        if let Some(handler) = guard.get(payload) {
            return Some((handler.clone(), ""));
        }
        guard
            .iter()
            .filter(|(prefix, _)| payload.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(prefix, handler)| (handler.clone(), &payload[prefix.len()..]))
    }
}

struct Envelope {
    from: PeerId,
    payload: String,
}

/// Shared medium connecting in-process endpoints.
pub struct MemoryNetwork {
    endpoints: DashMap<PeerId, mpsc::UnboundedSender<Envelope>>,
    isolated: DashSet<PeerId>,
    request_timeout: Duration,
}

impl MemoryNetwork {
    pub fn new() -> Arc<Self> {
        Self::with_request_timeout(DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_request_timeout(request_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            endpoints: DashMap::new(),
            isolated: DashSet::new(),
            request_timeout,
        })
    }

    /// Create an endpoint with a random id. It is not ready until
    /// [`MemoryTransport::open`].
    pub fn endpoint(self: &Arc<Self>) -> Arc<MemoryTransport> {
        self.endpoint_with_id(PeerId::new(uuid::Uuid::new_v4().to_string()))
    }

    /// Create an endpoint with a fixed id.
    pub fn endpoint_with_id(self: &Arc<Self>, id: PeerId) -> Arc<MemoryTransport> {
        let (ready_tx, _) = watch::channel(None);
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or_default();

        Arc::new(MemoryTransport {
            id,
            network: self.clone(),
            ready: ready_tx,
            handlers: HandlerRegistry::new(),
            pending: DashMap::new(),
            next_tag: AtomicU64::new(seed),
            request_timeout: self.request_timeout,
        })
    }

    /// Drop all traffic from and to `peer` until [`restore`](Self::restore).
    pub fn isolate(&self, peer: &PeerId) {
        tracing::debug!("isolating {}", peer);
        self.isolated.insert(peer.clone());
    }

    pub fn restore(&self, peer: &PeerId) {
        tracing::debug!("restoring {}", peer);
        self.isolated.remove(peer);
    }

    pub fn is_isolated(&self, peer: &PeerId) -> bool {
        self.isolated.contains(peer)
    }

    /// Number of open endpoints.
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    fn deliver(&self, from: &PeerId, to: &PeerId, payload: String) {
        if self.isolated.contains(from) || self.isolated.contains(to) {
            tracing::trace!("dropping message {} -> {} (isolated)", from, to);
            return;
        }
        match self.endpoints.get(to) {
            Some(tx) => {
                let envelope = Envelope {
                    from: from.clone(),
                    payload,
                };
                if tx.send(envelope).is_err() {
                    tracing::debug!("endpoint {} is closed", to);
                }
            }
            None => tracing::debug!("no endpoint for {}, dropping message", to),
        }
    }
}

/// One peer's attachment to a [`MemoryNetwork`].
pub struct MemoryTransport {
    id: PeerId,
    network: Arc<MemoryNetwork>,
    ready: watch::Sender<Option<PeerId>>,
    handlers: HandlerRegistry,
    pending: DashMap<u64, oneshot::Sender<String>>,
    next_tag: AtomicU64,
    request_timeout: Duration,
}

impl MemoryTransport {
    pub fn id(&self) -> &PeerId {
        &self.id
    }

    /// Attach to the network and start delivering. Idempotent.
    pub fn open(self: &Arc<Self>) {
        if self.ready.borrow().is_some() {
            return;
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
        self.network.endpoints.insert(self.id.clone(), tx);

        let endpoint = self.clone();
        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                endpoint.handle_inbound(envelope);
            }
            tracing::debug!("endpoint {} delivery loop finished", endpoint.id);
        });

        self.ready.send_replace(Some(self.id.clone()));
        tracing::debug!("endpoint {} open", self.id);
    }

    /// Detach from the network. Pending deliveries are dropped.
    pub fn close(&self) {
        self.network.endpoints.remove(&self.id);
    }

    fn handle_inbound(&self, envelope: Envelope) {
        let Envelope { from, payload } = envelope;
        match decode_frame(&payload) {
            Frame::Response { tag, body } => match self.pending.remove(&tag) {
                Some((_, waiter)) => {
                    let _ = waiter.send(body.to_string());
                }
                None => tracing::debug!("unmatched response tag {} from {}", tag, from),
            },
            Frame::Request { tag, body } => {
                if let Some(reply) = self.dispatch(&from, body) {
                    self.send(&from, encode_response(tag, &reply));
                }
            }
            Frame::Plain(body) => {
                self.dispatch(&from, body);
            }
        }
    }

    fn dispatch(&self, from: &PeerId, payload: &str) -> Option<String> {
        match self.handlers.resolve(payload) {
            Some((handler, body)) => handler(from, body),
            None => {
                tracing::debug!("no handler for message from {}", from);
                None
            }
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn wait_ready(&self) -> Result<PeerId, TransportError> {
        let mut rx = self.ready.subscribe();
        let ready = rx.wait_for(|id| id.is_some()).await.map_err(|_| TransportError::Closed)?;
        ready.clone().ok_or(TransportError::NotReady)
    }

    fn local_id(&self) -> Option<PeerId> {
        self.ready.borrow().clone()
    }

    fn send(&self, target: &PeerId, payload: String) {
        if target == &self.id {
            return;
        }
        self.network.deliver(&self.id, target, payload);
    }

    fn register_handler(&self, prefix: &str, handler: MessageHandler) {
        self.handlers.register(prefix, handler);
    }

    async fn request(&self, target: &PeerId, payload: String) -> Result<String, TransportError> {
        self.wait_ready().await?;

        let tag = self.next_tag.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(tag, tx);
        self.send(target, encode_request(tag, &payload));

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => {
                self.pending.remove(&tag);
                Err(TransportError::Closed)
            }
            Err(_) => {
                self.pending.remove(&tag);
                Err(TransportError::DeadlineExceeded {
                    peer: target.clone(),
                    after: self.request_timeout,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn recorder() -> (MessageHandler, Arc<Mutex<Vec<(PeerId, String)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let handler: MessageHandler = Arc::new(move |from: &PeerId, body: &str| {
            s.lock().push((from.clone(), body.to_string()));
            None
        });
        (handler, seen)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_decode_frames() {
        assert_eq!(decode_frame(">12>ping"), Frame::Request { tag: 12, body: "ping" });
        assert_eq!(decode_frame("<12<pong"), Frame::Response { tag: 12, body: "pong" });
        assert_eq!(decode_frame("thump: a=b"), Frame::Plain("thump: a=b"));
        assert_eq!(decode_frame(">x>ping"), Frame::Plain(">x>ping"));
        assert_eq!(decode_frame("<<"), Frame::Plain("<<"));
        assert_eq!(encode_request(7, "q"), ">7>q");
        assert_eq!(encode_response(7, "a"), "<7<a");
    }

    #[test]
    fn test_registry_prefers_exact_then_longest_prefix() {
        let registry = HandlerRegistry::new();
        let short: MessageHandler = Arc::new(|_: &PeerId, _: &str| Some("short".to_string()));
        let long: MessageHandler = Arc::new(|_: &PeerId, _: &str| Some("long".to_string()));
        let exact: MessageHandler = Arc::new(|_: &PeerId, _: &str| Some("exact".to_string()));
        registry.register("ed", short);
        registry.register("edit: ", long);
        registry.register("edit", exact);

        let peer = PeerId::new("p");
        let (handler, body) = registry.resolve("edit: [1]").unwrap();
        assert_eq!(handler(&peer, body).as_deref(), Some("long"));
        assert_eq!(body, "[1]");

        let (handler, body) = registry.resolve("edit").unwrap();
        assert_eq!(handler(&peer, body).as_deref(), Some("exact"));
        assert_eq!(body, "");

        let (handler, _) = registry.resolve("edx").unwrap();
        assert_eq!(handler(&peer, "").as_deref(), Some("short"));

        assert!(registry.resolve("zzz").is_none());
    }

    #[tokio::test]
    async fn test_wait_ready_resolves_after_open() {
        let network = MemoryNetwork::new();
        let endpoint = network.endpoint();
        assert!(endpoint.local_id().is_none());

        let waiter = endpoint.clone();
        let task = tokio::spawn(async move { waiter.wait_ready().await });
        settle().await;
        endpoint.open();

        let id = task.await.unwrap().unwrap();
        assert_eq!(&id, endpoint.id());
        assert_eq!(endpoint.local_id(), Some(id));
        assert_eq!(network.len(), 1);
    }

    #[tokio::test]
    async fn test_send_dispatches_by_prefix_in_order() {
        let network = MemoryNetwork::new();
        let a = network.endpoint_with_id(PeerId::new("a"));
        let b = network.endpoint_with_id(PeerId::new("b"));
        let (handler, seen) = recorder();
        b.register_handler("edit: ", handler);
        a.open();
        b.open();

        for i in 0..5 {
            a.send(&PeerId::new("b"), format!("edit: {}", i));
        }
        settle().await;

        let seen = seen.lock();
        let bodies: Vec<&str> = seen.iter().map(|(_, body)| body.as_str()).collect();
        assert_eq!(bodies, vec!["0", "1", "2", "3", "4"]);
        assert_eq!(seen[0].0, PeerId::new("a"));
    }

    #[tokio::test]
    async fn test_send_to_self_and_unknown_peers_is_dropped() {
        let network = MemoryNetwork::new();
        let a = network.endpoint_with_id(PeerId::new("a"));
        let (handler, seen) = recorder();
        a.register_handler("x", handler);
        a.open();

        a.send(&PeerId::new("a"), "x1".to_string());
        a.send(&PeerId::new("nobody"), "x2".to_string());
        settle().await;
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_isolation_drops_both_directions() {
        let network = MemoryNetwork::new();
        let a = network.endpoint_with_id(PeerId::new("a"));
        let b = network.endpoint_with_id(PeerId::new("b"));
        let (handler, seen) = recorder();
        b.register_handler("m", handler);
        a.open();
        b.open();

        network.isolate(&PeerId::new("a"));
        assert!(network.is_isolated(&PeerId::new("a")));
        a.send(&PeerId::new("b"), "m1".to_string());
        settle().await;
        assert!(seen.lock().is_empty());

        network.restore(&PeerId::new("a"));
        a.send(&PeerId::new("b"), "m2".to_string());
        settle().await;
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_request_response_round_trip() {
        let network = MemoryNetwork::new();
        let a = network.endpoint_with_id(PeerId::new("a"));
        let b = network.endpoint_with_id(PeerId::new("b"));
        b.register_handler(
            "whoami",
            Arc::new(|from: &PeerId, _: &str| Some(format!("you are {}", from))),
        );
        a.open();
        b.open();

        let reply = a.request(&PeerId::new("b"), "whoami".to_string()).await.unwrap();
        assert_eq!(reply, "you are a");
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_times_out_without_reply() {
        let network = MemoryNetwork::new();
        let a = network.endpoint_with_id(PeerId::new("a"));
        let b = network.endpoint_with_id(PeerId::new("b"));
        let (handler, _) = recorder();
        b.register_handler("silent", handler);
        a.open();
        b.open();

        let err = a.request(&PeerId::new("b"), "silent".to_string()).await.unwrap_err();
        assert_eq!(
            err,
            TransportError::DeadlineExceeded {
                peer: PeerId::new("b"),
                after: DEFAULT_REQUEST_TIMEOUT
            }
        );
        assert!(a.pending.is_empty());
    }

    #[tokio::test]
    async fn test_plain_message_reply_is_not_sent_back() {
        let network = MemoryNetwork::new();
        let a = network.endpoint_with_id(PeerId::new("a"));
        let b = network.endpoint_with_id(PeerId::new("b"));
        let (handler, seen) = recorder();
        a.register_handler("", handler);
        b.register_handler("ping", Arc::new(|_: &PeerId, _: &str| Some("pong".to_string())));
        a.open();
        b.open();

        a.send(&PeerId::new("b"), "ping".to_string());
        settle().await;
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_close_detaches_endpoint() {
        let network = MemoryNetwork::new();
        let a = network.endpoint();
        a.open();
        assert_eq!(network.len(), 1);
        a.close();
        assert!(network.is_empty());
    }
}
