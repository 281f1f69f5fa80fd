//! Document Synchronization
//!
//! Keeps this peer's copy of the shared document converged with the group.
//! Local changes go out as line edit scripts against the last synchronized
//! text; newly met peers and peers that lost track receive full snapshots.
//!
//! Every edit carries the line count and checksum of the text it was computed
//! against and of the text it produces. A receiver whose document does not
//! match rejects the edit and asks the sender for a snapshot, so divergence
//! heals after one round trip instead of compounding.

use crate::domain::entities::{Document, PeerId, Selection, ShadowPosition, TextUpdate};
use crate::domain::ports::DocumentStore;
use crate::replication::config::SessionConfig;
use crate::replication::diff::{anchored_lines, apply_edits, distance, unanchor_lines, DiffError};
use crate::replication::gossip::MembershipGroup;
use crate::replication::subscription::SubscriptionId;
use crate::replication::types::{
    encode_resync, encode_shadow, encode_text_update, parse_shadow, parse_text_update, text_crc,
    EditMessage, EDIT_PREFIX, RESYNC_PREFIX, SHADOW_PREFIX, TEXT_PREFIX,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Where a document change came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// Typed on this peer
    Local,
    /// Edit script from a peer
    RemoteEdit(PeerId),
    /// Full snapshot from a peer
    Snapshot(PeerId),
}

/// Events emitted by the sync session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The document changed and should be redrawn
    DocumentChanged { document: Document, origin: ChangeOrigin },
    /// Input went quiet; the text was persisted and is ready to run
    DocumentSettled(String),
    /// A pointer marker moved (ours or a peer's)
    ShadowMoved(ShadowPosition),
    /// An edit from this peer was rejected and a snapshot requested
    ResyncRequested(PeerId),
}

/// Why an inbound edit was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error(
        "baseline mismatch: edit expects {expected_lines} lines (crc {expected_crc:08x}), \
         document has {actual_lines} lines (crc {actual_crc:08x})"
    )]
    StaleBaseline {
        expected_lines: usize,
        expected_crc: u32,
        actual_lines: usize,
        actual_crc: u32,
    },

    #[error("edit script does not apply: {0}")]
    Diff(#[from] DiffError),

    #[error("result checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ResultMismatch { expected: u32, actual: u32 },
}

// ==================== Sans-IO Functions ====================

/// Edit message turning `previous` into `current`.
pub fn build_edit(previous: &str, current: &str) -> EditMessage {
    let base = anchored_lines(previous);
    let target = anchored_lines(current);
    EditMessage {
        base_lines: base.len(),
        base_crc: text_crc(previous),
        result_crc: text_crc(current),
        edits: distance(&base, &target),
    }
}

/// Apply `message` to `current`, returning the new text.
pub fn apply_edit_message(current: &str, message: &EditMessage) -> Result<String, SyncError> {
    let mut lines = anchored_lines(current);
    let actual_crc = text_crc(current);
    if lines.len() != message.base_lines || actual_crc != message.base_crc {
        return Err(SyncError::StaleBaseline {
            expected_lines: message.base_lines,
            expected_crc: message.base_crc,
            actual_lines: lines.len(),
            actual_crc,
        });
    }

    apply_edits(&mut lines, &message.edits)?;
    let text = unanchor_lines(&lines);

    let actual = text_crc(&text);
    if actual != message.result_crc {
        return Err(SyncError::ResultMismatch {
            expected: message.result_crc,
            actual,
        });
    }
    Ok(text)
}

/// Selection after the document is replaced by a snapshot.
///
/// A selection that starts after the sender's position moves by the length
/// difference; anything else stays put. Both are clamped to the new text.
pub fn rebase_selection(
    selection: Selection,
    old_len: usize,
    new_len: usize,
    source_position: usize,
) -> Selection {
    if selection.start > source_position {
        selection.shifted(new_len as i64 - old_len as i64, new_len)
    } else {
        selection.clamped(new_len)
    }
}

struct SessionState {
    document: Document,
    /// Text the next outgoing edit is computed against.
    previous_text: String,
    /// Local changes made since the last applied remote change that have not
    /// settled yet. Only then can a rejected edit be a concurrent one.
    local_pending: bool,
    own_shadow: Option<ShadowPosition>,
    shadows: HashMap<PeerId, ShadowPosition>,
    settle_timer: Option<JoinHandle<()>>,
}

/// Synchronization session for one peer's document.
pub struct SyncSession {
    config: SessionConfig,
    group: Arc<MembershipGroup>,
    store: Arc<dyn DocumentStore>,
    state: Arc<Mutex<SessionState>>,
    hue: f64,
    event_tx: mpsc::Sender<SessionEvent>,
    event_rx: Mutex<Option<mpsc::Receiver<SessionEvent>>>,
    meet_subscription: Mutex<Option<SubscriptionId>>,
}

impl SyncSession {
    pub fn new(config: SessionConfig, group: Arc<MembershipGroup>, store: Arc<dyn DocumentStore>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(1024);

        Self {
            config,
            group,
            store,
            state: Arc::new(Mutex::new(SessionState {
                document: Document::default(),
                previous_text: String::new(),
                local_pending: false,
                own_shadow: None,
                shadows: HashMap::new(),
                settle_timer: None,
            })),
            hue: rand::random::<f64>(),
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
            meet_subscription: Mutex::new(None),
        }
    }

    /// Get the event receiver (can only be taken once).
    pub fn take_event_rx(&self) -> Option<mpsc::Receiver<SessionEvent>> {
        self.event_rx.lock().take()
    }

    pub fn group(&self) -> &Arc<MembershipGroup> {
        &self.group
    }

    /// Load the persisted document, then attach to the group: message
    /// handlers for edits, snapshots, pointers and resync requests, plus a
    /// snapshot push whenever a peer is met.
    pub async fn start(self: &Arc<Self>) -> anyhow::Result<()> {
        if let Some(text) = self.store.load().await? {
            tracing::info!("loaded stored document ({} bytes)", text.len());
            {
                let mut state = self.state.lock();
                state.document = Document::new(text.clone());
                state.previous_text = text.clone();
            }
            self.emit(SessionEvent::DocumentSettled(text));
        }

        self.register(EDIT_PREFIX, Self::handle_remote_edit);
        self.register(TEXT_PREFIX, Self::handle_snapshot);
        self.register(SHADOW_PREFIX, Self::handle_shadow);
        self.register(RESYNC_PREFIX, Self::handle_resync);

        let weak = Arc::downgrade(self);
        let id = self.group.on_peer_met(move |peer_id| {
            if let Some(session) = weak.upgrade() {
                session.push_snapshot(peer_id);
            }
        });
        if let Some(old) = self.meet_subscription.lock().replace(id) {
            self.group.remove_peer_met(old);
        }

        Ok(())
    }

    /// Detach from the group and cancel a pending settle.
    pub fn stop(&self) {
        if let Some(id) = self.meet_subscription.lock().take() {
            self.group.remove_peer_met(id);
        }
        if let Some(timer) = self.state.lock().settle_timer.take() {
            timer.abort();
        }
    }

    /// Persist the current text now.
    pub async fn flush(&self) -> anyhow::Result<()> {
        let text = self.text();
        self.store.save(&text).await?;
        self.emit(SessionEvent::DocumentSettled(text));
        Ok(())
    }

    fn register<F>(self: &Arc<Self>, prefix: &str, handle: F)
    where
        F: Fn(&SyncSession, &PeerId, &str) + Send + Sync + 'static,
    {
        let weak = Arc::downgrade(self);
        self.group.transport().register_handler(
            prefix,
            Arc::new(move |from: &PeerId, body: &str| {
                if let Some(session) = weak.upgrade() {
                    handle(&session, from, body);
                }
                None
            }),
        );
    }

    fn emit(&self, event: SessionEvent) {
        if self.event_tx.try_send(event).is_err() {
            tracing::trace!("session event dropped, receiver full or gone");
        }
    }

    pub fn document(&self) -> Document {
        self.state.lock().document.clone()
    }

    pub fn text(&self) -> String {
        self.state.lock().document.text.clone()
    }

    pub fn selection(&self) -> Selection {
        self.state.lock().document.selection
    }

    /// Hue of this peer's pointer marker.
    pub fn hue(&self) -> f64 {
        self.hue
    }

    /// Peer pointer markers, ordered by owner.
    pub fn shadows(&self) -> Vec<ShadowPosition> {
        let state = self.state.lock();
        let mut shadows: Vec<ShadowPosition> = state.shadows.values().cloned().collect();
        shadows.sort_by(|a, b| a.owner_id.cmp(&b.owner_id));
        shadows
    }

    pub fn shadow(&self, owner: &PeerId) -> Option<ShadowPosition> {
        self.state.lock().shadows.get(owner).cloned()
    }

    /// Record a local change and broadcast it to healthy peers.
    ///
    /// Returns the number of peers the edit was sent to. A change that only
    /// moves the selection is not broadcast but still restarts the settle
    /// timer.
    pub fn local_edit(&self, text: impl Into<String>, selection: Selection) -> usize {
        let text = text.into();
        let (message, document) = {
            let mut state = self.state.lock();
            state.document.selection = selection.clamped(text.chars().count());
            self.arm_settle(&mut state);
            if text == state.document.text {
                return 0;
            }

            let message = build_edit(&state.previous_text, &text);
            state.document.text = text.clone();
            state.previous_text = text;
            state.local_pending = true;
            (message, state.document.clone())
        };

        self.emit(SessionEvent::DocumentChanged {
            document,
            origin: ChangeOrigin::Local,
        });

        match message.encode() {
            Ok(wire) => {
                let sent = self.group.broadcast(&wire);
                tracing::debug!("broadcast edit ({} ops) to {} peers", message.edits.len(), sent);
                sent
            }
            Err(e) => {
                tracing::warn!("failed to encode edit: {}", e);
                0
            }
        }
    }

    /// Move this peer's pointer marker and broadcast it.
    pub fn move_pointer(&self, x: f64, y: f64) -> usize {
        let Some(self_id) = self.group.self_id() else {
            tracing::debug!("pointer moved before the transport is ready");
            return 0;
        };

        let shadow = {
            let mut state = self.state.lock();
            let shadow = state
                .own_shadow
                .get_or_insert_with(|| ShadowPosition::new(self_id, self.hue));
            shadow.x = x;
            shadow.y = y;
            shadow.clone()
        };

        let sent = match encode_shadow(&shadow) {
            Ok(wire) => self.group.broadcast(&wire),
            Err(e) => {
                tracing::warn!("failed to encode pointer: {}", e);
                0
            }
        };
        self.emit(SessionEvent::ShadowMoved(shadow));
        sent
    }

    /// Restart the settle timer. When it fires the latest text is persisted
    /// and announced.
    fn arm_settle(&self, state: &mut SessionState) {
        if let Some(timer) = state.settle_timer.take() {
            timer.abort();
        }

        let shared = self.state.clone();
        let store = self.store.clone();
        let event_tx = self.event_tx.clone();
        let delay = self.config.settle_delay;

        state.settle_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let text = {
                let mut state = shared.lock();
                state.local_pending = false;
                state.document.text.clone()
            };
            if let Err(e) = store.save(&text).await {
                tracing::warn!("failed to persist document: {:#}", e);
            }
            let _ = event_tx.try_send(SessionEvent::DocumentSettled(text));
        }));
    }

    fn snapshot_message(&self) -> Option<String> {
        let update = {
            let state = self.state.lock();
            TextUpdate {
                text: state.document.text.clone(),
                source_position: state.document.selection.start,
            }
        };
        match encode_text_update(&update) {
            Ok(wire) => Some(wire),
            Err(e) => {
                tracing::warn!("failed to encode snapshot: {}", e);
                None
            }
        }
    }

    /// Send our full text to a newly met peer. An empty document is not
    /// pushed so a fresh joiner cannot wipe an established one.
    fn push_snapshot(&self, peer_id: &PeerId) {
        if self.state.lock().document.text.is_empty() {
            tracing::debug!("document empty, no snapshot for {}", peer_id);
            return;
        }
        if let Some(wire) = self.snapshot_message() {
            tracing::debug!("pushing snapshot to {}", peer_id);
            self.group.send_to(peer_id, wire);
        }
    }

    fn handle_remote_edit(&self, from: &PeerId, body: &str) {
        let message = match EditMessage::parse(body) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("dropping edit from {}: {}", from, e);
                return;
            }
        };

        let outcome = {
            let mut state = self.state.lock();
            apply_edit_message(&state.document.text, &message).map(|text| {
                let len = text.chars().count();
                state.document.selection = state.document.selection.clamped(len);
                state.document.text = text.clone();
                state.previous_text = text;
                state.local_pending = false;
                self.arm_settle(&mut state);
                state.document.clone()
            })
        };

        match outcome {
            Ok(document) => {
                tracing::debug!("applied {} ops from {}", message.edits.len(), from);
                self.emit(SessionEvent::DocumentChanged {
                    document,
                    origin: ChangeOrigin::RemoteEdit(from.clone()),
                });
            }
            // Of two peers that edited concurrently the one with the smaller
            // id keeps its text. A peer that only missed edits always asks.
            Err(e) if self.keeps_own_text(from) => {
                tracing::warn!("edit from {} rejected ({}), pushing our snapshot", from, e);
                if let Some(wire) = self.snapshot_message() {
                    self.group.transport().send(from, wire);
                }
            }
            Err(e) => {
                tracing::warn!("edit from {} rejected ({}), requesting snapshot", from, e);
                self.group.transport().send(from, encode_resync());
                self.emit(SessionEvent::ResyncRequested(from.clone()));
            }
        }
    }

    fn keeps_own_text(&self, peer_id: &PeerId) -> bool {
        let contested = {
            let state = self.state.lock();
            state.local_pending && !state.document.text.is_empty()
        };
        contested && self.group.self_id().is_some_and(|self_id| &self_id < peer_id)
    }

    fn handle_snapshot(&self, from: &PeerId, body: &str) {
        let update = match parse_text_update(body) {
            Ok(update) => update,
            Err(e) => {
                tracing::warn!("dropping snapshot from {}: {}", from, e);
                return;
            }
        };

        let document = {
            let mut state = self.state.lock();
            let old_len = state.document.char_len();
            let new_len = update.text.chars().count();
            state.document.selection =
                rebase_selection(state.document.selection, old_len, new_len, update.source_position);
            state.document.text = update.text.clone();
            state.previous_text = update.text;
            state.local_pending = false;
            self.arm_settle(&mut state);
            state.document.clone()
        };

        tracing::debug!("took snapshot from {} ({} chars)", from, document.char_len());
        self.emit(SessionEvent::DocumentChanged {
            document,
            origin: ChangeOrigin::Snapshot(from.clone()),
        });
    }

    fn handle_shadow(&self, from: &PeerId, body: &str) {
        let shadow = match parse_shadow(body) {
            Ok(shadow) => shadow,
            Err(e) => {
                tracing::warn!("dropping pointer from {}: {}", from, e);
                return;
            }
        };
        self.state
            .lock()
            .shadows
            .insert(shadow.owner_id.clone(), shadow.clone());
        self.emit(SessionEvent::ShadowMoved(shadow));
    }

    /// A peer could not apply one of our edits: send it the full text,
    /// empty or not.
    fn handle_resync(&self, from: &PeerId, _body: &str) {
        tracing::info!("peer {} requested a snapshot", from);
        if let Some(wire) = self.snapshot_message() {
            self.group.transport().send(from, wire);
        }
    }
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        if let Some(timer) = self.state.lock().settle_timer.take() {
            timer.abort();
        }
    }
}
