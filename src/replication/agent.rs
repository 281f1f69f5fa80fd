//! Collaboration Agent
//!
//! Wires a membership group and a sync session onto one transport and one
//! document store, and starts and stops them in the right order.

use crate::domain::entities::{Document, PeerId, Selection};
use crate::domain::ports::{DocumentStore, Transport, TransportError};
use crate::replication::config::{GroupConfig, SessionConfig};
use crate::replication::gossip::{Member, MembershipGroup};
use crate::replication::sync::SyncSession;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One participant in a collaborative editing group.
pub struct CollabAgent {
    transport: Arc<dyn Transport>,
    group: Arc<MembershipGroup>,
    session: Arc<SyncSession>,
    running: AtomicBool,
}

impl CollabAgent {
    /// Create an agent. Fails if the group configuration is invalid.
    pub fn new(
        group_config: GroupConfig,
        session_config: SessionConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn DocumentStore>,
    ) -> anyhow::Result<Self> {
        let group = Arc::new(MembershipGroup::new(group_config, transport.clone())?);
        let session = Arc::new(SyncSession::new(session_config, group.clone(), store));

        Ok(Self {
            transport,
            group,
            session,
            running: AtomicBool::new(false),
        })
    }

    pub fn group(&self) -> &Arc<MembershipGroup> {
        &self.group
    }

    pub fn session(&self) -> &Arc<SyncSession> {
        &self.session
    }

    pub fn display_name(&self) -> &str {
        self.group.display_name()
    }

    /// Wait for the transport and return this peer's id.
    pub async fn peer_id(&self) -> Result<PeerId, TransportError> {
        self.transport.wait_ready().await
    }

    pub fn members(&self) -> Vec<Member> {
        self.group.members()
    }

    pub fn document(&self) -> Document {
        self.session.document()
    }

    /// Record a local change. See [`SyncSession::local_edit`].
    pub fn edit(&self, text: impl Into<String>, selection: Selection) -> usize {
        self.session.local_edit(text, selection)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the session (stored document, message handlers) and then the
    /// group, so no early roster is merged before snapshots can be pushed.
    pub async fn start(&self) -> anyhow::Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::info!(
            "starting agent name={} coordinator={}",
            self.group.display_name(),
            self.group.is_coordinator()
        );

        if let Err(e) = self.session.start().await {
            self.running.store(false, Ordering::SeqCst);
            return Err(e);
        }
        self.group.start();

        tracing::info!("agent {} started", self.group.display_name());
        Ok(())
    }

    /// Persist the document and stop all background work.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        tracing::info!("stopping agent {}", self.group.display_name());
        self.session.stop();
        if let Err(e) = self.session.flush().await {
            tracing::warn!("final save failed: {:#}", e);
        }
        self.group.shutdown();
    }
}
