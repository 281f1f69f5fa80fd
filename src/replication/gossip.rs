//! Membership Group (gossip heartbeat)
//!
//! Tracks which peers are alive using a periodic roster broadcast that
//! doubles as the heartbeat. Each peer sends its full roster, itself first,
//! to every peer in its roster; receiving a roster introduces unknown peers and
//! refreshes the sender.
//!
//! Liveness is only restored by receiving a peer's own roster. A peer that
//! can send to us but never reaches us stays expired on our side even though
//! it sees us as healthy.

use crate::domain::entities::PeerId;
use crate::domain::ports::{Transport, TransportError};
use crate::infrastructure::ShutdownController;
use crate::replication::config::{ConfigError, GroupConfig};
use crate::replication::health::{ExpiryHook, HealthState, PeerHealth};
use crate::replication::subscription::{SubscriptionId, Subscribers};
use crate::replication::types::{RosterEntry, RosterSnapshot, THUMP_PREFIX};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// One slot of the roster.
#[derive(Debug)]
pub enum RosterSlot {
    /// Referenced (e.g. the join target) but not heard from yet
    Unresolved,
    /// Heard from at least once
    Tracked(PeerHealth),
}

/// Snapshot of a tracked member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub peer_id: PeerId,
    pub display_name: String,
    pub state: HealthState,
}

/// Events emitted by the membership group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupEvent {
    /// A peer was materialized in the roster for the first time
    PeerMet(PeerId),
    /// A peer stayed silent for the liveness window
    PeerExpired(PeerId),
    /// An expired peer was heard from again
    PeerRecovered(PeerId),
}

/// Errors from group operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GroupError {
    #[error("this peer is the coordinator")]
    IsCoordinator,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

struct GroupState {
    self_id: Option<PeerId>,
    roster: BTreeMap<PeerId, RosterSlot>,
}

impl GroupState {
    /// Roster snapshot: self first, unresolved peers omitted.
    fn snapshot(&self, display_name: &str) -> Option<RosterSnapshot> {
        let self_id = self.self_id.as_ref()?;
        let mut entries = vec![RosterEntry::new(self_id.clone(), display_name)];
        for (peer_id, slot) in &self.roster {
            if peer_id == self_id {
                continue;
            }
            if let RosterSlot::Tracked(health) = slot {
                entries.push(RosterEntry::new(peer_id.clone(), health.display_name()));
            }
        }
        Some(RosterSnapshot::new(entries))
    }

    fn tracked_others(&self) -> impl Iterator<Item = (&PeerId, &PeerHealth)> + '_ {
        let self_id = self.self_id.clone();
        self.roster.iter().filter_map(move |(peer_id, slot)| match slot {
            RosterSlot::Tracked(health) if Some(peer_id) != self_id.as_ref() => Some((peer_id, health)),
            _ => None,
        })
    }
}

/// Membership group for one process.
pub struct MembershipGroup {
    config: GroupConfig,
    transport: Arc<dyn Transport>,
    state: RwLock<GroupState>,
    meet_subscribers: Subscribers<PeerId>,
    event_tx: mpsc::Sender<GroupEvent>,
    event_rx: Mutex<Option<mpsc::Receiver<GroupEvent>>>,
    shutdown: ShutdownController,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl MembershipGroup {
    /// Create a group. Without a join target this peer is the coordinator;
    /// otherwise the target is recorded as coordinator and as an unresolved
    /// roster slot.
    pub fn new(config: GroupConfig, transport: Arc<dyn Transport>) -> Result<Self, ConfigError> {
        config.validate()?;
        let (event_tx, event_rx) = mpsc::channel(1024);

        let mut roster = BTreeMap::new();
        if let Some(target) = &config.join_target {
            roster.insert(target.clone(), RosterSlot::Unresolved);
        }

        Ok(Self {
            config,
            transport,
            state: RwLock::new(GroupState { self_id: None, roster }),
            meet_subscribers: Subscribers::new(),
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
            shutdown: ShutdownController::new(),
            heartbeat: Mutex::new(None),
        })
    }

    /// Get the event receiver (can only be taken once).
    pub fn take_event_rx(&self) -> Option<mpsc::Receiver<GroupEvent>> {
        self.event_rx.lock().take()
    }

    pub fn display_name(&self) -> &str {
        &self.config.display_name
    }

    pub fn is_coordinator(&self) -> bool {
        self.config.join_target.is_none()
    }

    /// The coordinator fixed at construction; `None` on the coordinator.
    pub fn coordinator_id(&self) -> Option<&PeerId> {
        self.config.join_target.as_ref()
    }

    /// Local peer id, once the transport is ready.
    pub fn self_id(&self) -> Option<PeerId> {
        self.state.read().self_id.clone()
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// All tracked members, self included.
    pub fn members(&self) -> Vec<Member> {
        self.state
            .read()
            .roster
            .iter()
            .filter_map(|(peer_id, slot)| match slot {
                RosterSlot::Tracked(health) => Some(Member {
                    peer_id: peer_id.clone(),
                    display_name: health.display_name().to_string(),
                    state: health.state(),
                }),
                RosterSlot::Unresolved => None,
            })
            .collect()
    }

    /// A tracked member by id.
    pub fn member(&self, peer_id: &PeerId) -> Option<Member> {
        self.members().into_iter().find(|m| &m.peer_id == peer_id)
    }

    /// Whether `peer_id` is referenced but not yet heard from.
    pub fn is_unresolved(&self, peer_id: &PeerId) -> bool {
        matches!(self.state.read().roster.get(peer_id), Some(RosterSlot::Unresolved))
    }

    pub fn is_healthy(&self, peer_id: &PeerId) -> bool {
        matches!(
            self.state.read().roster.get(peer_id),
            Some(RosterSlot::Tracked(health)) if health.is_healthy()
        )
    }

    /// Register a "peer met" callback. Callbacks run in registration order.
    pub fn on_peer_met<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&PeerId) + Send + Sync + 'static,
    {
        self.meet_subscribers.subscribe(callback)
    }

    /// Remove a "peer met" callback. Idempotent.
    pub fn remove_peer_met(&self, id: SubscriptionId) -> bool {
        self.meet_subscribers.unsubscribe(id)
    }

    /// Current roster snapshot, or `None` before the transport is ready.
    pub fn snapshot(&self) -> Option<RosterSnapshot> {
        self.state.read().snapshot(&self.config.display_name)
    }

    /// Start the group: register the roster handler, wait for the transport,
    /// announce to the join target and run the heartbeat loop until
    /// [`shutdown`](Self::shutdown).
    pub fn start(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        self.transport.register_handler(
            THUMP_PREFIX,
            Arc::new(move |from: &PeerId, body: &str| {
                if let Some(group) = weak.upgrade() {
                    group.handle_thump(from, body);
                }
                None
            }),
        );

        let group = self.clone();
        let handle = tokio::spawn(async move {
            let self_id = tokio::select! {
                ready = group.transport.wait_ready() => match ready {
                    Ok(id) => id,
                    Err(e) => {
                        tracing::warn!("membership group never became ready: {}", e);
                        return;
                    }
                },
                _ = group.shutdown.cancelled() => return,
            };

            group.on_ready(self_id);

            let mut ticker = tokio::time::interval(group.config.heartbeat_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => group.beat(),
                    _ = group.shutdown.cancelled() => {
                        tracing::info!("heartbeat loop stopped for {}", group.config.display_name);
                        break;
                    }
                }
            }
        });

        *self.heartbeat.lock() = Some(handle);
    }

    /// Stop the heartbeat loop and every expiry timer.
    pub fn shutdown(&self) {
        self.shutdown.shutdown();
        if let Some(handle) = self.heartbeat.lock().take() {
            handle.abort();
        }
        for slot in self.state.read().roster.values() {
            if let RosterSlot::Tracked(health) = slot {
                health.stop();
            }
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_shutdown()
    }

    fn make_tracker(&self, peer_id: PeerId, display_name: &str) -> PeerHealth {
        let tx = self.event_tx.clone();
        let hook: ExpiryHook = Arc::new(move |peer_id: &PeerId| {
            let _ = tx.try_send(GroupEvent::PeerExpired(peer_id.clone()));
        });
        PeerHealth::new(peer_id, display_name, self.config.liveness_window).on_expire(hook)
    }

    fn on_ready(&self, self_id: PeerId) {
        let join_message = {
            let mut state = self.state.write();
            state.self_id = Some(self_id.clone());

            let health = self.make_tracker(self_id.clone(), &self.config.display_name);
            health.refresh();
            state.roster.insert(self_id.clone(), RosterSlot::Tracked(health));

            state.snapshot(&self.config.display_name).map(|s| s.encode())
        };

        tracing::info!(
            "membership group ready self={} name={} coordinator={}",
            self_id,
            self.config.display_name,
            self.is_coordinator()
        );

        if let (Some(target), Some(message)) = (&self.config.join_target, join_message) {
            tracing::info!("joining group via {}", target);
            self.transport.send(target, message);
        }
    }

    /// One heartbeat: refresh self and send the roster to every roster
    /// peer, healthy or not. An unresolved join target is included, so a
    /// join that was lost or sent before the coordinator came up is retried.
    pub fn beat(&self) {
        let (message, targets) = {
            let state = self.state.read();
            let Some(self_id) = state.self_id.as_ref() else {
                return;
            };
            if let Some(RosterSlot::Tracked(own)) = state.roster.get(self_id) {
                own.refresh();
            }
            let Some(snapshot) = state.snapshot(&self.config.display_name) else {
                return;
            };
            let targets: Vec<PeerId> = state
                .roster
                .keys()
                .filter(|peer_id| *peer_id != self_id)
                .cloned()
                .collect();
            (snapshot.encode(), targets)
        };

        for target in &targets {
            self.transport.send(target, message.clone());
        }
    }

    /// Merge an inbound roster snapshot (body of a `thump: ` message).
    pub fn handle_thump(&self, from: &PeerId, body: &str) {
        let snapshot = match RosterSnapshot::parse(body) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!("dropping roster from {}: {}", from, e);
                return;
            }
        };

        let mut met = Vec::new();
        let mut recovered = Vec::new();
        {
            let mut state = self.state.write();
            let Some(self_id) = state.self_id.clone() else {
                tracing::debug!("roster from {} arrived before ready, ignoring", from);
                return;
            };

            for (position, entry) in snapshot.entries.iter().enumerate() {
                if entry.peer_id == self_id {
                    continue;
                }
                let known = match state.roster.get(&entry.peer_id) {
                    Some(RosterSlot::Tracked(health)) => {
                        if position == 0 && health.refresh() == HealthState::Expired {
                            recovered.push(entry.peer_id.clone());
                        }
                        true
                    }
                    None | Some(RosterSlot::Unresolved) => false,
                };
                if !known {
                    let health = self.make_tracker(entry.peer_id.clone(), &entry.display_name);
                    health.refresh();
                    state.roster.insert(entry.peer_id.clone(), RosterSlot::Tracked(health));
                    met.push(entry.peer_id.clone());
                }
            }
        }

        for peer_id in recovered {
            tracing::info!("peer {} is alive again", peer_id);
            let _ = self.event_tx.try_send(GroupEvent::PeerRecovered(peer_id));
        }

        for peer_id in met {
            tracing::info!("met peer {} via roster from {}", peer_id, from);
            let _ = self.event_tx.try_send(GroupEvent::PeerMet(peer_id.clone()));
            self.meet_subscribers.notify(&peer_id);
        }
    }

    /// Peers a broadcast currently reaches: tracked, healthy, not self.
    pub fn broadcast_targets(&self) -> Vec<PeerId> {
        self.state
            .read()
            .tracked_others()
            .filter(|(_, health)| health.is_healthy())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Send `message` to every healthy peer. Returns the number of
    /// recipients; unhealthy peers are skipped.
    pub fn broadcast(&self, message: &str) -> usize {
        let targets = self.broadcast_targets();
        for target in &targets {
            self.transport.send(target, message.to_string());
        }
        targets.len()
    }

    /// Unicast to a roster member. Unknown peers are ignored.
    pub fn send_to(&self, peer_id: &PeerId, message: String) -> bool {
        if !self.state.read().roster.contains_key(peer_id) {
            tracing::debug!("send to unknown peer {} ignored", peer_id);
            return false;
        }
        self.transport.send(peer_id, message);
        true
    }

    /// Request/response with the coordinator. No retry on timeout.
    pub async fn send_to_leader(&self, message: &str) -> Result<String, GroupError> {
        let leader = self.coordinator_id().ok_or(GroupError::IsCoordinator)?;
        let response = self.transport.request(leader, message.to_string()).await;
        if let Err(e) = &response {
            tracing::warn!("leader request to {} failed: {}", leader, e);
        }
        Ok(response?)
    }
}

impl Drop for MembershipGroup {
    fn drop(&mut self) {
        if let Some(handle) = self.heartbeat.get_mut().take() {
            handle.abort();
        }
    }
}
