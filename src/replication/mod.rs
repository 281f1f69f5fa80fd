//! Group Replication Module
//!
//! Membership and document synchronization for a small group of peers
//! connected by a message transport.
//!
//! ## Architecture
//!
//! - **Gossip**: roster heartbeats and liveness tracking per peer
//! - **Diff**: line edit scripts between two versions of the document
//! - **Sync**: local edits out, remote edits and snapshots in
//! - **Agent**: wires a group and a session to one transport and store
//!
//! ## How It Works
//!
//! 1. A coordinator starts alone; newcomers are given its peer id and announce
//!    themselves with a `thump: ` roster
//! 2. Every heartbeat each peer sends its roster to every peer it tracks, so
//!    members learn about each other transitively
//! 3. A peer that stays silent for the liveness window stops receiving
//!    broadcasts until it is heard from again
//! 4. Newly met peers get the full document; later changes travel as edit
//!    scripts checked against the receiver's baseline
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tomodomo::adapters::outbound::{MemoryDocumentStore, MemoryNetwork};
//! use tomodomo::replication::{CollabAgent, GroupConfig, SessionConfig};
//!
//! let network = MemoryNetwork::new();
//! let endpoint = network.endpoint();
//! endpoint.open();
//!
//! let agent = CollabAgent::new(
//!     GroupConfig::new("alice"),
//!     SessionConfig::default(),
//!     endpoint,
//!     Arc::new(MemoryDocumentStore::new()),
//! )?;
//! agent.start().await?;
//! ```

mod agent;
mod config;
mod gossip;
mod health;
mod subscription;
mod sync;
mod types;

pub mod diff;

#[cfg(test)]
pub(crate) mod test_support;

pub use agent::CollabAgent;
pub use config::{is_valid_display_name, ConfigError, GroupConfig, SessionConfig};
pub use gossip::{GroupError, GroupEvent, Member, MembershipGroup, RosterSlot};
pub use health::{ExpiryHook, HealthState, PeerHealth};
pub use subscription::{SubscriptionId, Subscribers};
pub use sync::{
    apply_edit_message, build_edit, rebase_selection, ChangeOrigin, SessionEvent, SyncError,
    SyncSession,
};
pub use types::{
    encode_resync, encode_shadow, encode_text_update, parse_shadow, parse_text_update, text_crc,
    EditMessage, MessageError, RosterEntry, RosterSnapshot, EDIT_PREFIX, RESYNC_PREFIX,
    SHADOW_PREFIX, TEXT_PREFIX, THUMP_PREFIX,
};
