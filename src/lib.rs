//! tomodomo Library
//!
//! Peer group membership and collaborative text synchronization, exposed for
//! the demo binary and for integration tests.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod adapters;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod replication;

// Re-export commonly used types
pub use config::load_config;
pub use domain::entities::{Document, PeerId, Selection, ShadowPosition, TextUpdate};
pub use domain::ports::{DocumentStore, Transport, TransportError};
pub use replication::{CollabAgent, GroupConfig, MembershipGroup, SessionConfig, SyncSession};
