//! Replication Configuration
//!
//! Configuration for the membership group and the synchronization session.

use crate::domain::entities::PeerId;
use std::time::Duration;

/// Configuration for a membership group.
#[derive(Debug, Clone)]
pub struct GroupConfig {
    /// Name shown to other peers (e.g., "alice")
    pub display_name: String,

    /// Coordinator to join; `None` makes this peer the coordinator
    pub join_target: Option<PeerId>,

    /// Heartbeat interval (default: 600ms)
    pub heartbeat_interval: Duration,

    /// Silence after which a peer is considered unhealthy (default: 10s)
    pub liveness_window: Duration,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            display_name: String::new(),
            join_target: None,
            heartbeat_interval: Duration::from_millis(600),
            liveness_window: Duration::from_secs(10),
        }
    }
}

impl GroupConfig {
    /// Create a new configuration with a display name.
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            ..Default::default()
        }
    }

    /// Join an existing group through its coordinator.
    pub fn join_target(mut self, target: Option<PeerId>) -> Self {
        self.join_target = target;
        self
    }

    /// Set the heartbeat interval.
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the liveness window.
    pub fn liveness_window(mut self, window: Duration) -> Self {
        self.liveness_window = window;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_display_name(&self.display_name) {
            return Err(ConfigError::InvalidDisplayName(self.display_name.clone()));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::ZeroHeartbeatInterval);
        }
        if self.liveness_window <= self.heartbeat_interval {
            return Err(ConfigError::LivenessWindowTooShort {
                window: self.liveness_window,
                heartbeat: self.heartbeat_interval,
            });
        }
        Ok(())
    }
}

/// Configuration for a synchronization session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Quiet period after the last keystroke before the document is
    /// persisted and handed to the execution surface (default: 1s)
    pub settle_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(1),
        }
    }
}

impl SessionConfig {
    /// Set the settle delay.
    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }
}

/// A letter followed by at least one letter or digit.
///
/// Also keeps `=` and `,` out of the roster wire format.
pub fn is_valid_display_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {}
        _ => return false,
    }
    let rest = chars.as_str();
    !rest.is_empty() && rest.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("display name {0:?} must be a letter followed by letters or digits")]
    InvalidDisplayName(String),
    #[error("heartbeat_interval must be non-zero")]
    ZeroHeartbeatInterval,
    #[error("liveness_window {window:?} must exceed heartbeat_interval {heartbeat:?}")]
    LivenessWindowTooShort { window: Duration, heartbeat: Duration },
}
