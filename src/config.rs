use crate::domain::entities::PeerId;
use crate::replication::{GroupConfig, SessionConfig};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    // Identity
    pub login: String,
    pub join: Option<String>,

    // Protocol timing
    pub heartbeat_ms: u64,
    pub liveness_secs: u64,
    pub settle_ms: u64,
    pub request_timeout_secs: u64,

    // Persistence
    pub store_path: Option<String>,

    // Demo
    pub demo_peers: usize,
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            login: "host".to_string(),
            join: None,
            heartbeat_ms: 600,
            liveness_secs: 10,
            settle_ms: 1000,
            request_timeout_secs: 5,
            store_path: None,
            demo_peers: 2,
            debug: false,
        }
    }
}

impl Config {
    /// Group settings for the peer named `display_name`.
    pub fn group_config(&self, display_name: &str, join_target: Option<PeerId>) -> GroupConfig {
        GroupConfig::new(display_name)
            .join_target(join_target)
            .heartbeat_interval(Duration::from_millis(self.heartbeat_ms))
            .liveness_window(Duration::from_secs(self.liveness_secs))
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::default().settle_delay(Duration::from_millis(self.settle_ms))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

pub fn load_config() -> anyhow::Result<Config> {
    let login = std::env::var("TOMODOMO_LOGIN")
        .unwrap_or_else(|_| "host".to_string());

    let join = std::env::var("TOMODOMO_JOIN").ok().filter(|v| !v.is_empty());

    let heartbeat_ms = std::env::var("TOMODOMO_HEARTBEAT_MS")
        .unwrap_or_else(|_| "600".to_string())
        .parse()
        .unwrap_or(600);

    let liveness_secs = std::env::var("TOMODOMO_LIVENESS_SECS")
        .unwrap_or_else(|_| "10".to_string())
        .parse()
        .unwrap_or(10);

    let settle_ms = std::env::var("TOMODOMO_SETTLE_MS")
        .unwrap_or_else(|_| "1000".to_string())
        .parse()
        .unwrap_or(1000);

    let request_timeout_secs = std::env::var("TOMODOMO_REQUEST_TIMEOUT_SECS")
        .unwrap_or_else(|_| "5".to_string())
        .parse()
        .unwrap_or(5);

    let store_path = std::env::var("TOMODOMO_STORE_PATH").ok();

    let demo_peers = std::env::var("TOMODOMO_DEMO_PEERS")
        .unwrap_or_else(|_| "2".to_string())
        .parse()
        .unwrap_or(2);

    let debug = std::env::var("DEBUG").is_ok();

    Ok(Config {
        login,
        join,
        heartbeat_ms,
        liveness_secs,
        settle_ms,
        request_timeout_secs,
        store_path,
        demo_peers,
        debug,
    })
}
