//! tomodomo - collaborative editing group demo
//!
//! Runs a coordinator and a few joiners on an in-process network. Lines read
//! from stdin are appended to the coordinator's document; the joiners log
//! every change they receive.

use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tomodomo::adapters::outbound::{MemoryDocumentStore, MemoryNetwork, SqliteDocumentStore};
use tomodomo::infrastructure::{shutdown_signal, ShutdownController};
use tomodomo::replication::{GroupEvent, SessionEvent};
use tomodomo::{load_config, CollabAgent, DocumentStore, PeerId, Selection, Transport};
use tracing_subscriber::fmt::format::FmtSpan;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration from environment
    let cfg = load_config()?;

    // Setup logging
    let log_level = if cfg.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_span_events(FmtSpan::CLOSE)
        .init();

    tracing::info!(
        "starting tomodomo login={} demo_peers={} heartbeat={}ms",
        cfg.login,
        cfg.demo_peers,
        cfg.heartbeat_ms
    );

    let shutdown = ShutdownController::new();
    let network = MemoryNetwork::with_request_timeout(cfg.request_timeout());

    // Coordinator
    let store: Arc<dyn DocumentStore> = match &cfg.store_path {
        Some(path) => {
            tracing::info!("document store at {}", path);
            Arc::new(SqliteDocumentStore::open(path).await?)
        }
        None => Arc::new(MemoryDocumentStore::new()),
    };

    let endpoint = match &cfg.join {
        Some(id) => network.endpoint_with_id(PeerId::new(id.as_str())),
        None => network.endpoint(),
    };
    endpoint.open();
    let coordinator_id = endpoint.wait_ready().await?;

    let host = CollabAgent::new(
        cfg.group_config(&cfg.login, None),
        cfg.session_config(),
        endpoint,
        store,
    )?;
    spawn_group_logger(&host, shutdown.clone());
    host.start().await?;
    tracing::info!("coordinator {} is {}", cfg.login, coordinator_id);

    // Joiners
    let mut joiners = Vec::with_capacity(cfg.demo_peers);
    for i in 1..=cfg.demo_peers {
        let endpoint = network.endpoint();
        endpoint.open();

        let agent = CollabAgent::new(
            cfg.group_config(&format!("guest{}", i), Some(coordinator_id.clone())),
            cfg.session_config(),
            endpoint,
            Arc::new(MemoryDocumentStore::new()),
        )?;
        spawn_session_logger(&agent, shutdown.clone());
        agent.start().await?;
        joiners.push(agent);
    }

    tokio::spawn(shutdown_signal(shutdown.clone()));

    // Feed stdin into the coordinator's document
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut text = host.document().text;
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => {
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str(&line);
                    let sent = host.edit(text.clone(), Selection::caret(text.chars().count()));
                    tracing::debug!("edit sent to {} peers", sent);
                }
                None => {
                    tracing::info!("stdin closed, waiting for shutdown signal");
                    shutdown.cancelled().await;
                    break;
                }
            },
            _ = shutdown.cancelled() => break,
        }
    }

    for agent in &joiners {
        agent.stop().await;
    }
    host.stop().await;

    tracing::info!("tomodomo stopped");
    Ok(())
}

/// Log membership changes seen by `agent`.
fn spawn_group_logger(agent: &CollabAgent, shutdown: ShutdownController) {
    let Some(mut events) = agent.group().take_event_rx() else {
        return;
    };
    let name = agent.display_name().to_string();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(GroupEvent::PeerMet(peer)) => tracing::info!("[{}] met {}", name, peer),
                    Some(GroupEvent::PeerExpired(peer)) => tracing::warn!("[{}] lost {}", name, peer),
                    Some(GroupEvent::PeerRecovered(peer)) => tracing::info!("[{}] {} is back", name, peer),
                    None => break,
                },
                _ = shutdown.cancelled() => break,
            }
        }
    });
}

/// Log document changes seen by `agent`.
fn spawn_session_logger(agent: &CollabAgent, shutdown: ShutdownController) {
    let Some(mut events) = agent.session().take_event_rx() else {
        return;
    };
    let name = agent.display_name().to_string();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(SessionEvent::DocumentChanged { document, origin }) => {
                        tracing::info!("[{}] document now {:?} ({:?})", name, document.text, origin);
                    }
                    Some(SessionEvent::DocumentSettled(text)) => {
                        tracing::info!("[{}] settled at {} chars", name, text.chars().count());
                    }
                    Some(SessionEvent::ResyncRequested(peer)) => {
                        tracing::warn!("[{}] out of sync with {}, resyncing", name, peer);
                    }
                    Some(SessionEvent::ShadowMoved(_)) => {}
                    None => break,
                },
                _ = shutdown.cancelled() => break,
            }
        }
    });
}
