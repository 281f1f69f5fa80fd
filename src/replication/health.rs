//! Peer Health Tracker
//!
//! Per-peer liveness record. Every refresh re-arms an expiry timer; if the
//! timer fires before the next refresh the peer is marked expired until it
//! is heard from again.

use crate::domain::entities::PeerId;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Liveness state of a tracked peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// Created, not yet refreshed
    Fresh,
    /// Heard from within the liveness window
    Healthy,
    /// Silent for longer than the liveness window
    Expired,
}

/// Called once when a tracker expires.
pub type ExpiryHook = Arc<dyn Fn(&PeerId) + Send + Sync>;

struct HealthInner {
    state: HealthState,
    last_refresh: Instant,
    /// Bumped on every refresh; a timer only expires its own generation.
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

/// Liveness record for one peer.
pub struct PeerHealth {
    peer_id: PeerId,
    display_name: String,
    window: Duration,
    inner: Arc<Mutex<HealthInner>>,
    on_expire: Option<ExpiryHook>,
}

impl PeerHealth {
    /// Create a tracker in the `Fresh` state. No timer runs until the first
    /// [`refresh`](Self::refresh).
    pub fn new(peer_id: PeerId, display_name: impl Into<String>, window: Duration) -> Self {
        Self {
            peer_id,
            display_name: display_name.into(),
            window,
            inner: Arc::new(Mutex::new(HealthInner {
                state: HealthState::Fresh,
                last_refresh: Instant::now(),
                generation: 0,
                timer: None,
            })),
            on_expire: None,
        }
    }

    /// Set the hook invoked when the tracker expires.
    pub fn on_expire(mut self, hook: ExpiryHook) -> Self {
        self.on_expire = Some(hook);
        self
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn state(&self) -> HealthState {
        self.inner.lock().state
    }

    pub fn is_healthy(&self) -> bool {
        self.state() == HealthState::Healthy
    }

    pub fn last_refresh(&self) -> Instant {
        self.inner.lock().last_refresh
    }

    /// Mark the peer healthy and re-arm the expiry timer.
    ///
    /// Returns the state before the refresh. Must be called from within a
    /// tokio runtime.
    pub fn refresh(&self) -> HealthState {
        let mut guard = self.inner.lock();
        let previous = guard.state;

        if let Some(timer) = guard.timer.take() {
            timer.abort();
        }
        guard.generation += 1;
        guard.state = HealthState::Healthy;
        guard.last_refresh = Instant::now();

        let generation = guard.generation;
        let inner = self.inner.clone();
        let window = self.window;
        let peer_id = self.peer_id.clone();
        let hook = self.on_expire.clone();

        guard.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(window).await;

            let expired = {
                let mut guard = inner.lock();
                if guard.generation == generation && guard.state == HealthState::Healthy {
                    guard.state = HealthState::Expired;
                    guard.timer = None;
                    true
                } else {
                    false
                }
            };

            if expired {
                tracing::debug!("peer {} silent for {:?}, marking unhealthy", peer_id, window);
                if let Some(hook) = hook {
                    hook(&peer_id);
                }
            }
        }));

        previous
    }

    /// Cancel the pending expiry timer without changing the state.
    pub fn stop(&self) {
        let mut guard = self.inner.lock();
        guard.generation += 1;
        if let Some(timer) = guard.timer.take() {
            timer.abort();
        }
    }
}

impl Drop for PeerHealth {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for PeerHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerHealth")
            .field("peer_id", &self.peer_id)
            .field("display_name", &self.display_name)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const WINDOW: Duration = Duration::from_secs(10);

    fn counting_hook() -> (ExpiryHook, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        (
            Arc::new(move |_: &PeerId| {
                c.fetch_add(1, Ordering::SeqCst);
            }),
            count,
        )
    }

    #[test]
    fn test_new_tracker_is_fresh() {
        let health = PeerHealth::new(PeerId::new("p1"), "alice", WINDOW);
        assert_eq!(health.state(), HealthState::Fresh);
        assert!(!health.is_healthy());
        assert_eq!(health.display_name(), "alice");
        assert_eq!(health.peer_id().as_str(), "p1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_marks_healthy() {
        let health = PeerHealth::new(PeerId::new("p1"), "alice", WINDOW);
        assert_eq!(health.refresh(), HealthState::Fresh);
        assert!(health.is_healthy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expires_once_after_silence() {
        let (hook, count) = counting_hook();
        let health = PeerHealth::new(PeerId::new("p1"), "alice", WINDOW).on_expire(hook);
        health.refresh();

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert!(health.is_healthy());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(health.state(), HealthState::Expired);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_postpones_expiry() {
        let (hook, count) = counting_hook();
        let health = PeerHealth::new(PeerId::new("p1"), "alice", WINDOW).on_expire(hook);
        health.refresh();

        for _ in 0..5 {
            tokio::time::sleep(Duration::from_secs(6)).await;
            health.refresh();
        }
        assert!(health.is_healthy());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_resurrects_expired_peer() {
        let (hook, count) = counting_hook();
        let health = PeerHealth::new(PeerId::new("p1"), "alice", WINDOW).on_expire(hook);
        health.refresh();

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(!health.is_healthy());

        assert_eq!(health.refresh(), HealthState::Expired);
        assert!(health.is_healthy());

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(!health.is_healthy());
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_refresh_follows_runtime_clock() {
        let health = PeerHealth::new(PeerId::new("p1"), "alice", WINDOW);
        health.refresh();
        let first = health.last_refresh();

        tokio::time::sleep(Duration::from_secs(4)).await;
        health.refresh();
        assert_eq!(health.last_refresh() - first, Duration::from_secs(4));
        assert_eq!(health.last_refresh(), Instant::now());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_timer() {
        let (hook, count) = counting_hook();
        let health = PeerHealth::new(PeerId::new("p1"), "alice", WINDOW).on_expire(hook);
        health.refresh();
        health.stop();

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(health.is_healthy());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
