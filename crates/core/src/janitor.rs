//! Periodic reclamation of expired sessions and dead peer connections
//!
//! The janitor snapshots reclamation candidates under the registry lock,
//! releases it, and only then performs the (potentially slow) external
//! teardown, so the lock is never held across an engine call. Per-entry
//! failures are tolerated; one bad session never aborts a sweep.

use crate::config::Config;
use crate::session::{LifecycleManager, SessionRegistry};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Hook the transport layer registers so the janitor can purge peer
/// connections that reached a terminal state
#[async_trait]
pub trait PeerSweeper: Send + Sync {
    /// Remove every terminal peer connection; returns how many were removed
    async fn sweep_dead_peers(&self) -> usize;
}

/// The periodic sweep task
pub struct Janitor {
    registry: Arc<SessionRegistry>,
    lifecycle: Arc<LifecycleManager>,
    config: Arc<Config>,
    peer_sweeper: Option<Arc<dyn PeerSweeper>>,
}

impl Janitor {
    /// Create a janitor over the given registry and lifecycle manager
    pub fn new(
        registry: Arc<SessionRegistry>,
        lifecycle: Arc<LifecycleManager>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            registry,
            lifecycle,
            config,
            peer_sweeper: None,
        }
    }

    /// Attach a peer-connection sweeper
    pub fn with_peer_sweeper(mut self, sweeper: Arc<dyn PeerSweeper>) -> Self {
        self.peer_sweeper = Some(sweeper);
        self
    }

    /// Run sweeps forever on the configured period.
    ///
    /// Intended to be spawned on the execution bridge worker; the sleep is a
    /// cooperative suspend, not a thread sleep.
    pub async fn run(self) {
        let interval = self.config.janitor_interval();
        info!(interval_secs = interval.as_secs(), "janitor started");
        loop {
            tokio::time::sleep(interval).await;
            self.sweep_once().await;
        }
    }

    /// One full sweep: expired sessions, then dead peer connections
    pub async fn sweep_once(&self) -> SweepReport {
        let session_timeout = Duration::from_secs(self.config.session_timeout_secs);
        let idle_timeout = Duration::from_secs(self.config.idle_timeout_secs);

        // Snapshot first; destroy outside any lock.
        let expired: Vec<String> = self
            .registry
            .list()
            .into_iter()
            .filter(|session| session.age() > session_timeout || session.idle() > idle_timeout)
            .map(|session| session.id().to_string())
            .collect();

        let mut report = SweepReport::default();
        for id in expired {
            info!(session_id = %id, "janitor reclaiming expired session");
            if self.lifecycle.destroy(&id).await {
                report.sessions_reclaimed += 1;
            } else {
                // Raced with an explicit delete; removal is idempotent.
                warn!(session_id = %id, "expired session vanished before sweep");
            }
        }

        if let Some(sweeper) = &self.peer_sweeper {
            report.peers_reclaimed = sweeper.sweep_dead_peers().await;
        }

        if report.sessions_reclaimed > 0 || report.peers_reclaimed > 0 {
            info!(
                sessions = report.sessions_reclaimed,
                peers = report.peers_reclaimed,
                "janitor sweep complete"
            );
        } else {
            debug!("janitor sweep found nothing to reclaim");
        }
        report
    }
}

/// What one sweep reclaimed
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Sessions destroyed for exceeding age or idle limits
    pub sessions_reclaimed: usize,
    /// Peer connections removed in terminal states
    pub peers_reclaimed: usize,
}
