//! Periodic removal of expired codes, refresh tokens and abandoned upstream flows.

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tracing::{debug, warn};

use super::AuthorizationServer;

/// Counts from one sweep. Failed steps count as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub codes: u64,
    pub tokens: u64,
    pub states: usize,
}

/// Owner of the background sweep task.
///
/// Dropping the handle also stops the task; [`stop`](Self::stop) additionally waits for it.
#[derive(Debug)]
pub struct CleanupHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl CleanupHandle {
    /// Signal the task to exit and wait for it.
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            warn!(error = %e, "Cleanup task ended abnormally");
        }
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl AuthorizationServer {
    /// Run one sweep. Failures are logged and never abort the remaining steps.
    pub async fn cleanup_expired(&self) -> SweepStats {
        let mut stats = SweepStats::default();

        match self.storage.cleanup_expired_codes().await {
            Ok(n) => stats.codes = n,
            Err(e) => warn!(error = %e, "Failed to clean up expired authorization codes"),
        }
        match self.storage.cleanup_expired_tokens().await {
            Ok(n) => stats.tokens = n,
            Err(e) => warn!(error = %e, "Failed to clean up expired refresh tokens"),
        }
        match self.states.cleanup(self.config.state_ttl).await {
            Ok(n) => stats.states = n,
            Err(e) => warn!(error = %e, "Failed to clean up authorization states"),
        }

        debug!(codes = stats.codes, tokens = stats.tokens, states = stats.states, "Cleanup sweep");
        stats
    }

    /// Start the periodic sweep on `config.cleanup_interval`. The first sweep runs one
    /// interval after start.
    #[must_use]
    pub fn start_cleanup(self: &Arc<Self>) -> CleanupHandle {
        let server = Arc::clone(self);
        let period = self.config.cleanup_interval;
        let (shutdown, mut shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        server.cleanup_expired().await;
                    }
                }
            }
            debug!("Cleanup task stopped");
        });

        CleanupHandle { shutdown, task }
    }
}
