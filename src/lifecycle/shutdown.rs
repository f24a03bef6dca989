//! Shutdown coordination for the gateway.

use std::future::Future;
use std::time::Duration;

use tokio::sync::broadcast;

/// Coordinator for graceful shutdown.
///
/// Provides a broadcast channel that all long-running tasks can subscribe to.
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for `drain` to finish, giving up after `grace`.
///
/// Returns `None` if the deadline passed first.
pub async fn drain_within<F>(drain: F, grace: Duration) -> Option<F::Output>
where
    F: Future,
{
    match tokio::time::timeout(grace, drain).await {
        Ok(output) => Some(output),
        Err(_) => {
            tracing::warn!(
                grace_secs = grace.as_secs(),
                "Shutdown grace period elapsed with requests still in flight"
            );
            None
        }
    }
}
