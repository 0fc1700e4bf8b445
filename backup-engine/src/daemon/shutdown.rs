//! Shutdown handling for SIGTERM and SIGINT.
//!
//! On a signal, every running operation is asked to cancel so that partial
//! backups are cleaned up at their next checkpoint before the process exits.

use crate::ops::tracker::OperationTracker;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};

/// Default time running operations get to observe cancellation
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
const DRAIN_POLL: Duration = Duration::from_millis(50);

pub struct ShutdownCoordinator {
    drain_timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            drain_timeout: DRAIN_TIMEOUT,
        }
    }

    /// Resolve once SIGTERM or SIGINT arrives
    pub async fn wait_for_signal(&self) {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                warn!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received SIGINT (Ctrl+C), shutting down");
            }
            _ = terminate => {
                info!("Received SIGTERM, shutting down");
            }
        }
    }

    /// Cancel running operations and wait for them to drain
    pub async fn shutdown(&self, tracker: &OperationTracker) {
        let cancelled = tracker.cancel_all().await;
        if cancelled == 0 {
            info!("Shutdown complete");
            return;
        }
        info!(operations = cancelled, "Cancelling running operations");

        let drained = tokio::time::timeout(self.drain_timeout, async {
            while tracker.running_count().await > 0 {
                tokio::time::sleep(DRAIN_POLL).await;
            }
        })
        .await;

        match drained {
            Ok(()) => info!("Shutdown complete"),
            Err(_) => warn!(
                remaining = tracker.running_count().await,
                "Shutdown timeout, exiting with operations still running"
            ),
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
