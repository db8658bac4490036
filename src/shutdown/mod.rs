//! Graceful shutdown for open sockets.
//!
//! Once the listener stops accepting, every registered connection is told to
//! close. Each connection task then runs its own cleanup (deregister, leave
//! presence, announce). A task holds its handle until that cleanup returns,
//! so waiting for the signalled handles to be released is what gets the
//! presence decrements into the shared store before the process exits.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::connection_manager::{ConnectionHandle, ConnectionRegistry};

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Default)]
pub struct ShutdownResult {
    pub connections_signalled: usize,
    /// Connections whose cleanup had not finished when the drain timeout expired
    pub connections_remaining: usize,
    pub duration: Duration,
    pub success: bool,
}

pub struct GracefulShutdown {
    registry: Arc<ConnectionRegistry>,
    drain_timeout: Duration,
}

impl GracefulShutdown {
    pub fn new(registry: Arc<ConnectionRegistry>, drain_timeout: Duration) -> Self {
        Self {
            registry,
            drain_timeout,
        }
    }

    #[tracing::instrument(
        name = "graceful_shutdown",
        skip(self),
        fields(total_connections = self.registry.size())
    )]
    pub async fn execute(&self, reason: &str) -> ShutdownResult {
        let start = Instant::now();
        let mut result = ShutdownResult::default();

        tracing::info!(reason = %reason, "Starting graceful shutdown - closing connections");
        let signalled = self.registry.close_all();
        result.connections_signalled = signalled.len();

        result.connections_remaining = self.wait_for_release(signalled).await;
        result.duration = start.elapsed();
        result.success = result.connections_remaining == 0;

        if result.success {
            tracing::info!(
                connections_signalled = result.connections_signalled,
                duration_ms = result.duration.as_millis() as u64,
                "Graceful shutdown completed"
            );
        } else {
            tracing::warn!(
                connections_signalled = result.connections_signalled,
                connections_remaining = result.connections_remaining,
                duration_ms = result.duration.as_millis() as u64,
                "Drain timed out, some presence entries may be left behind"
            );
        }

        result
    }

    /// Poll until only this list still references the signalled handles, or
    /// the timeout expires; returns the number not yet released
    async fn wait_for_release(&self, mut pending: Vec<Arc<ConnectionHandle>>) -> usize {
        let deadline = Instant::now() + self.drain_timeout;

        loop {
            pending.retain(|handle| Arc::strong_count(handle) > 1);
            if pending.is_empty() || Instant::now() >= deadline {
                return pending.len();
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    }
}
