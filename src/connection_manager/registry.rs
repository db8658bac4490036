use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use tokio::time::timeout;
use uuid::Uuid;

use crate::metrics::BroadcastMetrics;
use crate::websocket::OutboundMessage;

use super::types::{BroadcastResult, ConnectionHandle, RegistryStats};

/// Live connections held by this instance.
///
/// Backed by a sharded map, so lookups and inserts on different shards do not
/// contend. Broadcast takes a snapshot of the handles and sends outside any
/// shard lock.
pub struct ConnectionRegistry {
    /// connection_id -> ConnectionHandle
    connections: DashMap<Uuid, Arc<ConnectionHandle>>,
    broadcast_timeout: Duration,
    shutting_down: AtomicBool,
}

impl ConnectionRegistry {
    pub fn new(broadcast_timeout: Duration) -> Self {
        Self {
            connections: DashMap::new(),
            broadcast_timeout,
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Deadline for queueing one outbound frame to a connection
    pub fn send_timeout(&self) -> Duration {
        self.broadcast_timeout
    }

    /// Set once [`close_all`](Self::close_all) has run
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    pub fn add(&self, handle: Arc<ConnectionHandle>) {
        let conn_id = handle.id;
        tracing::info!(connection_id = %conn_id, user_id = %handle.user_id, "Connection registered");
        self.connections.insert(conn_id, handle);
    }

    /// Remove a connection; unknown ids are a no-op
    pub fn remove(&self, connection_id: Uuid) -> Option<Arc<ConnectionHandle>> {
        let (_, handle) = self.connections.remove(&connection_id)?;
        tracing::info!(connection_id = %connection_id, user_id = %handle.user_id, "Connection unregistered");
        Some(handle)
    }

    pub fn get(&self, connection_id: Uuid) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(&connection_id).map(|h| h.clone())
    }

    pub fn size(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Distinct presence members among local connections
    pub fn unique_users(&self) -> usize {
        self.connections
            .iter()
            .map(|entry| entry.value().presence_member())
            .collect::<HashSet<_>>()
            .len()
    }

    pub fn connections(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections.iter().map(|r| r.value().clone()).collect()
    }

    /// Send `message` to every connection concurrently.
    ///
    /// Each send waits at most the broadcast timeout for buffer space. A peer
    /// whose send fails or times out is removed and told to close; the rest
    /// still receive the frame.
    pub async fn broadcast(&self, message: OutboundMessage) -> BroadcastResult {
        let targets = self.connections();
        if targets.is_empty() {
            return BroadcastResult::default();
        }

        let deadline = self.broadcast_timeout;
        let sends = targets.into_iter().map(|conn| {
            let msg = message.clone();
            async move {
                match timeout(deadline, conn.send(msg)).await {
                    Ok(Ok(())) => None,
                    Ok(Err(_)) => Some((conn, "channel closed")),
                    Err(_) => Some((conn, "send timed out")),
                }
            }
        });

        let mut result = BroadcastResult::default();
        for outcome in join_all(sends).await {
            match outcome {
                None => result.delivered += 1,
                Some((conn, reason)) => {
                    result.failed += 1;
                    tracing::warn!(
                        connection_id = %conn.id,
                        user_id = %conn.user_id,
                        reason = reason,
                        "Broadcast failed, evicting connection"
                    );
                    self.remove(conn.id);
                    conn.close();
                }
            }
        }

        BroadcastMetrics::record(result.delivered, result.failed);
        tracing::debug!(
            delivered = result.delivered,
            failed = result.failed,
            "Broadcast complete"
        );

        result
    }

    /// Signal every connection to close; returns the handles signalled
    ///
    /// Marks the registry as shutting down, so closing connections stop
    /// announcing counts to each other.
    pub fn close_all(&self) -> Vec<Arc<ConnectionHandle>> {
        self.shutting_down.store(true, Ordering::Release);
        let connections = self.connections();
        for conn in &connections {
            conn.close();
        }
        connections
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            total_connections: self.size(),
            unique_users: self.unique_users(),
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn connect(
        registry: &ConnectionRegistry,
        user_id: &str,
        buffer: usize,
    ) -> (Arc<ConnectionHandle>, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(buffer);
        let handle = Arc::new(ConnectionHandle::new(user_id.to_string(), tx));
        registry.add(handle.clone());
        (handle, rx)
    }

    #[test]
    fn test_add_remove() {
        let registry = ConnectionRegistry::default();
        let (handle, _rx) = connect(&registry, "alice", 4);

        assert_eq!(registry.size(), 1);
        assert!(registry.get(handle.id).is_some());

        assert!(registry.remove(handle.id).is_some());
        assert!(registry.remove(handle.id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unique_users() {
        let registry = ConnectionRegistry::default();
        let (_a1, _r1) = connect(&registry, "alice", 4);
        let (_a2, _r2) = connect(&registry, "alice", 4);
        let (_b, _r3) = connect(&registry, "bob", 4);
        let (_anon1, _r4) = connect(&registry, "", 4);
        let (_anon2, _r5) = connect(&registry, "", 4);

        let stats = registry.stats();
        assert_eq!(stats.total_connections, 5);
        // alice, bob and two distinct anonymous connections
        assert_eq!(stats.unique_users, 4);
    }

    #[tokio::test]
    async fn test_broadcast_delivers_to_all() {
        let registry = ConnectionRegistry::default();
        let (_a, mut rx_a) = connect(&registry, "alice", 4);
        let (_b, mut rx_b) = connect(&registry, "bob", 4);

        let result = registry.broadcast(OutboundMessage::text("hello")).await;
        assert_eq!(result, BroadcastResult { delivered: 2, failed: 0 });

        assert_eq!(rx_a.recv().await, Some(OutboundMessage::text("hello")));
        assert_eq!(rx_b.recv().await, Some(OutboundMessage::text("hello")));
    }

    #[tokio::test]
    async fn test_broadcast_evicts_failed_peer() {
        let registry = ConnectionRegistry::default();
        let (_a, mut rx_a) = connect(&registry, "alice", 4);
        let (_b, mut rx_b) = connect(&registry, "bob", 4);
        let (dead, rx_dead) = connect(&registry, "carol", 4);
        drop(rx_dead);

        let result = registry.broadcast(OutboundMessage::text("hello")).await;
        assert_eq!(result, BroadcastResult { delivered: 2, failed: 1 });

        assert_eq!(registry.size(), 2);
        assert!(registry.get(dead.id).is_none());
        assert!(dead.is_closing());
        assert!(rx_a.recv().await.is_some());
        assert!(rx_b.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_broadcast_times_out_slow_peer() {
        let registry = ConnectionRegistry::new(Duration::from_millis(50));
        let (_fast, mut rx_fast) = connect(&registry, "alice", 4);
        let (slow, _rx_slow) = connect(&registry, "bob", 1);

        // fill the slow peer's buffer so the next send blocks
        slow.send(OutboundMessage::text("backlog")).await.unwrap();

        let result = registry.broadcast(OutboundMessage::text("hello")).await;
        assert_eq!(result, BroadcastResult { delivered: 1, failed: 1 });
        assert!(slow.is_closing());
        assert_eq!(rx_fast.recv().await, Some(OutboundMessage::text("hello")));
    }

    #[test]
    fn test_close_all_signals_every_connection() {
        let registry = ConnectionRegistry::default();
        let (a, _ra) = connect(&registry, "alice", 4);
        let (b, _rb) = connect(&registry, "bob", 4);

        assert!(!registry.is_shutting_down());
        assert_eq!(registry.close_all().len(), 2);
        assert!(registry.is_shutting_down());
        assert!(a.is_closing());
        assert!(b.is_closing());
        // closing is a signal; owners remove themselves
        assert_eq!(registry.size(), 2);
    }
}
