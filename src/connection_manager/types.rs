//! Connection handle and related types

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

use crate::websocket::OutboundMessage;

/// Handle for a single WebSocket connection.
///
/// Owned by the task driving the socket; the registry only keeps an `Arc`
/// so broadcasts can reach it.
pub struct ConnectionHandle {
    pub id: Uuid,
    /// Empty for anonymous clients
    pub user_id: String,
    pub connected_at: DateTime<Utc>,
    sender: mpsc::Sender<OutboundMessage>,
    /// Last activity timestamp (Unix seconds) - using AtomicI64 for lock-free updates
    last_activity: AtomicI64,
    closing: AtomicBool,
    close_signal: Notify,
}

impl ConnectionHandle {
    pub fn new(user_id: String, sender: mpsc::Sender<OutboundMessage>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            connected_at: now,
            sender,
            last_activity: AtomicI64::new(now.timestamp()),
            closing: AtomicBool::new(false),
            close_signal: Notify::new(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.user_id.is_empty()
    }

    /// Member id used in the presence store. Anonymous clients are counted
    /// once per connection.
    pub fn presence_member(&self) -> String {
        if self.is_anonymous() {
            format!("anonymous:{}", self.id)
        } else {
            self.user_id.clone()
        }
    }

    pub fn touch(&self) {
        self.last_activity
            .store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.last_activity.load(Ordering::Relaxed), 0)
            .unwrap_or_else(Utc::now)
    }

    /// Queue a frame for the writer task, waiting for buffer space
    pub async fn send(
        &self,
        message: OutboundMessage,
    ) -> Result<(), mpsc::error::SendError<OutboundMessage>> {
        self.sender.send(message).await
    }

    pub fn try_send(
        &self,
        message: OutboundMessage,
    ) -> Result<(), mpsc::error::TrySendError<OutboundMessage>> {
        self.sender.try_send(message)
    }

    /// Ask the owning task to close the connection. Idempotent.
    pub fn close(&self) {
        if !self.closing.swap(true, Ordering::AcqRel) {
            // notify_one keeps a permit if nobody is waiting yet
            self.close_signal.notify_one();
        }
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Resolves once [`close`](Self::close) has been called
    pub async fn closed(&self) {
        if self.is_closing() {
            return;
        }
        self.close_signal.notified().await;
    }
}

/// Outcome of a fan-out send
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastResult {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub total_connections: usize,
    pub unique_users: usize,
}
