//! Per-connection state machine.
//!
//! `Connecting -> Open -> Closing -> Closed`. Opening registers the handle,
//! joins presence and announces the new count. Whatever ends the read loop
//! (client close, read error, write failure, eviction, shutdown), the same
//! cleanup runs exactly once: deregister, leave presence, announce. If the
//! task is cancelled or panics first, [`ConnectionGuard`]'s `Drop` does it.

use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::Message;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::MessagePolicy;
use crate::connection_manager::{BroadcastResult, ConnectionHandle, ConnectionRegistry};
use crate::metrics::WsMetrics;
use crate::presence::PresenceTracker;

use super::message::{presence_announcement, OutboundMessage};

/// How long the writer gets to flush the close frame
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }

    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        matches!(
            (self, next),
            (Self::Connecting, Self::Open)
                | (Self::Connecting, Self::Closing)
                | (Self::Open, Self::Closing)
                | (Self::Closing, Self::Closed)
        )
    }
}

/// Why a connection left the `Open` state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Client sent a close frame
    ClientClosed,
    /// Read half ended without a close frame
    StreamEnded,
    ReadError(String),
    WriteFailed,
    /// Evicted by a failed broadcast or closed on shutdown
    ServerClosed,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientClosed => write!(f, "client closed"),
            Self::StreamEnded => write!(f, "stream ended"),
            Self::ReadError(e) => write!(f, "read error: {}", e),
            Self::WriteFailed => write!(f, "write failed"),
            Self::ServerClosed => write!(f, "server closed"),
        }
    }
}

/// Tracks the current state and rejects illegal transitions
#[derive(Debug)]
pub struct Lifecycle {
    connection_id: Uuid,
    state: ConnectionState,
}

impl Lifecycle {
    pub fn new(connection_id: Uuid) -> Self {
        Self {
            connection_id,
            state: ConnectionState::Connecting,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn advance(&mut self, next: ConnectionState) -> bool {
        if !self.state.can_transition_to(next) {
            tracing::warn!(
                connection_id = %self.connection_id,
                from = self.state.as_str(),
                to = next.as_str(),
                "Ignoring invalid connection state transition"
            );
            return false;
        }
        tracing::debug!(
            connection_id = %self.connection_id,
            from = self.state.as_str(),
            to = next.as_str(),
            "Connection state changed"
        );
        self.state = next;
        true
    }
}

/// Shared collaborators every connection task needs
#[derive(Clone)]
pub struct ConnectionContext {
    pub registry: Arc<ConnectionRegistry>,
    pub presence: Arc<PresenceTracker>,
    pub policy: MessagePolicy,
    pub channel_buffer: usize,
}

impl ConnectionContext {
    /// Broadcast the current online count to every local connection.
    /// Skipped when the presence store cannot be read.
    pub async fn announce_presence(&self) -> Option<BroadcastResult> {
        let online_users = self.presence.count().await?;
        Some(self.registry.broadcast(presence_announcement(online_users)).await)
    }
}

/// Undo for whatever part of the opening sequence has completed.
///
/// `finish` hands the cleanup to the normal exit path; if the guard is
/// dropped while still armed (cancellation or panic) it deregisters
/// synchronously and spawns the async remainder on the runtime.
struct ConnectionGuard {
    ctx: ConnectionContext,
    handle: Arc<ConnectionHandle>,
    member: String,
    opened_at: Instant,
    registered: bool,
    joined: bool,
    armed: bool,
}

impl ConnectionGuard {
    fn new(ctx: ConnectionContext, handle: Arc<ConnectionHandle>) -> Self {
        let member = handle.presence_member();
        Self {
            ctx,
            handle,
            member,
            opened_at: Instant::now(),
            registered: false,
            joined: false,
            armed: true,
        }
    }

    fn take_cleanup(&mut self) -> Cleanup {
        self.armed = false;
        Cleanup {
            ctx: self.ctx.clone(),
            handle: self.handle.clone(),
            member: std::mem::take(&mut self.member),
            lifetime: self.opened_at.elapsed(),
            registered: self.registered,
            joined: self.joined,
        }
    }

    /// Run the cleanup on its own task so that cancelling the caller cannot
    /// interrupt it halfway.
    async fn finish(mut self) {
        let cleanup = self.take_cleanup();
        if let Err(e) = tokio::spawn(cleanup.run()).await {
            tracing::error!(error = %e, "Connection cleanup task failed");
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let mut cleanup = self.take_cleanup();
        tracing::warn!(
            connection_id = %cleanup.handle.id,
            "Connection task ended abnormally, running cleanup"
        );

        // Registry removal needs no await, do it here
        if cleanup.registered {
            cleanup.ctx.registry.remove(cleanup.handle.id);
            cleanup.registered = false;
            WsMetrics::record_closed(cleanup.lifetime);
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(cleanup.run());
            }
            Err(_) => {
                tracing::error!(
                    connection_id = %cleanup.handle.id,
                    member = %cleanup.member,
                    "No runtime available, presence entry left in store"
                );
            }
        }
    }
}

struct Cleanup {
    ctx: ConnectionContext,
    handle: Arc<ConnectionHandle>,
    member: String,
    lifetime: Duration,
    registered: bool,
    joined: bool,
}

impl Cleanup {
    async fn run(self) {
        if self.registered {
            self.ctx.registry.remove(self.handle.id);
            WsMetrics::record_closed(self.lifetime);
        }
        if self.joined {
            self.ctx.presence.leave(&self.member).await;
        }
        // during shutdown every peer is closing too
        if !self.ctx.registry.is_shutting_down() {
            self.ctx.announce_presence().await;
        }
    }
}

/// Drive one connection from upgrade to close.
///
/// `sink` and `stream` are the two halves of the socket. The sink moves into
/// a writer task fed by the connection's outbound channel; this task reads.
#[tracing::instrument(
    name = "ws.connection",
    skip(ctx, user_id, sink, stream),
    fields(user_id = %user_id, connection_id = tracing::field::Empty)
)]
pub async fn run_connection<W, R, E>(
    ctx: ConnectionContext,
    user_id: String,
    sink: W,
    mut stream: R,
) -> CloseReason
where
    W: Sink<Message> + Unpin + Send + 'static,
    W::Error: fmt::Display,
    R: Stream<Item = Result<Message, E>> + Unpin + Send,
    E: fmt::Display + Send,
{
    let (tx, rx) = mpsc::channel(ctx.channel_buffer.max(1));
    let handle = Arc::new(ConnectionHandle::new(user_id, tx));
    let connection_id = handle.id;
    tracing::Span::current().record("connection_id", tracing::field::display(connection_id));

    let mut lifecycle = Lifecycle::new(connection_id);
    let mut guard = ConnectionGuard::new(ctx.clone(), handle.clone());
    let mut writer = tokio::spawn(write_loop(
        sink,
        rx,
        connection_id,
        ctx.registry.send_timeout(),
    ));

    // Connecting -> Open
    ctx.registry.add(handle.clone());
    guard.registered = true;
    WsMetrics::record_opened();

    let member = handle.presence_member();
    if let Some(score) = ctx.presence.join(&member).await {
        guard.joined = true;
        tracing::debug!(connection_id = %connection_id, member = %member, score = score, "Presence joined");
    }
    lifecycle.advance(ConnectionState::Open);
    ctx.announce_presence().await;

    tracing::info!(
        connection_id = %connection_id,
        user_id = %handle.user_id,
        "WebSocket connection established"
    );

    let mut writer_done = false;
    let reason = loop {
        tokio::select! {
            _ = handle.closed() => break CloseReason::ServerClosed,
            _ = &mut writer, if !writer_done => {
                writer_done = true;
                break CloseReason::WriteFailed;
            }
            frame = stream.next() => {
                let flow = match frame {
                    None => ControlFlow::Break(CloseReason::StreamEnded),
                    Some(Err(e)) => ControlFlow::Break(CloseReason::ReadError(e.to_string())),
                    Some(Ok(msg)) => handle_frame(msg, &ctx, &handle).await,
                };
                if let ControlFlow::Break(reason) = flow {
                    break reason;
                }
            }
        }
    };

    // Open -> Closing
    lifecycle.advance(ConnectionState::Closing);
    tracing::info!(
        connection_id = %connection_id,
        user_id = %handle.user_id,
        reason = %reason,
        "WebSocket connection closing"
    );

    guard.finish().await;

    if !writer_done {
        // Best effort: the buffer may be full or the writer already gone
        let _ = handle.try_send(OutboundMessage::Close);
        drop(handle);
        close_writer(writer, connection_id).await;
    }

    // Closing -> Closed
    lifecycle.advance(ConnectionState::Closed);
    tracing::info!(connection_id = %connection_id, reason = %reason, "WebSocket connection closed");

    reason
}

async fn handle_frame(
    msg: Message,
    ctx: &ConnectionContext,
    handle: &Arc<ConnectionHandle>,
) -> ControlFlow<CloseReason> {
    let outbound = match msg {
        Message::Text(text) => {
            WsMetrics::record_text();
            OutboundMessage::Text(text)
        }
        Message::Binary(bytes) => {
            WsMetrics::record_binary();
            OutboundMessage::Binary(bytes)
        }
        Message::Ping(_) => {
            // the pong reply is sent by the socket itself
            WsMetrics::record_ping();
            handle.touch();
            return ControlFlow::Continue(());
        }
        Message::Pong(_) => {
            WsMetrics::record_pong();
            handle.touch();
            return ControlFlow::Continue(());
        }
        Message::Close(_) => {
            tracing::debug!(connection_id = %handle.id, "Received close frame");
            return ControlFlow::Break(CloseReason::ClientClosed);
        }
    };

    handle.touch();

    match ctx.policy {
        MessagePolicy::Echo => {
            // a client that stops reading must not pin the read loop
            let deadline = ctx.registry.send_timeout();
            match tokio::time::timeout(deadline, handle.send(outbound)).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => return ControlFlow::Break(CloseReason::WriteFailed),
                Err(_) => {
                    tracing::warn!(
                        connection_id = %handle.id,
                        timeout_ms = deadline.as_millis() as u64,
                        "Echo send timed out"
                    );
                    return ControlFlow::Break(CloseReason::WriteFailed);
                }
            }
        }
        MessagePolicy::Relay => {
            ctx.registry.broadcast(outbound).await;
        }
    }

    ControlFlow::Continue(())
}

/// Drain the outbound channel into the socket until a write fails or times
/// out, a close frame is sent or every sender is gone. Each socket write is
/// bounded by `write_timeout`.
async fn write_loop<W>(
    mut sink: W,
    mut rx: mpsc::Receiver<OutboundMessage>,
    connection_id: Uuid,
    write_timeout: Duration,
) where
    W: Sink<Message> + Unpin,
    W::Error: fmt::Display,
{
    while let Some(msg) = rx.recv().await {
        let is_close = msg.is_close();
        match tokio::time::timeout(write_timeout, sink.send(msg.into_message())).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(connection_id = %connection_id, error = %e, "WebSocket write failed");
                return;
            }
            Err(_) => {
                tracing::warn!(
                    connection_id = %connection_id,
                    timeout_ms = write_timeout.as_millis() as u64,
                    "WebSocket write timed out, client not reading"
                );
                return;
            }
        }
        if is_close {
            break;
        }
    }
    let _ = tokio::time::timeout(write_timeout, sink.close()).await;
}

async fn close_writer(mut writer: JoinHandle<()>, connection_id: Uuid) {
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        tracing::debug!(connection_id = %connection_id, "Writer did not drain in time, aborting");
        writer.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::MemoryPresenceStore;
    use futures::channel::mpsc as fmpsc;
    use std::convert::Infallible;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    type ClientTx = fmpsc::UnboundedSender<Result<Message, Infallible>>;
    type ClientRx = fmpsc::UnboundedReceiver<Message>;

    fn context(policy: MessagePolicy) -> ConnectionContext {
        ConnectionContext {
            registry: Arc::new(ConnectionRegistry::new(Duration::from_millis(200))),
            presence: Arc::new(PresenceTracker::new(Arc::new(MemoryPresenceStore::new()))),
            policy,
            channel_buffer: 16,
        }
    }

    fn spawn_client(
        ctx: &ConnectionContext,
        user_id: &str,
    ) -> (ClientTx, ClientRx, JoinHandle<CloseReason>) {
        let (client_tx, server_stream) = fmpsc::unbounded::<Result<Message, Infallible>>();
        let (server_sink, client_rx) = fmpsc::unbounded::<Message>();
        let task = tokio::spawn(run_connection(
            ctx.clone(),
            user_id.to_string(),
            server_sink,
            server_stream,
        ));
        (client_tx, client_rx, task)
    }

    async fn next_text(rx: &mut ClientRx) -> String {
        loop {
            match tokio::time::timeout(Duration::from_secs(2), rx.next()).await {
                Ok(Some(Message::Text(text))) => return text.as_str().to_string(),
                Ok(Some(_)) => continue,
                Ok(None) => panic!("server closed the socket"),
                Err(_) => panic!("timed out waiting for a text frame"),
            }
        }
    }

    async fn wait_until<F: Fn() -> bool>(condition: F) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[test]
    fn test_state_transitions() {
        use ConnectionState::*;
        assert!(Connecting.can_transition_to(Open));
        assert!(Open.can_transition_to(Closing));
        assert!(Closing.can_transition_to(Closed));
        assert!(!Closed.can_transition_to(Open));
        assert!(!Open.can_transition_to(Connecting));

        let mut lifecycle = Lifecycle::new(Uuid::new_v4());
        assert!(!lifecycle.advance(Closed));
        assert_eq!(lifecycle.state(), Connecting);
        assert!(lifecycle.advance(Open));
        assert!(lifecycle.advance(Closing));
        assert!(lifecycle.advance(Closed));
    }

    #[tokio::test]
    async fn test_echo_and_presence_round_trip() {
        let ctx = context(MessagePolicy::Echo);
        let (client_tx, mut client_rx, task) = spawn_client(&ctx, "alice");

        assert_eq!(next_text(&mut client_rx).await, "Online users: 1");

        client_tx
            .unbounded_send(Ok(Message::Text("hello".into())))
            .unwrap();
        assert_eq!(next_text(&mut client_rx).await, "hello");

        client_tx.unbounded_send(Ok(Message::Close(None))).unwrap();
        assert_eq!(task.await.unwrap(), CloseReason::ClientClosed);

        assert_eq!(ctx.registry.size(), 0);
        assert_eq!(ctx.presence.count().await, Some(0));
    }

    #[tokio::test]
    async fn test_relay_reaches_other_connections() {
        let ctx = context(MessagePolicy::Relay);
        let (alice_tx, mut alice_rx, _alice) = spawn_client(&ctx, "alice");
        assert_eq!(next_text(&mut alice_rx).await, "Online users: 1");

        let (_bob_tx, mut bob_rx, _bob) = spawn_client(&ctx, "bob");
        assert_eq!(next_text(&mut bob_rx).await, "Online users: 2");
        assert_eq!(next_text(&mut alice_rx).await, "Online users: 2");

        alice_tx
            .unbounded_send(Ok(Message::Text("hi all".into())))
            .unwrap();
        assert_eq!(next_text(&mut bob_rx).await, "hi all");
        assert_eq!(next_text(&mut alice_rx).await, "hi all");
    }

    #[tokio::test]
    async fn test_leave_is_announced_to_remaining_peers() {
        let ctx = context(MessagePolicy::Echo);
        let (_alice_tx, mut alice_rx, _alice) = spawn_client(&ctx, "alice");
        assert_eq!(next_text(&mut alice_rx).await, "Online users: 1");

        let (bob_tx, mut bob_rx, bob) = spawn_client(&ctx, "bob");
        assert_eq!(next_text(&mut bob_rx).await, "Online users: 2");
        assert_eq!(next_text(&mut alice_rx).await, "Online users: 2");

        drop(bob_tx);
        assert_eq!(bob.await.unwrap(), CloseReason::StreamEnded);
        assert_eq!(next_text(&mut alice_rx).await, "Online users: 1");
    }

    #[tokio::test]
    async fn test_same_user_twice_never_sticks() {
        let ctx = context(MessagePolicy::Echo);
        let (first_tx, mut first_rx, first) = spawn_client(&ctx, "alice");
        assert_eq!(next_text(&mut first_rx).await, "Online users: 1");

        let (second_tx, mut second_rx, second) = spawn_client(&ctx, "alice");
        assert_eq!(next_text(&mut second_rx).await, "Online users: 1");
        assert_eq!(ctx.registry.size(), 2);

        drop(first_tx);
        first.await.unwrap();
        assert_eq!(ctx.presence.count().await, Some(1));

        drop(second_tx);
        second.await.unwrap();
        assert_eq!(ctx.presence.count().await, Some(0));
        assert_eq!(ctx.registry.size(), 0);
    }

    #[tokio::test]
    async fn test_server_close_signal_ends_connection() {
        let ctx = context(MessagePolicy::Echo);
        let (_tx, mut rx, task) = spawn_client(&ctx, "alice");
        assert_eq!(next_text(&mut rx).await, "Online users: 1");

        assert_eq!(ctx.registry.close_all().len(), 1);
        assert_eq!(task.await.unwrap(), CloseReason::ServerClosed);

        // the client receives a close frame before the socket ends
        let mut saw_close = false;
        while let Some(msg) = rx.next().await {
            if matches!(msg, Message::Close(_)) {
                saw_close = true;
            }
        }
        assert!(saw_close);
        assert_eq!(ctx.presence.count().await, Some(0));
    }

    #[tokio::test]
    async fn test_write_failure_closes_connection() {
        let ctx = context(MessagePolicy::Echo);
        let (tx, rx, task) = spawn_client(&ctx, "alice");
        drop(rx);

        // the join announcement fails to write, the echo would too
        let _ = tx.unbounded_send(Ok(Message::Text("ping".into())));
        let reason = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reason, CloseReason::WriteFailed);
        assert_eq!(ctx.registry.size(), 0);
        assert_eq!(ctx.presence.count().await, Some(0));
    }

    #[tokio::test]
    async fn test_aborted_task_still_cleans_up() {
        let ctx = context(MessagePolicy::Echo);
        let (_tx, mut rx, task) = spawn_client(&ctx, "");
        assert_eq!(next_text(&mut rx).await, "Online users: 1");

        task.abort();
        let _ = task.await;

        let registry = ctx.registry.clone();
        wait_until(move || registry.is_empty()).await;
        for _ in 0..200 {
            if ctx.presence.count().await == Some(0) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("presence entry was not removed after abort");
    }

    /// Socket half whose peer never reads: every write stays pending
    struct StalledSink;

    impl Sink<Message> for StalledSink {
        type Error = Infallible;

        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
            Poll::Pending
        }

        fn start_send(self: Pin<&mut Self>, _item: Message) -> Result<(), Infallible> {
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
            Poll::Pending
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
            Poll::Pending
        }
    }

    #[tokio::test]
    async fn test_client_that_stops_reading_is_closed() {
        let ctx = ConnectionContext {
            channel_buffer: 1,
            ..context(MessagePolicy::Echo)
        };
        let (client_tx, server_stream) = fmpsc::unbounded::<Result<Message, Infallible>>();
        let task = tokio::spawn(run_connection(
            ctx.clone(),
            "alice".to_string(),
            StalledSink,
            server_stream,
        ));

        for i in 0..5 {
            let _ = client_tx.unbounded_send(Ok(Message::Text(format!("frame {}", i).into())));
        }
        ctx.registry.close_all();

        let reason = tokio::time::timeout(Duration::from_secs(3), task)
            .await
            .expect("connection task should finish")
            .unwrap();
        assert!(matches!(reason, CloseReason::WriteFailed | CloseReason::ServerClosed));
        assert!(ctx.registry.is_empty());
        assert_eq!(ctx.presence.count().await, Some(0));
    }

    #[tokio::test]
    async fn test_shutdown_does_not_reannounce() {
        let ctx = context(MessagePolicy::Echo);
        let (_a_tx, mut a_rx, a) = spawn_client(&ctx, "alice");
        assert_eq!(next_text(&mut a_rx).await, "Online users: 1");
        let (_b_tx, mut b_rx, b) = spawn_client(&ctx, "bob");
        assert_eq!(next_text(&mut b_rx).await, "Online users: 2");
        assert_eq!(next_text(&mut a_rx).await, "Online users: 2");

        assert_eq!(ctx.registry.close_all().len(), 2);
        assert_eq!(a.await.unwrap(), CloseReason::ServerClosed);
        assert_eq!(b.await.unwrap(), CloseReason::ServerClosed);

        for rx in [&mut a_rx, &mut b_rx] {
            while let Some(msg) = rx.next().await {
                assert!(matches!(msg, Message::Close(_)), "unexpected frame {:?}", msg);
            }
        }
        assert_eq!(ctx.presence.count().await, Some(0));
    }
}
