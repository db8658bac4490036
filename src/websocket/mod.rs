//! WebSocket endpoint: upgrade handling, the per-connection lifecycle and
//! outbound frames.

mod handler;
mod lifecycle;
mod message;

pub use handler::{validate_user_id, ws_handler, WsQuery};
pub use lifecycle::{
    run_connection, CloseReason, ConnectionContext, ConnectionState, Lifecycle,
};
pub use message::{presence_announcement, OutboundMessage};
