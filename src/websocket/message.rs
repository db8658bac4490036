use axum::body::Bytes;
use axum::extract::ws::{close_code, CloseFrame, Message, Utf8Bytes};

/// Frame queued for a connection's writer task.
///
/// Payloads are reference counted, so cloning one for every peer of a
/// broadcast does not copy the bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    Text(Utf8Bytes),
    Binary(Bytes),
    /// Send a close frame and stop writing
    Close,
}

impl OutboundMessage {
    pub fn text(text: impl Into<Utf8Bytes>) -> Self {
        Self::Text(text.into())
    }

    pub fn is_close(&self) -> bool {
        matches!(self, Self::Close)
    }

    pub fn into_message(self) -> Message {
        match self {
            Self::Text(text) => Message::Text(text),
            Self::Binary(bytes) => Message::Binary(bytes),
            Self::Close => Message::Close(Some(CloseFrame {
                code: close_code::AWAY,
                reason: "server closing connection".into(),
            })),
        }
    }
}

/// Text frame announcing the current online-user count
pub fn presence_announcement(online_users: u64) -> OutboundMessage {
    OutboundMessage::text(format!("Online users: {}", online_users))
}
