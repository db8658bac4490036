//! Registry of WebSocket connections open on this instance.

mod registry;
mod types;

pub use registry::ConnectionRegistry;
pub use types::{BroadcastResult, ConnectionHandle, RegistryStats};
