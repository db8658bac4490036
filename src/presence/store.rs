//! Contract over the shared online-user counter.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::redis::PoolError;

#[derive(Debug, Error)]
pub enum PresenceError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Store is temporarily unreachable (e.g., circuit breaker open)
    #[error("Presence store unavailable: {0}")]
    Unavailable(String),

    #[error("Presence store call timed out after {0:?}")]
    Timeout(Duration),
}

impl From<PoolError> for PresenceError {
    fn from(e: PoolError) -> Self {
        match e {
            PoolError::Redis(e) => PresenceError::Redis(e),
            PoolError::CircuitOpen => {
                PresenceError::Unavailable("Circuit breaker is open".to_string())
            }
        }
    }
}

/// Reference-counted membership keyed by a presence member id.
///
/// The score of a member is the number of its currently open connections.
/// A member whose score would drop to zero is removed, never stored as 0.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Backend name (`redis` or `memory`)
    fn backend_type(&self) -> &'static str;

    /// Increment the member's score and return the new score.
    async fn join(&self, member: &str) -> Result<i64, PresenceError>;

    /// Decrement the member's score, removing it at zero. Returns the
    /// remaining score; an unknown member is left untouched and yields 0.
    async fn leave(&self, member: &str) -> Result<i64, PresenceError>;

    /// Number of distinct members online.
    async fn count(&self) -> Result<u64, PresenceError>;

    async fn ping(&self) -> Result<(), PresenceError>;
}
