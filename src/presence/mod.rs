//! Cluster-wide online-user tracking.

mod memory_store;
mod redis_store;
mod store;
mod tracker;

use std::sync::Arc;

pub use memory_store::MemoryPresenceStore;
pub use redis_store::RedisPresenceStore;
pub use store::{PresenceError, PresenceStore};
pub use tracker::{PresenceReading, PresenceTracker};

use crate::config::{PresenceBackendKind, PresenceConfig};
use crate::redis::RedisPool;

/// Create the presence store selected by `config.backend`.
///
/// The Redis backend needs a pool; without one the memory store is used so
/// the service still starts (single-instance counts only).
pub fn create_presence_store(
    config: &PresenceConfig,
    redis_pool: Option<Arc<RedisPool>>,
) -> Arc<dyn PresenceStore> {
    match (config.backend, redis_pool) {
        (PresenceBackendKind::Redis, Some(pool)) => {
            tracing::info!(backend = "redis", key = %config.key, "Creating Redis presence store");
            Arc::new(RedisPresenceStore::new(pool, config.key.clone()))
        }
        (PresenceBackendKind::Redis, None) => {
            tracing::warn!("Redis presence backend requested but no pool provided, falling back to memory");
            Arc::new(MemoryPresenceStore::new())
        }
        (PresenceBackendKind::Memory, _) => {
            tracing::info!(backend = "memory", "Creating in-memory presence store");
            Arc::new(MemoryPresenceStore::new())
        }
    }
}
