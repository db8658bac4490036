use std::sync::Arc;
use std::time::Instant;

use crate::config::{PresenceBackendKind, Settings};
use crate::connection_manager::ConnectionRegistry;
use crate::error::{AppError, Result};
use crate::latency::LatencyRecorder;
use crate::postgres::PostgresPool;
use crate::presence::{create_presence_store, PresenceTracker};
use crate::redis::RedisPool;
use crate::stats::StatsAggregator;
use crate::websocket::ConnectionContext;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub latency: Arc<LatencyRecorder>,
    pub registry: Arc<ConnectionRegistry>,
    pub presence: Arc<PresenceTracker>,
    pub stats: Arc<StatsAggregator>,
    /// `None` when presence runs on the memory backend
    pub redis_pool: Option<Arc<RedisPool>>,
    pub start_time: Instant,
}

impl AppState {
    /// Wire every component from settings. No network I/O happens here:
    /// Redis and PostgreSQL connect lazily on first use.
    pub fn new(settings: Settings) -> Result<Self> {
        let redis_pool = match settings.presence.backend {
            PresenceBackendKind::Redis => Some(Arc::new(
                RedisPool::new(settings.redis.clone())
                    .map_err(|e| AppError::internal(e.to_string()))?,
            )),
            PresenceBackendKind::Memory => None,
        };

        let postgres_pool = match &settings.database {
            Some(db) => Some(Arc::new(
                PostgresPool::connect_lazy(db)
                    .map_err(|e| AppError::internal(e.to_string()))?,
            )),
            None => None,
        };

        let latency = Arc::new(LatencyRecorder::new(settings.latency.window_size));
        let registry = Arc::new(ConnectionRegistry::new(
            settings.websocket.broadcast_timeout(),
        ));
        let presence = Arc::new(PresenceTracker::new(create_presence_store(
            &settings.presence,
            redis_pool.clone(),
        )));

        let mut stats = StatsAggregator::new(
            latency.clone(),
            presence.clone(),
            registry.clone(),
            settings.stats.clone(),
        );
        if let Some(pool) = &redis_pool {
            stats = stats.with_cache(pool.clone());
        }
        if let Some(pool) = postgres_pool {
            stats = stats.with_database(pool);
        }

        Ok(Self::from_components(
            settings,
            latency,
            registry,
            presence,
            Arc::new(stats),
            redis_pool,
        ))
    }

    /// Assemble state from prebuilt parts, e.g. with in-memory gauges
    pub fn from_components(
        settings: Settings,
        latency: Arc<LatencyRecorder>,
        registry: Arc<ConnectionRegistry>,
        presence: Arc<PresenceTracker>,
        stats: Arc<StatsAggregator>,
        redis_pool: Option<Arc<RedisPool>>,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            latency,
            registry,
            presence,
            stats,
            redis_pool,
            start_time: Instant::now(),
        }
    }

    pub fn connection_context(&self) -> ConnectionContext {
        ConnectionContext {
            registry: self.registry.clone(),
            presence: self.presence.clone(),
            policy: self.settings.websocket.message_policy,
            channel_buffer: self.settings.websocket.channel_buffer,
        }
    }
}
