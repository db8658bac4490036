use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::StatsConfig;
use crate::connection_manager::ConnectionRegistry;
use crate::latency::LatencyRecorder;
use crate::presence::PresenceTracker;

use super::format::{format_bytes, format_millis, format_uptime};
use super::resources::{ResourceProbe, SystemInfo};
use super::snapshot::{
    BasicStats, CacheInfo, ConnectionStats, DatabaseStats, GaugeStatus, PerformanceInfo,
    RequestStats, ServiceInfo, StatsSnapshot,
};
use super::{CacheGauge, DatabaseGauge, GaugeError};

/// Builds [`StatsSnapshot`]s; never mutates what it reads.
pub struct StatsAggregator {
    latency: Arc<LatencyRecorder>,
    presence: Arc<PresenceTracker>,
    registry: Arc<ConnectionRegistry>,
    cache: Option<Arc<dyn CacheGauge>>,
    database: Option<Arc<dyn DatabaseGauge>>,
    system: SystemInfo,
    resources: ResourceProbe,
    config: StatsConfig,
    started_at: DateTime<Utc>,
}

struct DatabaseReading {
    stats: DatabaseStats,
    total_views: i64,
    views_status: GaugeStatus,
}

impl StatsAggregator {
    pub fn new(
        latency: Arc<LatencyRecorder>,
        presence: Arc<PresenceTracker>,
        registry: Arc<ConnectionRegistry>,
        config: StatsConfig,
    ) -> Self {
        Self {
            latency,
            presence,
            registry,
            cache: None,
            database: None,
            system: SystemInfo::detect(),
            resources: ResourceProbe::new(),
            config,
            started_at: Utc::now(),
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn CacheGauge>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_database(mut self, database: Arc<dyn DatabaseGauge>) -> Self {
        self.database = Some(database);
        self
    }

    /// Collect every section concurrently. Always completes: a slow or
    /// failing collaborator only marks its own section degraded.
    pub async fn snapshot(&self) -> StatsSnapshot {
        let limit = self.config.gauge_timeout();

        let (presence, cache_info, database) = tokio::join!(
            self.presence.reading_within(limit),
            self.cache_info(limit),
            self.database_reading(limit),
        );

        let latency = self.latency.summary();
        let resources = self.resources.collect();
        let registry = self.registry.stats();
        let uptime = format_uptime(latency.uptime);

        let service_status = GaugeStatus::from_ok(
            !presence.degraded && database.stats.status != GaugeStatus::Degraded,
        );

        StatsSnapshot {
            basic_stats: BasicStats {
                online_users: presence.online_users,
                presence_status: GaugeStatus::from_ok(!presence.degraded),
                total_views: database.total_views,
                views_status: database.views_status,
            },
            service_info: ServiceInfo {
                status: service_status,
                version: self.system.version.clone(),
                rust_version: self.system.rust_version.clone(),
                kernel_version: self.system.kernel_version.clone(),
                started_at: self.started_at,
                uptime: uptime.clone(),
            },
            cache_info,
            performance_info: PerformanceInfo {
                memory_usage: resources
                    .resident_bytes
                    .map(format_bytes)
                    .unwrap_or_else(|| "n/a".to_string()),
                live_tasks: resources.live_tasks,
                threads: resources.threads,
                gc_pause_total: "n/a".to_string(),
                average_latency: format_millis(latency.average),
            },
            request_stats: RequestStats {
                total_requests: latency.total_requests,
                qps: latency.qps,
                uptime,
                p50_latency: format_millis(latency.p50),
                p95_latency: format_millis(latency.p95),
                p99_latency: format_millis(latency.p99),
                window_size: latency.count,
            },
            database_stats: database.stats,
            connection_stats: ConnectionStats {
                local_connections: registry.total_connections,
                unique_users: registry.unique_users,
                presence_backend: self.presence.backend_type().to_string(),
            },
            generated_at: Utc::now(),
        }
    }

    async fn cache_info(&self, limit: Duration) -> CacheInfo {
        let Some(cache) = &self.cache else {
            return CacheInfo::disabled();
        };

        let (round_trip, used_memory, cached_keys) = tokio::join!(
            bounded("cache.round_trip", limit, cache.round_trip()),
            bounded("cache.used_memory", limit, cache.used_memory()),
            bounded(
                "cache.cached_keys",
                limit,
                cache.cached_keys(&self.config.cache_key_patterns)
            ),
        );

        let all_ok = round_trip.is_ok() && used_memory.is_ok() && cached_keys.is_ok();

        CacheInfo {
            status: GaugeStatus::from_ok(all_ok),
            latency: round_trip
                .map(format_millis)
                .unwrap_or_else(|_| "n/a".to_string()),
            cached_keys: cached_keys.ok(),
            cache_backend: cache.backend_name().to_string(),
            memory_usage: used_memory
                .map(format_bytes)
                .unwrap_or_else(|_| "n/a".to_string()),
        }
    }

    async fn database_reading(&self, limit: Duration) -> DatabaseReading {
        let Some(database) = &self.database else {
            return DatabaseReading {
                stats: DatabaseStats::disabled(),
                total_views: 0,
                views_status: GaugeStatus::Disabled,
            };
        };

        let (ping, views) = tokio::join!(
            bounded("database.ping", limit, database.ping()),
            bounded("database.total_views", limit, database.total_views()),
        );
        let pool = database.pool_stats();

        DatabaseReading {
            stats: DatabaseStats {
                status: GaugeStatus::from_ok(ping.is_ok()),
                max_open_conns: pool.max_open,
                open_conns: pool.open,
                in_use: pool.in_use,
                idle: pool.idle,
            },
            views_status: GaugeStatus::from_ok(views.is_ok()),
            total_views: views.unwrap_or(0),
        }
    }
}

/// Apply the gauge deadline and log the failure, if any
async fn bounded<T, F>(gauge: &'static str, limit: Duration, fut: F) -> Result<T, GaugeError>
where
    F: Future<Output = Result<T, GaugeError>>,
{
    let result = match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(GaugeError::Timeout(limit)),
    };

    if let Err(e) = &result {
        tracing::warn!(gauge = gauge, error = %e, "Stats gauge failed");
    }

    result
}
