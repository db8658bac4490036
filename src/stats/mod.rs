//! Read-only service statistics.
//!
//! The aggregator composes the latency recorder, presence tracker, local
//! connection registry, process resources and the external cache/database
//! gauges into one [`StatsSnapshot`]. Every external call is bounded by a
//! timeout; a failing gauge only degrades its own status field.

mod aggregator;
mod format;
mod resources;
mod snapshot;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use aggregator::StatsAggregator;
pub use format::{format_bytes, format_millis, format_uptime};
pub use resources::{ProcessResources, ResourceProbe, SystemInfo};
pub use snapshot::{
    BasicStats, CacheInfo, ConnectionStats, DatabaseStats, GaugeStatus, PerformanceInfo,
    RequestStats, ServiceInfo, StatsSnapshot,
};

#[derive(Debug, Error)]
pub enum GaugeError {
    #[error("Gauge timed out after {0:?}")]
    Timeout(Duration),

    #[error("Gauge unavailable: {0}")]
    Unavailable(String),

    #[error("Gauge backend error: {0}")]
    Backend(String),
}

/// Cache-side figures shown on the stats page
#[async_trait]
pub trait CacheGauge: Send + Sync {
    fn backend_name(&self) -> &'static str;

    async fn round_trip(&self) -> Result<Duration, GaugeError>;

    async fn used_memory(&self) -> Result<u64, GaugeError>;

    /// Number of keys matching any of `patterns`
    async fn cached_keys(&self, patterns: &[String]) -> Result<u64, GaugeError>;
}

/// Relational store figures shown on the stats page
#[async_trait]
pub trait DatabaseGauge: Send + Sync {
    fn pool_stats(&self) -> PoolStats;

    async fn ping(&self) -> Result<(), GaugeError>;

    async fn total_views(&self) -> Result<i64, GaugeError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub max_open: u32,
    pub open: u32,
    pub in_use: u32,
    pub idle: u32,
}
