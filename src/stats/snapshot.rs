//! Serialized shape of `GET /v1/stats/overview`.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Health of one section of the document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GaugeStatus {
    Normal,
    Degraded,
    /// The collaborator is not configured on this instance
    Disabled,
}

impl GaugeStatus {
    pub fn from_ok(ok: bool) -> Self {
        if ok {
            Self::Normal
        } else {
            Self::Degraded
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub basic_stats: BasicStats,
    pub service_info: ServiceInfo,
    pub cache_info: CacheInfo,
    pub performance_info: PerformanceInfo,
    pub request_stats: RequestStats,
    pub database_stats: DatabaseStats,
    pub connection_stats: ConnectionStats,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BasicStats {
    /// Distinct users online across every instance
    pub online_users: u64,
    pub presence_status: GaugeStatus,
    pub total_views: i64,
    pub views_status: GaugeStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfo {
    pub status: GaugeStatus,
    pub version: String,
    pub rust_version: String,
    pub kernel_version: String,
    pub started_at: DateTime<Utc>,
    pub uptime: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheInfo {
    pub status: GaugeStatus,
    pub latency: String,
    /// `null` when the key scan failed or timed out
    pub cached_keys: Option<u64>,
    pub cache_backend: String,
    pub memory_usage: String,
}

impl CacheInfo {
    pub fn disabled() -> Self {
        Self {
            status: GaugeStatus::Disabled,
            latency: "n/a".to_string(),
            cached_keys: None,
            cache_backend: "none".to_string(),
            memory_usage: "n/a".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceInfo {
    /// Resident set size of this process
    pub memory_usage: String,
    pub live_tasks: Option<usize>,
    pub threads: Option<u64>,
    /// No garbage collector; kept for dashboard compatibility
    pub gc_pause_total: String,
    pub average_latency: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestStats {
    pub total_requests: u64,
    pub qps: f64,
    pub uptime: String,
    pub p50_latency: String,
    pub p95_latency: String,
    pub p99_latency: String,
    /// Samples currently held in the latency window
    pub window_size: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseStats {
    pub status: GaugeStatus,
    pub max_open_conns: u32,
    pub open_conns: u32,
    pub in_use: u32,
    pub idle: u32,
}

impl DatabaseStats {
    pub fn disabled() -> Self {
        Self {
            status: GaugeStatus::Disabled,
            max_open_conns: 0,
            open_conns: 0,
            in_use: 0,
            idle: 0,
        }
    }
}

/// Sockets held by this instance only
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStats {
    pub local_connections: usize,
    pub unique_users: usize,
    pub presence_backend: String,
}
