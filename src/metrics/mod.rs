//! Prometheus metrics for the presence service.
//!
//! - Presence metrics (online users, store errors, degraded flag)
//! - WebSocket metrics (open sockets, opened/closed, duration, frames)
//! - Broadcast metrics (delivered, failed)
//! - HTTP request latency
//! - Redis health

mod helpers;

pub use helpers::{encode_metrics, BroadcastMetrics, HttpMetrics, PresenceMetrics, WsMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "presence";

lazy_static! {
    // ============================================================================
    // Presence Metrics
    // ============================================================================

    /// Distinct users online across the cluster, as last read from the store
    pub static ref ONLINE_USERS: IntGauge = register_int_gauge!(
        format!("{}_online_users", METRIC_PREFIX),
        "Distinct online users reported by the presence store"
    ).unwrap();

    /// Presence store failures by operation
    pub static ref PRESENCE_STORE_ERRORS: IntCounterVec = register_int_counter_vec!(
        format!("{}_store_errors_total", METRIC_PREFIX),
        "Presence store call failures",
        &["operation"]
    ).unwrap();

    /// 1 while the presence store is failing
    pub static ref PRESENCE_DEGRADED: IntGauge = register_int_gauge!(
        format!("{}_store_degraded", METRIC_PREFIX),
        "Presence store degraded (1=degraded, 0=normal)"
    ).unwrap();

    // ============================================================================
    // WebSocket Metrics
    // ============================================================================

    /// Sockets currently open on this instance
    pub static ref CONNECTIONS_OPEN: IntGauge = register_int_gauge!(
        format!("{}_ws_connections_open", METRIC_PREFIX),
        "WebSocket connections currently open on this instance"
    ).unwrap();

    pub static ref WS_CONNECTIONS_OPENED: IntCounter = register_int_counter!(
        format!("{}_ws_connections_opened_total", METRIC_PREFIX),
        "Total WebSocket connections opened"
    ).unwrap();

    pub static ref WS_CONNECTIONS_CLOSED: IntCounter = register_int_counter!(
        format!("{}_ws_connections_closed_total", METRIC_PREFIX),
        "Total WebSocket connections closed"
    ).unwrap();

    pub static ref WS_CONNECTION_DURATION: Histogram = register_histogram!(
        format!("{}_ws_connection_duration_seconds", METRIC_PREFIX),
        "WebSocket connection lifetime in seconds",
        vec![1.0, 10.0, 60.0, 300.0, 900.0, 3600.0, 14400.0]
    ).unwrap();

    /// Frames received from clients by type
    pub static ref WS_MESSAGES_RECEIVED: IntCounterVec = register_int_counter_vec!(
        format!("{}_ws_messages_received_total", METRIC_PREFIX),
        "Total WebSocket frames received",
        &["type"]
    ).unwrap();

    // ============================================================================
    // Broadcast Metrics
    // ============================================================================

    pub static ref BROADCAST_DELIVERED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_broadcast_delivered_total", METRIC_PREFIX),
        "Broadcast frames queued to a connection"
    ).unwrap();

    /// Failed or timed-out sends; each one evicts its connection
    pub static ref BROADCAST_FAILED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_broadcast_failed_total", METRIC_PREFIX),
        "Broadcast sends that failed or timed out"
    ).unwrap();

    // ============================================================================
    // HTTP Metrics
    // ============================================================================

    pub static ref HTTP_REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        format!("{}_http_request_duration_seconds", METRIC_PREFIX),
        "HTTP request duration in seconds",
        &["method", "status"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    ).unwrap();

    // ============================================================================
    // Redis Metrics
    // ============================================================================

    /// Redis connection status (1 = connected, 0 = disconnected)
    pub static ref REDIS_CONNECTION_STATUS: IntGauge = register_int_gauge!(
        format!("{}_redis_connection_status", METRIC_PREFIX),
        "Redis connection status (1=connected, 0=disconnected)"
    ).unwrap();

    /// Redis circuit breaker state (0=closed, 1=open, 2=half-open)
    pub static ref REDIS_CIRCUIT_BREAKER_STATE: IntGauge = register_int_gauge!(
        format!("{}_redis_circuit_breaker_state", METRIC_PREFIX),
        "Redis circuit breaker state (0=closed, 1=open, 2=half-open)"
    ).unwrap();

    pub static ref REDIS_RECONNECTIONS_TOTAL: IntGauge = register_int_gauge!(
        format!("{}_redis_reconnections", METRIC_PREFIX),
        "Redis reconnections since startup"
    ).unwrap();
}
