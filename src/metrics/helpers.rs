//! Metrics helper structs for convenient metric recording

use std::time::Duration;

use prometheus::{Encoder, TextEncoder};

use super::{
    BROADCAST_DELIVERED_TOTAL, BROADCAST_FAILED_TOTAL, CONNECTIONS_OPEN, HTTP_REQUEST_DURATION,
    ONLINE_USERS, PRESENCE_DEGRADED, PRESENCE_STORE_ERRORS, WS_CONNECTIONS_CLOSED,
    WS_CONNECTIONS_OPENED, WS_CONNECTION_DURATION, WS_MESSAGES_RECEIVED,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

pub struct PresenceMetrics;

impl PresenceMetrics {
    pub fn set_online_users(count: u64) {
        ONLINE_USERS.set(count as i64);
    }

    pub fn record_error(operation: &str) {
        PRESENCE_STORE_ERRORS.with_label_values(&[operation]).inc();
    }

    pub fn set_degraded(degraded: bool) {
        PRESENCE_DEGRADED.set(if degraded { 1 } else { 0 });
    }
}

pub struct WsMetrics;

impl WsMetrics {
    pub fn record_opened() {
        WS_CONNECTIONS_OPENED.inc();
        CONNECTIONS_OPEN.inc();
    }

    pub fn record_closed(lifetime: Duration) {
        WS_CONNECTIONS_CLOSED.inc();
        CONNECTIONS_OPEN.dec();
        WS_CONNECTION_DURATION.observe(lifetime.as_secs_f64());
    }

    pub fn record_text() {
        WS_MESSAGES_RECEIVED.with_label_values(&["text"]).inc();
    }

    pub fn record_binary() {
        WS_MESSAGES_RECEIVED.with_label_values(&["binary"]).inc();
    }

    pub fn record_ping() {
        WS_MESSAGES_RECEIVED.with_label_values(&["ping"]).inc();
    }

    pub fn record_pong() {
        WS_MESSAGES_RECEIVED.with_label_values(&["pong"]).inc();
    }
}

pub struct BroadcastMetrics;

impl BroadcastMetrics {
    pub fn record(delivered: usize, failed: usize) {
        BROADCAST_DELIVERED_TOTAL.inc_by(delivered as u64);
        BROADCAST_FAILED_TOTAL.inc_by(failed as u64);
    }
}

pub struct HttpMetrics;

impl HttpMetrics {
    pub fn observe(method: &str, status: u16, elapsed: Duration) {
        let status = status.to_string();
        HTTP_REQUEST_DURATION
            .with_label_values(&[method, status.as_str()])
            .observe(elapsed.as_secs_f64());
    }
}
