//! Liveness endpoint.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub presence: PresenceHealthResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis: Option<RedisHealthResponse>,
    pub connections: ConnectionHealthResponse,
}

#[derive(Debug, Serialize)]
pub struct PresenceHealthResponse {
    pub backend: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct RedisHealthResponse {
    pub status: String,
    pub connected: bool,
    pub circuit_breaker_state: String,
    pub circuit_breaker_failures: u32,
    pub total_reconnections: u32,
}

#[derive(Debug, Serialize)]
pub struct ConnectionHealthResponse {
    pub total: usize,
    pub unique_users: usize,
}

/// GET /health - the process is up; `status` is `degraded` while the
/// presence store is failing
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let limit = state.settings.stats.gauge_timeout();
    let presence_ok = state.presence.ping_within(limit).await;

    let redis = state.redis_pool.as_ref().map(|pool| {
        let health = pool.health();
        let circuit = pool.circuit_stats();
        RedisHealthResponse {
            status: health.status.as_str().to_string(),
            connected: pool.is_healthy(),
            circuit_breaker_state: circuit.state.as_str().to_string(),
            circuit_breaker_failures: circuit.failure_count,
            total_reconnections: health.total_reconnections,
        }
    });

    let conn_stats = state.registry.stats();
    let status = if presence_ok { "ok" } else { "degraded" };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        presence: PresenceHealthResponse {
            backend: state.presence.backend_type().to_string(),
            status: if presence_ok { "normal" } else { "degraded" }.to_string(),
        },
        redis,
        connections: ConnectionHealthResponse {
            total: conn_stats.total_connections,
            unique_users: conn_stats.unique_users,
        },
    })
}
