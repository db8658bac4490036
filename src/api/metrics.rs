//! Prometheus metrics endpoint.

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};

use crate::metrics;
use crate::redis::{CircuitState, StoreHealthStatus};
use crate::server::AppState;

/// GET /metrics - Prometheus metrics endpoint
pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    update_metrics_from_state(&state);

    match metrics::encode_metrics() {
        Ok(output) => (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            output,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode Prometheus metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(axum::http::header::CONTENT_TYPE, "text/plain")],
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}

/// Refresh gauges that are sampled rather than updated in place
fn update_metrics_from_state(state: &AppState) {
    metrics::CONNECTIONS_OPEN.set(state.registry.size() as i64);

    if let Some(pool) = &state.redis_pool {
        let health = pool.health();
        let is_connected = health.status == StoreHealthStatus::Healthy;
        metrics::REDIS_CONNECTION_STATUS.set(if is_connected { 1 } else { 0 });
        metrics::REDIS_RECONNECTIONS_TOTAL.set(health.total_reconnections as i64);

        let cb_state = match pool.circuit_stats().state {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        };
        metrics::REDIS_CIRCUIT_BREAKER_STATE.set(cb_state);
    }
}
