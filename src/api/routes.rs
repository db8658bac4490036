use axum::{routing::get, Router};

use crate::server::AppState;

use super::{health, prometheus_metrics, stats_overview};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Health & Metrics
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
        // Stats
        .nest(
            "/v1",
            Router::new().route("/stats/overview", get(stats_overview)),
        )
}
