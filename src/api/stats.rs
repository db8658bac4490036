//! Service statistics endpoint.

use axum::extract::State;

use crate::error::ApiResponse;
use crate::server::AppState;
use crate::stats::StatsSnapshot;

/// GET /v1/stats/overview - always answers; unavailable gauges are marked degraded
#[tracing::instrument(name = "stats.overview", skip(state))]
pub async fn stats_overview(State(state): State<AppState>) -> ApiResponse<StatsSnapshot> {
    ApiResponse::success(state.stats.snapshot().await)
}
