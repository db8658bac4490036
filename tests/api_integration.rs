//! HTTP API integration tests
//!
//! Drive the full router with `oneshot` requests, using the memory presence
//! backend and in-process gauges, so no Redis or PostgreSQL is needed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::Value;
use tower::ServiceExt;

use presence_service::config::{PresenceBackendKind, PresenceConfig, Settings};
use presence_service::connection_manager::ConnectionRegistry;
use presence_service::latency::LatencyRecorder;
use presence_service::presence::{MemoryPresenceStore, PresenceTracker};
use presence_service::server::{create_app, AppState};
use presence_service::stats::{CacheGauge, DatabaseGauge, GaugeError, PoolStats, StatsAggregator};

struct InMemoryCache;

#[async_trait]
impl CacheGauge for InMemoryCache {
    fn backend_name(&self) -> &'static str {
        "Redis"
    }

    async fn round_trip(&self) -> Result<Duration, GaugeError> {
        Ok(Duration::from_millis(1))
    }

    async fn used_memory(&self) -> Result<u64, GaugeError> {
        Ok(512)
    }

    async fn cached_keys(&self, _patterns: &[String]) -> Result<u64, GaugeError> {
        Err(GaugeError::Unavailable("scan disabled".to_string()))
    }
}

struct InMemoryDatabase;

#[async_trait]
impl DatabaseGauge for InMemoryDatabase {
    fn pool_stats(&self) -> PoolStats {
        PoolStats {
            max_open: 10,
            open: 3,
            in_use: 1,
            idle: 2,
        }
    }

    async fn ping(&self) -> Result<(), GaugeError> {
        Ok(())
    }

    async fn total_views(&self) -> Result<i64, GaugeError> {
        Ok(1234)
    }
}

struct TestApp {
    router: Router,
    state: AppState,
}

fn test_app() -> TestApp {
    let settings = Settings {
        presence: PresenceConfig {
            backend: PresenceBackendKind::Memory,
            key: "online_users".to_string(),
        },
        ..Settings::default()
    };

    let latency = Arc::new(LatencyRecorder::new(settings.latency.window_size));
    let registry = Arc::new(ConnectionRegistry::new(settings.websocket.broadcast_timeout()));
    let presence = Arc::new(PresenceTracker::new(Arc::new(MemoryPresenceStore::new())));
    let stats = StatsAggregator::new(
        latency.clone(),
        presence.clone(),
        registry.clone(),
        settings.stats.clone(),
    )
    .with_cache(Arc::new(InMemoryCache))
    .with_database(Arc::new(InMemoryDatabase));

    let state = AppState::from_components(
        settings,
        latency,
        registry,
        presence,
        Arc::new(stats),
        None,
    );

    TestApp {
        router: create_app(state.clone()),
        state,
    }
}

async fn get_json(router: Router, uri: &str) -> (StatusCode, Value) {
    let response = router
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

mod health_tests {
    use super::*;

    #[tokio::test]
    async fn test_health_reports_memory_backend() {
        let app = test_app();
        let (status, body) = get_json(app.router, "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["presence"]["backend"], "memory");
        assert_eq!(body["presence"]["status"], "normal");
        assert_eq!(body["connections"]["total"], 0);
        assert!(body.get("redis").is_none());
    }
}

mod stats_tests {
    use super::*;

    #[tokio::test]
    async fn test_overview_envelope_and_groups() {
        let app = test_app();
        app.state.presence.join("alice").await;
        app.state.presence.join("bob").await;

        let (status, body) = get_json(app.router, "/v1/stats/overview").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["code"], 200);
        assert_eq!(body["message"], "Success");

        let data = &body["data"];
        for group in [
            "basicStats",
            "serviceInfo",
            "cacheInfo",
            "performanceInfo",
            "requestStats",
            "databaseStats",
            "connectionStats",
        ] {
            assert!(data.get(group).is_some(), "missing group {}", group);
        }

        assert_eq!(data["basicStats"]["onlineUsers"], 2);
        assert_eq!(data["basicStats"]["totalViews"], 1234);
        assert_eq!(data["databaseStats"]["maxOpenConns"], 10);
        assert_eq!(data["databaseStats"]["status"], "normal");
        assert_eq!(data["cacheInfo"]["latency"], "1ms");
        assert_eq!(data["cacheInfo"]["memoryUsage"], "< 1KB");
        // a failing key scan is null, not zero, and only degrades the cache section
        assert!(data["cacheInfo"]["cachedKeys"].is_null());
        assert_eq!(data["cacheInfo"]["status"], "degraded");
        assert_eq!(data["serviceInfo"]["status"], "normal");
        assert_eq!(data["performanceInfo"]["gcPauseTotal"], "n/a");
    }

    #[tokio::test]
    async fn test_requests_are_timed() {
        let app = test_app();

        for _ in 0..3 {
            let (status, _) = get_json(app.router.clone(), "/health").await;
            assert_eq!(status, StatusCode::OK);
        }

        assert_eq!(app.state.latency.total_requests(), 3);

        // the overview request itself is recorded only after it completes
        let (_, body) = get_json(app.router, "/v1/stats/overview").await;
        assert_eq!(body["data"]["requestStats"]["totalRequests"], 3);
        assert_eq!(app.state.latency.total_requests(), 4);
    }
}

mod routing_tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_route_uses_envelope() {
        let app = test_app();
        let (status, body) = get_json(app.router, "/v1/nope").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], 404);
        assert!(body.get("data").is_none());
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let app = test_app();
        let response = app
            .router
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("presence_ws_connections_open"));
    }
}
