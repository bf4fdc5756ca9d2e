use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use super::handlers::{health_handler, proxy_config_handler};
use crate::services::ConfigMerger;

/// Path the proxy's HTTP provider polls.
pub const PROXY_CONFIG_PATH: &str = "/api/v1/traefik-config";

#[derive(Clone, Debug)]
pub struct ApiState {
    pub merger: Arc<ConfigMerger>,
}

pub fn build_router(merger: Arc<ConfigMerger>) -> Router {
    Router::new()
        .route(PROXY_CONFIG_PATH, get(proxy_config_handler))
        .route("/healthz", get(health_handler))
        .with_state(ApiState { merger })
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RoutingSnapshot, SourceType};
    use crate::services::certificate_authority::StaticCertificateAuthority;
    use crate::services::fetch_coordinator::test_support::CountingFetcher;
    use crate::services::FetchCoordinator;
    use crate::storage::test_helpers::TestDatabase;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;

    async fn router_with(fetcher: CountingFetcher, db: &TestDatabase) -> Router {
        let coordinator = Arc::new(FetchCoordinator::new(Arc::new(fetcher), Duration::ZERO));
        let merger = Arc::new(ConfigMerger::new(
            coordinator,
            db.pool.clone(),
            Arc::new(StaticCertificateAuthority(Default::default())),
            Duration::from_secs(5),
        ));
        build_router(merger)
    }

    #[tokio::test]
    async fn test_serves_merged_document() {
        let db = TestDatabase::new("api_config").await;
        let mut snapshot = RoutingSnapshot::empty(SourceType::Aggregator);
        snapshot.http.routers =
            json!({"app@docker": {"rule": "Host(`app.example.com`)", "service": "app@docker"}})
                .as_object()
                .cloned()
                .unwrap();
        let router = router_with(CountingFetcher::returning(snapshot), &db).await;

        let response = router
            .oneshot(Request::builder().uri(PROXY_CONFIG_PATH).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "application/json");

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let document: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(document["http"]["routers"]["app@docker"]["service"], "app@docker");
        assert!(document.get("tcp").is_none());
    }

    #[tokio::test]
    async fn test_upstream_failure_without_cache_is_bad_gateway() {
        let db = TestDatabase::new("api_failure").await;
        let router = router_with(CountingFetcher::failing(), &db).await;

        let response = router
            .oneshot(Request::builder().uri(PROXY_CONFIG_PATH).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_healthz() {
        let db = TestDatabase::new("api_health").await;
        let router = router_with(CountingFetcher::failing(), &db).await;

        let request = Request::builder()
            .uri("/healthz")
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
