//! Native management API fetcher against a mocked proxy.

mod common;

use common::{http_client, mount_native_api, router, upstream_config};
use routeplane::domain::SourceType;
use routeplane::errors::RouteplaneError;
use routeplane::upstream::{NativeFetcher, UpstreamFetcher};
use serde_json::json;
use wiremock::matchers::{any, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn routers() -> serde_json::Value {
    json!([
        {"name": "app@docker", "status": "enabled", "provider": "docker",
         "rule": "Host(`app.example.com`)", "service": "app", "entryPoints": ["websecure"],
         "tls": {"certResolver": "letsencrypt"}},
        {"name": "dashboard@internal", "rule": "PathPrefix(`/api`)", "service": "api@internal"}
    ])
}

fn fetcher_for(url: &str, fallbacks: Vec<String>) -> NativeFetcher {
    let mut config = upstream_config(SourceType::Native, url);
    config.fallback_urls = fallbacks;
    NativeFetcher::new(http_client(&config), &config)
}

#[tokio::test]
async fn test_snapshot_assembled_from_all_endpoints() {
    let server = MockServer::start().await;
    mount_native_api(&server, routers()).await;

    let snapshot = fetcher_for(&server.uri(), vec![]).fetch().await.unwrap();

    assert_eq!(snapshot.source_type, SourceType::Native);
    assert!(snapshot.http.routers.contains_key("app@docker"));
    assert!(!snapshot.http.routers.contains_key("dashboard@internal"));
    assert!(snapshot.http.routers["app@docker"].get("status").is_none());
    assert_eq!(snapshot.metadata.proxy_version.as_deref(), Some("3.1.0"));
    assert_eq!(snapshot.metadata.entrypoints.len(), 1);

    assert_eq!(snapshot.routes.len(), 1);
    assert_eq!(snapshot.routes[0].host, "app.example.com");
    assert_eq!(snapshot.services.len(), 1);
    assert_eq!(snapshot.services[0].service_type, "loadBalancer");
}

#[tokio::test]
async fn test_non_critical_failures_leave_collections_empty() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tcp/services"))
        .respond_with(ResponseTemplate::new(404))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/http/services"))
        .respond_with(ResponseTemplate::new(404))
        .with_priority(1)
        .mount(&server)
        .await;
    mount_native_api(&server, routers()).await;

    let snapshot = fetcher_for(&server.uri(), vec![]).fetch().await.unwrap();

    assert!(snapshot.tcp.services.is_empty());
    assert!(snapshot.http.services.is_empty());
    assert!(snapshot.services.is_empty());
    assert_eq!(snapshot.routes.len(), 1);
}

#[tokio::test]
async fn test_critical_http_error_fails_without_fallback() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/http/routers"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .with_priority(1)
        .mount(&server)
        .await;
    mount_native_api(&server, routers()).await;

    // a reachable primary that answers with an error is never bypassed
    let fallback = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&fallback)
        .await;

    let fetcher = fetcher_for(&server.uri(), vec![fallback.uri()]);
    let err = fetcher.fetch().await.unwrap_err();

    assert!(!err.is_transport());
    match err {
        RouteplaneError::CriticalEndpoints { failures } => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].0, "/api/http/routers");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(fetcher.last_suggestion().await.is_none());
}

#[tokio::test]
async fn test_unreachable_primary_uses_fallback_once() {
    let fallback = MockServer::start().await;
    mount_native_api(&fallback, json!({"app@docker": router("app.example.com", "app")})).await;

    // nothing listens on the discard port
    let fetcher = fetcher_for("http://127.0.0.1:9", vec![fallback.uri()]);
    let snapshot = fetcher.fetch().await.unwrap();

    assert_eq!(snapshot.routes.len(), 1);
    assert_eq!(snapshot.routes[0].upstream_id, "app@docker");

    let suggestion = fetcher.last_suggestion().await.unwrap();
    assert_eq!(suggestion.current_url, "http://127.0.0.1:9");
    assert_eq!(suggestion.suggested_url, fallback.uri());
}

#[tokio::test]
async fn test_every_base_unreachable_reports_primary_error() {
    let fetcher = fetcher_for("http://127.0.0.1:9", vec!["http://127.0.0.1:7".to_string()]);
    let err = fetcher.fetch().await.unwrap_err();
    assert!(err.is_transport());
    assert!(err.to_string().contains("127.0.0.1:9"));
}
