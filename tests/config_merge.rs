//! Merge engine with stored overrides and settings.

mod common;

use common::{snapshot_with_routes, ScriptedFetcher, TestDatabase};
use routeplane::domain::{CaConfig, MtlsSettings, Resource, SecuritySettings, SourceType};
use routeplane::services::{ConfigMerger, FetchCoordinator, StaticCertificateAuthority};
use routeplane::storage::{
    MiddlewareRepository, ResourceRepository, ServiceRepository, SettingsRepository,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    db: TestDatabase,
    fetcher: Arc<ScriptedFetcher>,
    merger: ConfigMerger,
}

async fn harness(name: &str, ca: CaConfig, ttl: Duration) -> Harness {
    let db = TestDatabase::new(name).await;
    let fetcher = Arc::new(ScriptedFetcher::new(snapshot_with_routes(&[
        ("app@docker", "app.example.com"),
        ("other@docker", "other.example.com"),
    ])));
    let coordinator = Arc::new(FetchCoordinator::new(fetcher.clone(), Duration::ZERO));
    let ca = Arc::new(StaticCertificateAuthority(ca));
    let merger = ConfigMerger::new(coordinator, db.pool.clone(), ca, ttl);
    Harness {
        db,
        fetcher,
        merger,
    }
}

/// Store an active resource for `app.example.com` and return it.
async fn seed_resource(h: &Harness, edit: impl FnOnce(&mut Resource)) -> Resource {
    let repo = ResourceRepository::new(h.db.pool.clone());
    let mut resource = Resource::discovered(
        "app@docker",
        "app.example.com",
        "app@docker",
        SourceType::Aggregator,
    );
    let mut conn = h.db.pool.acquire().await.unwrap();
    ResourceRepository::insert(&mut *conn, &resource)
        .await
        .unwrap();
    edit(&mut resource);
    repo.save_overrides(&resource).await.unwrap();
    resource
}

#[tokio::test]
async fn test_cached_within_ttl_and_byte_identical() {
    let h = harness("merge_cache", CaConfig::default(), Duration::from_secs(60)).await;
    seed_resource(&h, |r| {
        r.custom_headers = BTreeMap::from([
            ("X-B".to_string(), "2".to_string()),
            ("X-A".to_string(), "1".to_string()),
        ]);
    })
    .await;

    let first = h.merger.get_merged_config().await.unwrap();
    let second = h.merger.get_merged_config().await.unwrap();
    assert_eq!(h.fetcher.calls(), 1);
    assert_eq!(first.to_json_bytes().unwrap(), second.to_json_bytes().unwrap());

    h.merger.invalidate_cache().await;
    let third = h.merger.get_merged_config().await.unwrap();
    assert_eq!(h.fetcher.calls(), 2);
    assert_eq!(first.to_json_bytes().unwrap(), third.to_json_bytes().unwrap());

    let _ = h.merger.get_merged_config().await.unwrap();
    assert_eq!(h.fetcher.calls(), 2);
}

#[tokio::test]
async fn test_stale_document_served_when_upstream_fails() {
    let h = harness("merge_stale", CaConfig::default(), Duration::from_millis(1)).await;

    let first = h.merger.get_merged_config().await.unwrap();
    h.fetcher.set(None);
    tokio::time::sleep(Duration::from_millis(20)).await;

    let stale = h.merger.get_merged_config().await.unwrap();
    assert!(Arc::ptr_eq(&first, &stale));
}

#[tokio::test]
async fn test_no_cache_and_no_upstream_is_an_error() {
    let h = harness("merge_error", CaConfig::default(), Duration::from_secs(5)).await;
    h.fetcher.set(None);
    let err = h.merger.get_merged_config().await.unwrap_err();
    assert!(err.is_transport());
}

#[tokio::test]
async fn test_mtls_excludes_tls_hardening() {
    let ca = CaConfig {
        enabled: true,
        has_ca: true,
        ca_cert_path: "/certs/ca.pem".to_string(),
    };
    let h = harness("merge_mtls", ca, Duration::from_secs(5)).await;

    let settings = SettingsRepository::new(h.db.pool.clone());
    let mtls = MtlsSettings {
        enabled: true,
        rules: vec![json!({"type": "allowAll"})],
        ..Default::default()
    };
    settings.save_mtls(&mtls).await.unwrap();
    let security = SecuritySettings {
        tls_hardening_enabled: true,
        ..Default::default()
    };
    settings.save_security(&security).await.unwrap();

    let resource = seed_resource(&h, |r| {
        r.mtls.enabled = true;
        r.tls_hardening_enabled = true;
    })
    .await;

    let document = h.merger.get_merged_config().await.unwrap();
    let router = &document.http.routers["app@docker"];
    assert_eq!(router["tls"]["options"], "mtls-verify");
    let whitelist = format!("mtls-whitelist-{}", resource.id);
    assert_eq!(router["middlewares"][0], json!(whitelist));
    assert_eq!(
        document.http.middlewares[&whitelist]["plugin"]["mtlswhitelist"]["rules"],
        json!([{"type": "allowAll"}])
    );

    let tls = document.tls.as_ref().unwrap();
    assert!(tls["options"].get("tls-hardened").is_none());

    // untouched host keeps its upstream definition
    assert!(document.http.routers["other@docker"].get("middlewares").is_none());
}

#[tokio::test]
async fn test_assigned_middlewares_and_custom_service() {
    let h = harness("merge_assignments", CaConfig::default(), Duration::from_secs(5)).await;
    let resource = seed_resource(&h, |r| r.router_priority = 250).await;

    let middlewares = MiddlewareRepository::new(h.db.pool.clone());
    let auth = middlewares
        .create("auth", "basicAuth", &json!({"users": ["a:b"]}))
        .await
        .unwrap();
    let limit = middlewares
        .create("limit", "rateLimit", &json!({"average": 10}))
        .await
        .unwrap();
    middlewares
        .assign(&resource.id, &limit.id, 10)
        .await
        .unwrap();
    middlewares
        .assign(&resource.id, &auth.id, 200)
        .await
        .unwrap();

    let services = ServiceRepository::new(h.db.pool.clone());
    let weighted = json!({"services": [{"name": "app@docker", "weight": 1}]});
    let canary = services
        .create_custom("canary", "weighted", &weighted)
        .await
        .unwrap();
    services
        .assign_to_resource(&resource.id, &canary.id)
        .await
        .unwrap();

    let document = h.merger.get_merged_config().await.unwrap();
    let router = &document.http.routers["app@docker"];
    assert_eq!(router["middlewares"], json!(["auth", "limit"]));
    assert_eq!(router["priority"], 250);
    assert_eq!(router["service"], "canary");
    assert_eq!(document.http.middlewares["auth"], json!({"basicAuth": {"users": ["a:b"]}}));
    assert_eq!(document.http.services["canary"]["weighted"]["services"][0]["name"], "app@docker");
}
