//! Resource and service reconciliation against a scripted upstream.

mod common;

use common::{snapshot_with_routes, ScriptedFetcher, TestDatabase};
use routeplane::domain::{DiscoveredService, ResourceStatus};
use routeplane::services::{FetchCoordinator, ResourceWatcher, ServiceWatcher};
use routeplane::storage::{ResourceRepository, ServiceRepository};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    db: TestDatabase,
    fetcher: Arc<ScriptedFetcher>,
    watcher: ResourceWatcher,
    resources: ResourceRepository,
}

async fn harness(name: &str, routes: &[(&str, &str)]) -> Harness {
    let db = TestDatabase::new(name).await;
    let fetcher = Arc::new(ScriptedFetcher::new(snapshot_with_routes(routes)));
    let coordinator = Arc::new(FetchCoordinator::new(fetcher.clone(), Duration::ZERO));
    let watcher = ResourceWatcher::new(coordinator, db.pool.clone(), Duration::from_secs(30));
    let resources = ResourceRepository::new(db.pool.clone());
    Harness {
        db,
        fetcher,
        watcher,
        resources,
    }
}

#[tokio::test]
async fn test_manual_priority_survives_reconcile() {
    let h = harness("manual_priority", &[("app@docker", "app.example.com")]).await;
    h.watcher.check_resources().await.unwrap();

    let mut resource = h.resources.list_active().await.unwrap().remove(0);
    resource.router_priority = 500;
    resource.router_priority_manual = true;
    h.resources.save_overrides(&resource).await.unwrap();

    let mut snapshot = snapshot_with_routes(&[("app@docker", "app.example.com")]);
    snapshot.routes[0].priority = Some(10);
    h.fetcher.set(Some(snapshot));
    let report = h.watcher.check_resources().await.unwrap();
    assert_eq!(report.updated, 1);

    let stored = h.resources.get_by_id(&resource.id).await.unwrap();
    assert_eq!(stored.router_priority, 500);
    assert!(stored.router_priority_manual);
}

#[tokio::test]
async fn test_upstream_priority_applies_when_not_manual() {
    let h = harness("upstream_priority", &[("app@docker", "app.example.com")]).await;
    h.watcher.check_resources().await.unwrap();

    let mut snapshot = snapshot_with_routes(&[("app@docker", "app.example.com")]);
    snapshot.routes[0].priority = Some(42);
    h.fetcher.set(Some(snapshot));
    h.watcher.check_resources().await.unwrap();

    let stored = h.resources.list_active().await.unwrap().remove(0);
    assert_eq!(stored.router_priority, 42);
}

#[tokio::test]
async fn test_host_change_keeps_identity_and_overrides() {
    let h = harness("host_change", &[("app@docker", "a.example.com")]).await;
    h.watcher.check_resources().await.unwrap();

    let mut resource = h.resources.list_active().await.unwrap().remove(0);
    resource
        .custom_headers
        .insert("X-Team".to_string(), "edge".to_string());
    h.resources.save_overrides(&resource).await.unwrap();

    h.fetcher.set(Some(snapshot_with_routes(&[("app@docker", "b.example.com")])));
    let report = h.watcher.check_resources().await.unwrap();
    assert_eq!(report.created, 0);
    assert_eq!(report.disabled, 0);

    let active = h.resources.list_active().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, resource.id);
    assert_eq!(active[0].host, "b.example.com");
    assert_eq!(active[0].custom_headers["X-Team"], "edge");
}

#[tokio::test]
async fn test_empty_upstream_disables_everything() {
    let routes = [("a@docker", "a.example.com"), ("b@docker", "b.example.com")];
    let h = harness("empty_upstream", &routes).await;
    assert_eq!(h.watcher.check_resources().await.unwrap().created, 2);

    h.fetcher.set(Some(snapshot_with_routes(&[])));
    let report = h.watcher.check_resources().await.unwrap();
    assert_eq!(report.disabled, 2);
    assert!(h.resources.list_active().await.unwrap().is_empty());
    let disabled = h
        .resources
        .list_by_status(ResourceStatus::Disabled)
        .await
        .unwrap();
    assert_eq!(disabled.len(), 2);

    // the same hosts coming back reuse the disabled rows
    h.fetcher.set(Some(snapshot_with_routes(&routes)));
    let report = h.watcher.check_resources().await.unwrap();
    assert_eq!(report.created, 0);
    assert_eq!(report.reactivated, 2);
    let active = h
        .resources
        .count_by_status(ResourceStatus::Active)
        .await
        .unwrap();
    assert_eq!(active, 2);
}

#[tokio::test]
async fn test_unreachable_upstream_changes_nothing() {
    let h = harness("unreachable", &[("a@docker", "a.example.com")]).await;
    h.watcher.check_resources().await.unwrap();

    h.fetcher.set(None);
    assert!(h.watcher.check_resources().await.is_err());
    assert_eq!(h.resources.list_active().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_service_mirror_leaves_custom_services_alone() {
    let db = TestDatabase::new("service_mirror").await;
    let services = ServiceRepository::new(db.pool.clone());
    let custom = services
        .create_custom("canary", "weighted", &json!({"services": []}))
        .await
        .unwrap();

    let mut snapshot = snapshot_with_routes(&[]);
    snapshot.services = vec![DiscoveredService {
        upstream_id: "app@docker".to_string(),
        service_type: "loadBalancer".to_string(),
        config: json!({"servers": [{"url": "http://app:80"}]}),
    }];
    let fetcher = Arc::new(ScriptedFetcher::new(snapshot));
    let coordinator = Arc::new(FetchCoordinator::new(fetcher.clone(), Duration::ZERO));
    let watcher = ServiceWatcher::new(coordinator, db.pool.clone(), Duration::from_secs(30));

    assert_eq!(watcher.check_services().await.unwrap().created, 1);

    fetcher.set(Some(snapshot_with_routes(&[])));
    let report = watcher.check_services().await.unwrap();
    assert_eq!(report.disabled, 1);

    assert_eq!(services.get_by_id("app@docker").await.unwrap().status, "disabled");
    assert_eq!(services.get_by_id(&custom.id).await.unwrap().status, "active");
}
