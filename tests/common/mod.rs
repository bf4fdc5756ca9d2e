//! Common test utilities for all integration tests.
//!
//! Provides throwaway SQLite databases, upstream configuration for mock
//! servers, and a scriptable in-memory fetcher.

#![allow(dead_code)]

use async_trait::async_trait;
use routeplane::config::{DatabaseConfig, UpstreamConfig};
use routeplane::domain::{RoutingSnapshot, SourceType};
use routeplane::errors::{Result, RouteplaneError};
use routeplane::storage::{create_pool, DbPool};
use routeplane::upstream::UpstreamFetcher;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A migrated SQLite database in its own temporary directory.
pub struct TestDatabase {
    pub pool: DbPool,
    _dir: TempDir,
}

impl TestDatabase {
    pub async fn new(prefix: &str) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join(format!("{}.db", prefix));

        let config = DatabaseConfig {
            url: format!("sqlite://{}", path.display()),
            auto_migrate: true,
            max_connections: 5,
            min_connections: 1,
            ..Default::default()
        };
        let pool = create_pool(&config).await.expect("create test pool");

        Self { pool, _dir: dir }
    }
}

/// Upstream configuration pointing at `url` with no fallbacks.
pub fn upstream_config(kind: SourceType, url: &str) -> UpstreamConfig {
    UpstreamConfig {
        kind,
        url: url.to_string(),
        fallback_urls: Vec::new(),
        timeout_seconds: 5,
        ..Default::default()
    }
}

pub fn http_client(config: &UpstreamConfig) -> reqwest::Client {
    routeplane::upstream::build_http_client(config).expect("build http client")
}

/// Router definition in the proxy's shape.
pub fn router(host: &str, service: &str) -> Value {
    json!({
        "rule": format!("Host(`{}`)", host),
        "service": service,
        "entryPoints": ["websecure"],
        "tls": {"certResolver": "letsencrypt"}
    })
}

/// Snapshot holding the given `(router id, host)` pairs, each routed to a
/// service of the same id.
pub fn snapshot_with_routes(routes: &[(&str, &str)]) -> RoutingSnapshot {
    let mut snapshot = RoutingSnapshot::empty(SourceType::Aggregator);
    for (id, host) in routes {
        snapshot
            .http
            .routers
            .insert(id.to_string(), router(host, id));
    }
    snapshot.routes = routes
        .iter()
        .map(|(id, host)| routeplane::domain::DiscoveredRoute {
            upstream_id: id.to_string(),
            host: host.to_string(),
            service_id: id.to_string(),
            entrypoints: vec!["websecure".to_string()],
            tls_domains: Vec::new(),
            priority: None,
            rule: format!("Host(`{}`)", host),
        })
        .collect();
    snapshot
}

/// Fetcher whose snapshot can be swapped between calls; `None` fails with a
/// transport error.
pub struct ScriptedFetcher {
    calls: AtomicUsize,
    snapshot: Mutex<Option<RoutingSnapshot>>,
}

impl ScriptedFetcher {
    pub fn new(snapshot: RoutingSnapshot) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            snapshot: Mutex::new(Some(snapshot)),
        }
    }

    pub fn set(&self, snapshot: Option<RoutingSnapshot>) {
        *self.snapshot.lock().unwrap() = snapshot;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpstreamFetcher for ScriptedFetcher {
    async fn fetch(&self) -> Result<RoutingSnapshot> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let snapshot = self.snapshot.lock().unwrap().clone();
        snapshot.ok_or_else(|| {
            RouteplaneError::transport("http://upstream.test", "connection refused")
        })
    }

    fn source_type(&self) -> SourceType {
        SourceType::Aggregator
    }
}

/// Mount all eleven management endpoints with healthy payloads. Mocks
/// mounted earlier take precedence, so tests mount their failures first.
pub async fn mount_native_api(server: &MockServer, http_routers: Value) {
    let bodies = [
        ("/api/http/routers", http_routers),
        (
            "/api/http/services",
            json!([{
                "name": "app@docker",
                "loadBalancer": {"servers": [{"url": "http://app:80"}]},
                "status": "enabled"
            }]),
        ),
        ("/api/http/middlewares", json!([])),
        ("/api/tcp/routers", json!([])),
        ("/api/tcp/services", json!([])),
        ("/api/tcp/middlewares", json!([])),
        ("/api/udp/routers", json!([])),
        ("/api/udp/services", json!([])),
        ("/api/overview", json!({"http": {"routers": {"total": 1}}})),
        ("/api/version", json!({"Version": "3.1.0", "Codename": "test"})),
        ("/api/entrypoints", json!([{"name": "websecure", "address": ":443"}])),
    ];

    for (endpoint, body) in bodies {
        Mock::given(method("GET"))
            .and(path(endpoint))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }
}
