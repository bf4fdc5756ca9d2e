//! # Upstream Fetchers
//!
//! Clients for the two upstream authorities a routing snapshot can come from:
//!
//! - [`AggregatorFetcher`]: one complete configuration document from an
//!   aggregator API
//! - [`NativeFetcher`]: the proxy's own management API, eleven endpoints
//!   fetched concurrently
//!
//! Both implement [`UpstreamFetcher`] and surface the same
//! [`DiscoveredRoute`] list so reconciliation does not care which authority
//! is configured.

pub mod aggregator;
pub mod decode;
pub mod native;

pub use aggregator::AggregatorFetcher;
pub use native::{ConfigSuggestion, NativeFetcher};

use crate::config::UpstreamConfig;
use crate::domain::{ConfigMap, DiscoveredRoute, DiscoveredService, RoutingSnapshot, SourceType};
use crate::errors::{Result, RouteplaneError};
use crate::rules::extract_host;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Upstream routers that belong to the proxy itself.
const SYSTEM_ROUTERS: &[&str] = &[
    "api@internal",
    "dashboard@internal",
    "acme-http@internal",
    "ping@internal",
    "prometheus@internal",
    "noop@internal",
    "rest@internal",
];

const SYSTEM_ROUTER_PREFIXES: &[&str] = &["web-to-websecure", "websecure-to-", "traefik-"];

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Trait for fetching the routing snapshot from an upstream authority
#[async_trait]
pub trait UpstreamFetcher: Send + Sync {
    /// Fetch a complete snapshot
    async fn fetch(&self) -> Result<RoutingSnapshot>;

    /// Authority this fetcher talks to
    fn source_type(&self) -> SourceType;

    async fn fetch_routers(&self) -> Result<ConfigMap> {
        Ok(self.fetch().await?.http.routers)
    }

    async fn fetch_services(&self) -> Result<ConfigMap> {
        Ok(self.fetch().await?.http.services)
    }

    async fn fetch_middlewares(&self) -> Result<ConfigMap> {
        Ok(self.fetch().await?.http.middlewares)
    }
}

/// Build the HTTP client shared by every upstream request.
pub fn build_http_client(config: &UpstreamConfig) -> Result<Client> {
    Client::builder()
        .timeout(config.timeout())
        .connect_timeout(CONNECT_TIMEOUT.min(config.timeout()))
        .danger_accept_invalid_certs(config.skip_tls_verify)
        .build()
        .map_err(|e| RouteplaneError::internal(format!("Failed to create HTTP client: {}", e)))
}

/// Build the fetcher selected by configuration.
pub fn create_fetcher(config: &UpstreamConfig, client: Client) -> Arc<dyn UpstreamFetcher> {
    match config.kind {
        SourceType::Aggregator => Arc::new(AggregatorFetcher::new(client, config)),
        SourceType::Native => Arc::new(NativeFetcher::new(client, config)),
    }
}

/// Basic auth credentials attached to each request.
#[derive(Clone)]
pub(crate) struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub(crate) fn from_config(config: &UpstreamConfig) -> Option<Self> {
        config.basic_auth().map(|(username, password)| Self {
            username: username.to_string(),
            password: password.to_string(),
        })
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// GET a URL and parse the JSON body of a 2xx response.
pub(crate) async fn get_json(
    client: &Client,
    url: &str,
    credentials: Option<&Credentials>,
) -> Result<Value> {
    let mut request = client
        .get(url)
        .header(reqwest::header::ACCEPT, "application/json");
    if let Some(credentials) = credentials {
        request = request.basic_auth(&credentials.username, Some(&credentials.password));
    }

    let response = request
        .send()
        .await
        .map_err(|e| classify_send_error(url, e))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(RouteplaneError::upstream(url, status.as_u16(), truncate(&body, 200)));
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| classify_send_error(url, e))?;
    serde_json::from_slice(&body)
        .map_err(|e| RouteplaneError::decode(url, format!("invalid JSON: {}", e)))
}

fn classify_send_error(url: &str, error: reqwest::Error) -> RouteplaneError {
    if error.is_timeout() {
        RouteplaneError::transport(url, format!("request timed out: {}", error))
    } else if error.is_decode() {
        RouteplaneError::decode(url, error.to_string())
    } else {
        RouteplaneError::transport(url, error.to_string())
    }
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((index, _)) => format!("{}...", &text[..index]),
        None => text.to_string(),
    }
}

/// Whether a router id names one of the proxy's own routers.
pub fn is_system_router(id: &str) -> bool {
    SYSTEM_ROUTERS.contains(&id)
        || SYSTEM_ROUTER_PREFIXES
            .iter()
            .any(|prefix| id.starts_with(prefix))
}

/// Whether an item is defined by the proxy itself (`<name>@internal`).
pub fn is_internal(id: &str) -> bool {
    id.ends_with("@internal")
}

/// Whether a router only redirects to another router for the same host,
/// i.e. its name without the provider suffix ends in `-redirect`.
pub fn is_redirect_router(id: &str) -> bool {
    let name = id.split_once('@').map_or(id, |(name, _)| name);
    name.ends_with("-redirect")
}

/// Lift HTTP routers into the typed records the reconciler consumes.
///
/// A router is left out when its rule carries no host, when it has no
/// service, when `skip` says so, or when TLS routers are required and it has
/// no certificate resolver.
pub(crate) fn surface_routes(
    routers: &ConfigMap,
    require_tls_routers: bool,
    skip: fn(&str) -> bool,
) -> Vec<DiscoveredRoute> {
    routers
        .iter()
        .filter(|(id, _)| !skip(id))
        .filter_map(|(id, router)| {
            let rule = router
                .get("rule")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let host = extract_host(rule);
            if host.is_empty() {
                return None;
            }

            let service_id = router
                .get("service")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if service_id.is_empty() {
                return None;
            }

            let tls = router.get("tls");
            if require_tls_routers {
                let resolver = tls
                    .and_then(|t| t.get("certResolver"))
                    .and_then(Value::as_str);
                if !matches!(resolver, Some(r) if !r.is_empty()) {
                    tracing::debug!(router = %id, "Skipping router without certificate resolver");
                    return None;
                }
            }

            Some(DiscoveredRoute {
                upstream_id: id.clone(),
                host,
                service_id: service_id.to_string(),
                entrypoints: string_list(router.get("entryPoints")),
                tls_domains: tls_domains(tls),
                priority: router.get("priority").and_then(Value::as_i64),
                rule: rule.to_string(),
            })
        })
        .collect()
}

/// Lift HTTP services into the typed records the service watcher consumes.
pub(crate) fn surface_services(
    services: &ConfigMap,
    skip: fn(&str) -> bool,
) -> Vec<DiscoveredService> {
    services
        .iter()
        .filter(|(id, _)| !skip(id))
        .filter_map(|(id, service)| {
            let fields = service.as_object()?;
            let (service_type, config) = fields.iter().find(|(_, v)| v.is_object())?;
            Some(DiscoveredService {
                upstream_id: id.clone(),
                service_type: service_type.clone(),
                config: config.clone(),
            })
        })
        .collect()
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn tls_domains(tls: Option<&Value>) -> Vec<String> {
    let Some(domains) = tls.and_then(|t| t.get("domains")).and_then(Value::as_array) else {
        return Vec::new();
    };
    let mut names = Vec::new();
    for domain in domains {
        if let Some(main) = domain.get("main").and_then(Value::as_str) {
            names.push(main.to_string());
        }
        names.extend(string_list(domain.get("sans")));
    }
    names
}
