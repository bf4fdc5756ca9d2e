//! Fetcher for the proxy's own management API.
//!
//! One fetch pass requests all eleven endpoints concurrently under a single
//! deadline and waits for every one of them before classifying the results.
//! Failures on critical endpoints (HTTP routers, version) abort the pass with
//! one error naming every failing endpoint; other failures leave their
//! collection empty.

use super::decode::{decode_named_value, strip_runtime_fields};
use super::{
    get_json, is_internal, is_system_router, surface_routes, surface_services, Credentials,
    UpstreamFetcher,
};
use crate::config::UpstreamConfig;
use crate::domain::{ConfigMap, ProtocolSection, RoutingSnapshot, SourceType};
use crate::errors::{Result, RouteplaneError};
use crate::fetch_span;
use crate::observability::MetricsRecorder;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Plane {
    Http,
    Tcp,
    Udp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Collection {
    Routers,
    Services,
    Middlewares,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndpointKind {
    Items(Plane, Collection),
    Overview,
    Version,
    Entrypoints,
}

#[derive(Debug)]
struct Endpoint {
    path: &'static str,
    kind: EndpointKind,
    critical: bool,
}

static ENDPOINTS: [Endpoint; 11] = [
    Endpoint {
        path: "/api/http/routers",
        kind: EndpointKind::Items(Plane::Http, Collection::Routers),
        critical: true,
    },
    Endpoint {
        path: "/api/http/services",
        kind: EndpointKind::Items(Plane::Http, Collection::Services),
        critical: false,
    },
    Endpoint {
        path: "/api/http/middlewares",
        kind: EndpointKind::Items(Plane::Http, Collection::Middlewares),
        critical: false,
    },
    Endpoint {
        path: "/api/tcp/routers",
        kind: EndpointKind::Items(Plane::Tcp, Collection::Routers),
        critical: false,
    },
    Endpoint {
        path: "/api/tcp/services",
        kind: EndpointKind::Items(Plane::Tcp, Collection::Services),
        critical: false,
    },
    Endpoint {
        path: "/api/tcp/middlewares",
        kind: EndpointKind::Items(Plane::Tcp, Collection::Middlewares),
        critical: false,
    },
    Endpoint {
        path: "/api/udp/routers",
        kind: EndpointKind::Items(Plane::Udp, Collection::Routers),
        critical: false,
    },
    Endpoint {
        path: "/api/udp/services",
        kind: EndpointKind::Items(Plane::Udp, Collection::Services),
        critical: false,
    },
    Endpoint {
        path: "/api/overview",
        kind: EndpointKind::Overview,
        critical: false,
    },
    Endpoint {
        path: "/api/version",
        kind: EndpointKind::Version,
        critical: true,
    },
    Endpoint {
        path: "/api/entrypoints",
        kind: EndpointKind::Entrypoints,
        critical: false,
    },
];

/// Result of one endpoint within a single fetch pass.
struct EndpointFetch {
    endpoint: &'static Endpoint,
    url: String,
    outcome: Result<Value>,
}

/// A suggested configuration change, recorded when a fallback base URL
/// answered after the configured one was unreachable. Never applied
/// automatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigSuggestion {
    pub current_url: String,
    pub suggested_url: String,
    pub reason: String,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct NativeFetcher {
    client: Client,
    base_url: String,
    fallback_urls: Vec<String>,
    credentials: Option<Credentials>,
    require_tls_routers: bool,
    deadline: Duration,
    suggestion: RwLock<Option<ConfigSuggestion>>,
    metrics: MetricsRecorder,
}

impl NativeFetcher {
    pub fn new(client: Client, config: &UpstreamConfig) -> Self {
        let base_url = normalize_base(&config.url);
        let fallback_urls = config
            .fallback_urls
            .iter()
            .map(|url| normalize_base(url))
            .filter(|url| !url.is_empty() && *url != base_url)
            .collect();

        Self {
            client,
            base_url,
            fallback_urls,
            credentials: Credentials::from_config(config),
            require_tls_routers: config.require_tls_routers,
            deadline: config.timeout(),
            suggestion: RwLock::new(None),
            metrics: MetricsRecorder::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fallback base URLs in the order they are tried
    pub fn fallback_urls(&self) -> &[String] {
        &self.fallback_urls
    }

    /// Most recent fallback suggestion, if any fetch needed one
    pub async fn last_suggestion(&self) -> Option<ConfigSuggestion> {
        self.suggestion.read().await.clone()
    }

    /// One complete pass against a base URL.
    async fn fetch_from(&self, base_url: &str) -> Result<RoutingSnapshot> {
        let requests = ENDPOINTS.iter().map(|endpoint| {
            let url = format!("{}{}", base_url, endpoint.path);
            async move {
                let outcome = get_json(&self.client, &url, self.credentials.as_ref()).await;
                EndpointFetch {
                    endpoint,
                    url,
                    outcome,
                }
            }
        });

        let results = tokio::time::timeout(self.deadline, join_all(requests))
            .await
            .map_err(|_| {
                RouteplaneError::timeout(
                    format!("native fetch from {}", base_url),
                    self.deadline.as_millis() as u64,
                )
            })?;

        self.assemble(base_url, results)
    }

    fn assemble(&self, base_url: &str, results: Vec<EndpointFetch>) -> Result<RoutingSnapshot> {
        let mut snapshot = RoutingSnapshot::empty(SourceType::Native);
        let mut critical_failures: Vec<(String, RouteplaneError)> = Vec::new();

        for EndpointFetch {
            endpoint,
            url,
            outcome,
        } in results
        {
            let applied = outcome
                .and_then(|payload| apply_payload(&mut snapshot, endpoint.kind, &url, payload));
            if let Err(error) = applied {
                self.metrics
                    .record_endpoint_failure(endpoint.path, endpoint.critical);
                if endpoint.critical {
                    critical_failures.push((endpoint.path.to_string(), error));
                } else {
                    warn!(
                        endpoint = endpoint.path,
                        error = %error,
                        "Non-critical endpoint failed, continuing with an empty collection"
                    );
                }
            }
        }

        if !critical_failures.is_empty() {
            return Err(aggregate_failures(base_url, critical_failures));
        }

        snapshot.routes = surface_routes(
            &snapshot.http.routers,
            self.require_tls_routers,
            is_system_router,
        );
        snapshot.services = surface_services(&snapshot.http.services, is_internal);
        snapshot.fetched_at = Utc::now();

        debug!(
            http_routers = snapshot.http.routers.len(),
            tcp_routers = snapshot.tcp.routers.len(),
            udp_routers = snapshot.udp.routers.len(),
            surfaced_routes = snapshot.routes.len(),
            proxy_version = ?snapshot.metadata.proxy_version,
            "Assembled native snapshot"
        );

        Ok(snapshot)
    }

    /// Try each fallback once, in order. The first success wins and is
    /// recorded as a suggestion.
    async fn fetch_with_fallbacks(
        &self,
        primary_error: RouteplaneError,
    ) -> Result<RoutingSnapshot> {
        for fallback in &self.fallback_urls {
            debug!(fallback = %fallback, "Trying fallback base URL");
            let attempt = self
                .fetch_from(fallback)
                .instrument(fetch_span!(SourceType::Native, fallback))
                .await;
            match attempt {
                Ok(snapshot) => {
                    let suggestion = ConfigSuggestion {
                        current_url: self.base_url.clone(),
                        suggested_url: fallback.clone(),
                        reason: primary_error.to_string(),
                        detected_at: Utc::now(),
                    };
                    warn!(
                        current_url = %suggestion.current_url,
                        suggested_url = %suggestion.suggested_url,
                        reason = %suggestion.reason,
                        "Configured upstream URL is unreachable; consider updating ROUTEPLANE_UPSTREAM_URL"
                    );
                    *self.suggestion.write().await = Some(suggestion);
                    self.metrics.record_fallback_used();
                    return Ok(snapshot);
                }
                Err(e) => debug!(fallback = %fallback, error = %e, "Fallback base URL failed"),
            }
        }
        Err(primary_error)
    }
}

fn normalize_base(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn apply_payload(
    snapshot: &mut RoutingSnapshot,
    kind: EndpointKind,
    url: &str,
    payload: Value,
) -> Result<()> {
    match kind {
        EndpointKind::Items(plane, collection) => {
            let mut items =
                decode_named_value(payload).map_err(|e| RouteplaneError::decode(url, e))?;
            items.retain(|name, _| !is_internal(name));
            strip_runtime_fields(&mut items, collection != Collection::Routers);
            *collection_mut(section_mut(snapshot, plane), collection) = items;
        }
        EndpointKind::Version => {
            let version = payload
                .get("Version")
                .or_else(|| payload.get("version"))
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    RouteplaneError::decode(url, "version payload has no Version field")
                })?;
            snapshot.metadata.proxy_version = Some(version.to_string());
        }
        EndpointKind::Overview => snapshot.metadata.overview = Some(payload),
        EndpointKind::Entrypoints => {
            snapshot.metadata.entrypoints = match payload {
                Value::Array(items) => items,
                Value::Object(map) => map.into_iter().map(|(_, v)| v).collect(),
                Value::Null => Vec::new(),
                _ => return Err(RouteplaneError::decode(url, "entrypoints payload is not a list")),
            };
        }
    }
    Ok(())
}

fn section_mut(snapshot: &mut RoutingSnapshot, plane: Plane) -> &mut ProtocolSection {
    match plane {
        Plane::Http => &mut snapshot.http,
        Plane::Tcp => &mut snapshot.tcp,
        Plane::Udp => &mut snapshot.udp,
    }
}

fn collection_mut(section: &mut ProtocolSection, collection: Collection) -> &mut ConfigMap {
    match collection {
        Collection::Routers => &mut section.routers,
        Collection::Services => &mut section.services,
        Collection::Middlewares => &mut section.middlewares,
    }
}

/// One error for the whole pass. Transport-level only when every critical
/// endpoint failed at the transport level, so that fallbacks are tried only
/// when the base URL itself is unreachable.
fn aggregate_failures(base_url: &str, failures: Vec<(String, RouteplaneError)>) -> RouteplaneError {
    let all_transport = failures.iter().all(|(_, e)| e.is_transport());
    let failures: Vec<(String, String)> = failures
        .into_iter()
        .map(|(endpoint, error)| (endpoint, error.to_string()))
        .collect();

    if all_transport {
        let message = failures
            .iter()
            .map(|(endpoint, error)| format!("{}: {}", endpoint, error))
            .collect::<Vec<_>>()
            .join("; ");
        RouteplaneError::transport(base_url, message)
    } else {
        RouteplaneError::CriticalEndpoints { failures }
    }
}

#[async_trait]
impl UpstreamFetcher for NativeFetcher {
    async fn fetch(&self) -> Result<RoutingSnapshot> {
        let started = Instant::now();
        let primary = self
            .fetch_from(&self.base_url)
            .instrument(fetch_span!(SourceType::Native, self.base_url))
            .await;

        let result = match primary {
            Ok(snapshot) => Ok(snapshot),
            Err(e) if e.is_transport() && !self.fallback_urls.is_empty() => {
                info!(
                    base_url = %self.base_url,
                    error = %e,
                    fallbacks = self.fallback_urls.len(),
                    "Primary upstream unreachable, trying fallback URLs"
                );
                self.fetch_with_fallbacks(e).await
            }
            Err(e) => Err(e),
        };

        self.metrics.record_upstream_fetch(
            SourceType::Native.as_str(),
            result.is_ok(),
            started.elapsed().as_secs_f64(),
        );
        if let Err(e) = &result {
            warn!(error = %e, base_url = %self.base_url, "Native fetch failed");
        }
        result
    }

    fn source_type(&self) -> SourceType {
        SourceType::Native
    }
}
