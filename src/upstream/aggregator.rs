//! Fetcher for an aggregator API publishing one complete document at
//! `{base}/traefik-config`.

use super::{
    get_json, is_internal, is_system_router, surface_routes, surface_services, Credentials,
    UpstreamFetcher,
};
use crate::config::UpstreamConfig;
use crate::domain::{ConfigMap, ProtocolSection, RoutingSnapshot, SnapshotMetadata, SourceType};
use crate::errors::{Result, RouteplaneError};
use crate::fetch_span;
use crate::observability::MetricsRecorder;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, Instrument};

/// Router ids the aggregator generates for its own UI and API.
const AGGREGATOR_SYSTEM_PREFIXES: &[&str] =
    &["api-router", "next-router", "ws-router", "internal-", "traefik-dashboard"];

const CONFIG_PATH: &str = "/traefik-config";

#[derive(Debug, Deserialize)]
struct AggregatorDocument {
    #[serde(default)]
    http: Option<ProtocolSection>,
    #[serde(default)]
    tcp: Option<ProtocolSection>,
    #[serde(default)]
    udp: Option<ProtocolSection>,
    #[serde(default)]
    tls: Option<ConfigMap>,
    #[serde(flatten)]
    extra: ConfigMap,
}

/// Whether a router id belongs to the aggregator or the proxy itself.
pub fn is_aggregator_system_router(id: &str) -> bool {
    is_internal(id)
        || is_system_router(id)
        || AGGREGATOR_SYSTEM_PREFIXES
            .iter()
            .any(|prefix| id.starts_with(prefix))
}

#[derive(Debug)]
pub struct AggregatorFetcher {
    client: Client,
    config_url: String,
    credentials: Option<Credentials>,
    require_tls_routers: bool,
    metrics: MetricsRecorder,
}

impl AggregatorFetcher {
    pub fn new(client: Client, config: &UpstreamConfig) -> Self {
        Self {
            client,
            config_url: format!("{}{}", config.url.trim_end_matches('/'), CONFIG_PATH),
            credentials: Credentials::from_config(config),
            require_tls_routers: config.require_tls_routers,
            metrics: MetricsRecorder::new(),
        }
    }

    pub fn config_url(&self) -> &str {
        &self.config_url
    }

    async fn fetch_document(&self) -> Result<RoutingSnapshot> {
        let body = get_json(&self.client, &self.config_url, self.credentials.as_ref()).await?;
        let document = decode_document(&self.config_url, body)?;

        let http = document.http.unwrap_or_default();
        let routes = surface_routes(
            &http.routers,
            self.require_tls_routers,
            is_aggregator_system_router,
        );
        let services = surface_services(&http.services, is_internal);

        debug!(
            routers = http.routers.len(),
            services = http.services.len(),
            middlewares = http.middlewares.len(),
            surfaced_routes = routes.len(),
            "Decoded aggregator document"
        );

        Ok(RoutingSnapshot {
            http,
            tcp: document.tcp.unwrap_or_default(),
            udp: document.udp.unwrap_or_default(),
            tls: document.tls.unwrap_or_default(),
            extra: document.extra,
            metadata: SnapshotMetadata::default(),
            routes,
            services,
            ..RoutingSnapshot::empty(SourceType::Aggregator)
        })
    }
}

fn decode_document(url: &str, body: Value) -> Result<AggregatorDocument> {
    if !body.is_object() {
        return Err(RouteplaneError::decode(url, "configuration document is not a JSON object"));
    }
    serde_json::from_value(body).map_err(|e| RouteplaneError::decode(url, e.to_string()))
}

#[async_trait]
impl UpstreamFetcher for AggregatorFetcher {
    async fn fetch(&self) -> Result<RoutingSnapshot> {
        let started = Instant::now();
        let result = self
            .fetch_document()
            .instrument(fetch_span!(SourceType::Aggregator, self.config_url))
            .await;

        self.metrics.record_upstream_fetch(
            SourceType::Aggregator.as_str(),
            result.is_ok(),
            started.elapsed().as_secs_f64(),
        );
        if let Err(e) = &result {
            tracing::warn!(error = %e, url = %self.config_url, "Aggregator fetch failed");
        }
        result
    }

    fn source_type(&self) -> SourceType {
        SourceType::Aggregator
    }
}
