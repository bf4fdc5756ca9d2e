//! # Config Merge Engine
//!
//! Produces the document the proxy polls: the upstream snapshot with every
//! active resource's overrides applied. For each resource whose host matches
//! an upstream router, the router's middleware chain is prefixed with, in
//! order:
//!
//! 1. the mTLS whitelist middleware, when mTLS is active for the resource
//! 2. the `tls-hardened` options reference (only without mTLS)
//! 3. the shared secure headers middleware
//! 4. the resource's custom request headers middleware
//! 5. assigned middlewares by descending priority
//!
//! Routers for redirects (`*-redirect`) are never modified. Results are
//! cached for a TTL of their own; when the upstream cannot be reached the
//! last document is served even if expired.

pub mod canonical;
pub mod middleware;

use crate::domain::{
    CaConfig, ConfigMap, MtlsSettings, ProtocolSection, ProxyDocument, ResourceOverrides,
    RoutingSnapshot, SecuritySettings, ServiceRecord, DEFAULT_ROUTER_PRIORITY,
};
use crate::errors::Result;
use crate::observability::MetricsRecorder;
use crate::rules::{extract_host, extract_sni};
use crate::services::certificate_authority::CertificateAuthority;
use crate::services::fetch_coordinator::SnapshotSource;
use crate::storage::{
    DbPool, MiddlewareRepository, ResourceRepository, ServiceRepository, SettingsRepository,
};
use crate::upstream::is_redirect_router;
use canonical::{canonicalize_section, prune_tls, sorted};
use middleware::{
    custom_headers_middleware, custom_headers_middleware_name, mtls_options, prefix_chain,
    secure_headers_middleware, tls_hardened_options, whitelist_middleware,
    whitelist_middleware_name, MTLS_OPTIONS, SECURE_HEADERS_MIDDLEWARE, TLS_HARDENED_OPTIONS,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Default lifetime of a merged document.
pub const DEFAULT_CONFIG_CACHE_TTL: Duration = Duration::from_secs(5);

/// Everything read from storage for one merge.
#[derive(Debug, Clone, Default)]
pub struct MergeInputs {
    pub overrides: Vec<ResourceOverrides>,
    pub mtls: MtlsSettings,
    pub security: SecuritySettings,
    pub ca: CaConfig,
}

#[derive(Debug, Clone)]
struct CachedDocument {
    document: Arc<ProxyDocument>,
    expires_at: Instant,
}

/// Merges the upstream snapshot with stored overrides.
pub struct ConfigMerger {
    source: Arc<dyn SnapshotSource>,
    resources: ResourceRepository,
    middlewares: MiddlewareRepository,
    services: ServiceRepository,
    settings: SettingsRepository,
    ca: Arc<dyn CertificateAuthority>,
    ttl: Duration,
    cache: RwLock<Option<CachedDocument>>,
    metrics: MetricsRecorder,
}

impl ConfigMerger {
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        pool: DbPool,
        ca: Arc<dyn CertificateAuthority>,
        ttl: Duration,
    ) -> Self {
        Self {
            source,
            resources: ResourceRepository::new(pool.clone()),
            middlewares: MiddlewareRepository::new(pool.clone()),
            services: ServiceRepository::new(pool.clone()),
            settings: SettingsRepository::new(pool),
            ca,
            ttl,
            cache: RwLock::new(None),
            metrics: MetricsRecorder::new(),
        }
    }

    /// The merged document, from cache while it is fresh.
    #[instrument(skip(self), name = "get_merged_config")]
    pub async fn get_merged_config(&self) -> Result<Arc<ProxyDocument>> {
        if let Some(cached) = self.cache.read().await.as_ref() {
            if Instant::now() < cached.expires_at {
                self.metrics.record_merge("hit");
                return Ok(Arc::clone(&cached.document));
            }
        }

        let snapshot = match self.source.snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                if let Some(stale) = self.cache.read().await.as_ref() {
                    warn!(error = %e, "Upstream unavailable; serving previous configuration");
                    self.metrics.record_merge("stale");
                    return Ok(Arc::clone(&stale.document));
                }
                return Err(e);
            }
        };

        let inputs = self.load_inputs().await?;
        let document = Arc::new(merge(&snapshot, &inputs));
        self.metrics.record_merge("miss");

        *self.cache.write().await = Some(CachedDocument {
            document: Arc::clone(&document),
            expires_at: Instant::now() + self.ttl,
        });

        Ok(document)
    }

    /// Expire the cached document and let the next call reach the upstream.
    /// The expired document remains available as a fallback.
    pub async fn invalidate_cache(&self) {
        if let Some(cached) = self.cache.write().await.as_mut() {
            cached.expires_at = Instant::now();
        }
        self.source.invalidate().await;
        debug!("Merged configuration cache invalidated");
    }

    async fn load_inputs(&self) -> Result<MergeInputs> {
        let (resources, mut assignments, mut services, mtls, security) = tokio::try_join!(
            self.resources.list_active(),
            self.middlewares.list_assignments(),
            self.services.list_resource_services(),
            self.settings.get_mtls(),
            self.settings.get_security(),
        )?;

        let ca = self.ca.get_config().await.unwrap_or_else(|e| {
            warn!(error = %e, "Certificate authority unavailable; mTLS disabled for this merge");
            CaConfig::default()
        });

        let overrides = resources
            .into_iter()
            .map(|resource| ResourceOverrides {
                middlewares: assignments.remove(&resource.id).unwrap_or_default(),
                custom_service: services.remove(&resource.id),
                resource,
            })
            .collect();

        Ok(MergeInputs {
            overrides,
            mtls,
            security,
            ca,
        })
    }
}

impl std::fmt::Debug for ConfigMerger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigMerger")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

/// Apply `inputs` to `snapshot`. Pure: equal inputs give equal output.
pub fn merge(snapshot: &RoutingSnapshot, inputs: &MergeInputs) -> ProxyDocument {
    let mut http = snapshot.http.clone();
    let mut tcp = snapshot.tcp.clone();
    let mut tls = snapshot.tls.clone();

    let routers_by_host = index_routers(&http.routers, extract_host);
    let tcp_routers_by_host = index_routers(&tcp.routers, extract_sni);

    for overrides in &inputs.overrides {
        let resource = &overrides.resource;

        if resource.tcp_enabled {
            apply_tcp(&mut tcp, overrides, tcp_routers_by_host.get(resource.host.as_str()));
        }

        let Some(router_ids) = routers_by_host.get(resource.host.as_str()) else {
            debug!(
                id = %resource.id,
                host = %resource.host,
                "No upstream router for resource host"
            );
            continue;
        };

        let mut chain: Vec<String> = Vec::new();
        let mut tls_options: Option<&str> = None;

        let mtls_active = resource.mtls.enabled && inputs.mtls.enabled && inputs.ca.is_usable();
        if resource.mtls.enabled && !mtls_active {
            warn!(
                id = %resource.id,
                host = %resource.host,
                "mTLS requested but not available; skipping"
            );
        }

        if mtls_active {
            let name = whitelist_middleware_name(&resource.id);
            let whitelist = whitelist_middleware(&inputs.mtls, &resource.mtls);
            http.middlewares.insert(name.clone(), whitelist);
            chain.push(name);
            ensure_tls_option(&mut tls, MTLS_OPTIONS, || mtls_options(&inputs.ca.ca_cert_path));
            tls_options = Some(MTLS_OPTIONS);
        } else if !resource.mtls.enabled
            && resource.tls_hardening_enabled
            && inputs.security.tls_hardening_enabled
        {
            ensure_tls_option(&mut tls, TLS_HARDENED_OPTIONS, tls_hardened_options);
            tls_options = Some(TLS_HARDENED_OPTIONS);
        }

        if resource.secure_headers_enabled && inputs.security.secure_headers_enabled {
            let headers = inputs.security.effective_secure_headers();
            if !headers.is_empty() {
                http.middlewares.insert(
                    SECURE_HEADERS_MIDDLEWARE.to_string(),
                    secure_headers_middleware(&headers),
                );
                chain.push(SECURE_HEADERS_MIDDLEWARE.to_string());
            }
        }

        let custom_headers = resource.effective_custom_headers();
        if !custom_headers.is_empty() {
            let name = custom_headers_middleware_name(&resource.id);
            http.middlewares
                .insert(name.clone(), custom_headers_middleware(&custom_headers));
            chain.push(name);
        }

        for assigned in overrides.middlewares_by_priority() {
            let record = &assigned.middleware;
            http.middlewares
                .insert(record.name.clone(), record.to_definition());
            chain.push(record.name.clone());
        }

        let service = overrides
            .custom_service
            .as_ref()
            .filter(|service| usable_service(service, &resource.host));
        if let Some(service) = service {
            if service.source_type.is_none() || !http.services.contains_key(&service.name) {
                http.services
                    .insert(service.name.clone(), service.to_definition());
            }
        }

        for router_id in router_ids {
            let Some(Value::Object(router)) = http.routers.get_mut(router_id) else {
                continue;
            };

            if !chain.is_empty() {
                let merged = prefix_chain(&chain, router.get("middlewares"));
                router.insert("middlewares".to_string(), Value::Array(merged));
            }

            if let Some(options) = tls_options {
                let tls_block = router
                    .entry("tls")
                    .or_insert_with(|| Value::Object(ConfigMap::new()));
                if let Some(tls_block) = tls_block.as_object_mut() {
                    tls_block.insert("options".to_string(), Value::String(options.to_string()));
                }
            }

            if resource.router_priority != DEFAULT_ROUTER_PRIORITY {
                router.insert("priority".to_string(), Value::from(resource.router_priority));
            }

            if let Some(service) = service {
                router.insert("service".to_string(), Value::String(service.name.clone()));
            }
        }
    }

    let document = ProxyDocument {
        http: canonicalize_section(&http),
        tcp: canonicalize_section(&tcp).to_pruned_map(),
        udp: canonicalize_section(&snapshot.udp).to_pruned_map(),
        tls: prune_tls(&tls),
        extra: sorted(&snapshot.extra),
    };

    info!(
        routers = document.http.routers.len(),
        middlewares = document.http.middlewares.len(),
        resources = inputs.overrides.len(),
        "Merged proxy configuration"
    );

    document
}

/// Router ids by extracted host, redirect routers left out.
fn index_routers(routers: &ConfigMap, extract: fn(&str) -> String) -> HashMap<String, Vec<String>> {
    let mut index: HashMap<String, Vec<String>> = HashMap::new();
    for (id, router) in routers {
        if is_redirect_router(id) {
            continue;
        }
        let rule = router
            .get("rule")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let host = extract(rule);
        if !host.is_empty() {
            index.entry(host).or_default().push(id.clone());
        }
    }
    index
}

fn apply_tcp(
    tcp: &mut ProtocolSection,
    overrides: &ResourceOverrides,
    router_ids: Option<&Vec<String>>,
) {
    let resource = &overrides.resource;
    let Some(router_ids) = router_ids else {
        debug!(
            id = %resource.id,
            host = %resource.host,
            "No upstream TCP router for resource host"
        );
        return;
    };

    for router_id in router_ids {
        let Some(Value::Object(router)) = tcp.routers.get_mut(router_id) else {
            continue;
        };
        if !resource.tcp_entrypoints.is_empty() {
            let entrypoints = resource
                .tcp_entrypoints
                .iter()
                .cloned()
                .map(Value::String)
                .collect();
            router.insert("entryPoints".to_string(), Value::Array(entrypoints));
        }
        let sni_rule = resource.tcp_sni_rule.as_deref();
        if let Some(rule) = sni_rule.filter(|r| !r.trim().is_empty()) {
            router.insert("rule".to_string(), Value::String(rule.to_string()));
        }
    }
}

fn ensure_tls_option(tls: &mut ConfigMap, name: &str, definition: impl FnOnce() -> Value) {
    let options = tls
        .entry("options")
        .or_insert_with(|| Value::Object(ConfigMap::new()));
    if !options.is_object() {
        *options = Value::Object(ConfigMap::new());
    }
    if let Some(options) = options.as_object_mut() {
        if !options.contains_key(name) {
            options.insert(name.to_string(), definition());
        }
    }
}

fn usable_service(service: &ServiceRecord, host: &str) -> bool {
    if service.status != "active" {
        warn!(
            service = %service.name,
            host = %host,
            "Assigned service is disabled; keeping upstream service"
        );
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AssignedMiddleware, MiddlewareRecord, Resource, SourceType};
    use serde_json::json;

    fn snapshot() -> RoutingSnapshot {
        let mut snapshot = RoutingSnapshot::empty(SourceType::Aggregator);
        snapshot.http.routers = json!({
            "app@docker": {
                "rule": "Host(`app.example.com`)",
                "service": "app@docker",
                "entryPoints": ["websecure"],
                "middlewares": ["compress@docker"],
                "tls": {"certResolver": "le"}
            },
            "app-redirect@docker": {
                "rule": "Host(`app.example.com`)",
                "service": "app@docker",
                "entryPoints": ["web"],
                "middlewares": ["to-https"]
            },
            "other@docker": {"rule": "Host(`other.example.com`)", "service": "other@docker"}
        })
        .as_object()
        .cloned()
        .unwrap();
        snapshot.http.services = json!({
            "app@docker": {"loadBalancer": {"servers": [{"url": "http://app:80"}]}}
        })
        .as_object()
        .cloned()
        .unwrap();
        snapshot
    }

    fn resource() -> Resource {
        Resource::discovered("app@docker", "app.example.com", "app@docker", SourceType::Aggregator)
    }

    fn inputs(resource: Resource) -> MergeInputs {
        MergeInputs {
            overrides: vec![ResourceOverrides {
                resource,
                middlewares: vec![],
                custom_service: None,
            }],
            ..Default::default()
        }
    }

    fn usable_ca() -> CaConfig {
        CaConfig {
            enabled: true,
            has_ca: true,
            ca_cert_path: "/certs/ca.pem".to_string(),
        }
    }

    #[test]
    fn test_resource_without_overrides_leaves_router_alone() {
        let snap = snapshot();
        let doc = merge(&snap, &inputs(resource()));
        assert_eq!(doc.http.routers["app@docker"]["middlewares"], json!(["compress@docker"]));
        assert!(doc.http.routers["app@docker"].get("priority").is_none());
        assert!(doc.tcp.is_none() && doc.udp.is_none() && doc.tls.is_none());
    }

    #[test]
    fn test_chain_order_and_dedup() {
        let mut res = resource();
        res.secure_headers_enabled = true;
        res.custom_headers
            .insert("X-Team".to_string(), "edge".to_string());

        let middleware = |name: &str, priority| AssignedMiddleware {
            middleware: MiddlewareRecord {
                id: format!("id-{}", name),
                name: name.to_string(),
                middleware_type: "compress".to_string(),
                config: json!({}),
                source_type: None,
            },
            priority,
        };

        let mut inputs = inputs(res.clone());
        inputs.overrides[0].middlewares = vec![
            middleware("low", 10),
            middleware("compress@docker", 200),
            middleware("high", 300),
        ];
        inputs.security = SecuritySettings {
            tls_hardening_enabled: false,
            secure_headers_enabled: true,
            secure_headers: [
                ("X-Frame-Options".to_string(), "DENY".to_string()),
                ("X-Empty".to_string(), String::new()),
            ]
            .into_iter()
            .collect(),
        };

        let doc = merge(&snapshot(), &inputs);
        let custom = custom_headers_middleware_name(&res.id);
        assert_eq!(
            doc.http.routers["app@docker"]["middlewares"],
            json!(["secure-headers", custom, "high", "compress@docker", "low"])
        );
        assert_eq!(
            doc.http.middlewares["secure-headers"],
            json!({"headers": {"customResponseHeaders": {"X-Frame-Options": "DENY"}}})
        );
        // redirect routers are untouched
        assert_eq!(doc.http.routers["app-redirect@docker"]["middlewares"], json!(["to-https"]));
    }

    #[test]
    fn test_mtls_excludes_tls_hardening() {
        let mut res = resource();
        res.mtls.enabled = true;
        res.tls_hardening_enabled = true;

        let mut inputs = inputs(res.clone());
        inputs.mtls = MtlsSettings {
            enabled: true,
            ..Default::default()
        };
        inputs.security.tls_hardening_enabled = true;
        inputs.ca = usable_ca();

        let doc = merge(&snapshot(), &inputs);
        let router = &doc.http.routers["app@docker"];
        assert_eq!(router["tls"]["options"], MTLS_OPTIONS);
        assert_eq!(router["tls"]["certResolver"], "le");
        assert_eq!(router["middlewares"][0], json!(whitelist_middleware_name(&res.id)));

        let tls = doc.tls.unwrap();
        assert!(tls["options"].get(MTLS_OPTIONS).is_some());
        assert!(tls["options"].get(TLS_HARDENED_OPTIONS).is_none());
        assert_eq!(tls["options"][MTLS_OPTIONS]["clientAuth"]["caFiles"], json!(["/certs/ca.pem"]));
    }

    #[test]
    fn test_unavailable_mtls_gets_no_tls_options() {
        let mut res = resource();
        res.mtls.enabled = true;
        res.tls_hardening_enabled = true;

        // no usable CA
        let mut inputs = inputs(res);
        inputs.mtls = MtlsSettings {
            enabled: true,
            ..Default::default()
        };
        inputs.security.tls_hardening_enabled = true;

        let doc = merge(&snapshot(), &inputs);
        let router = &doc.http.routers["app@docker"];
        assert!(router["tls"].get("options").is_none());
        assert_eq!(router["tls"]["certResolver"], "le");
        assert!(doc
            .http
            .middlewares
            .keys()
            .all(|k| !k.starts_with("mtls-whitelist-")));

        // global mTLS switched off
        inputs.mtls.enabled = false;
        inputs.ca = usable_ca();
        let doc = merge(&snapshot(), &inputs);
        assert!(doc.http.routers["app@docker"]["tls"].get("options").is_none());
        let no_hardened = doc
            .tls
            .as_ref()
            .map_or(true, |tls| tls["options"].get(TLS_HARDENED_OPTIONS).is_none());
        assert!(no_hardened);
    }

    #[test]
    fn test_priority_applied_only_when_not_default() {
        let mut res = resource();
        res.router_priority = 500;
        let doc = merge(&snapshot(), &inputs(res));
        assert_eq!(doc.http.routers["app@docker"]["priority"], 500);
    }

    #[test]
    fn test_custom_service_override() {
        let mut inputs = inputs(resource());
        inputs.overrides[0].custom_service = Some(ServiceRecord {
            id: "svc-1".to_string(),
            name: "canary".to_string(),
            service_type: "weighted".to_string(),
            config: json!({"services": [{"name": "app@docker", "weight": 1}]}),
            status: "active".to_string(),
            source_type: None,
        });

        let doc = merge(&snapshot(), &inputs);
        assert_eq!(doc.http.routers["app@docker"]["service"], "canary");
        assert_eq!(doc.http.services["canary"]["weighted"]["services"][0]["weight"], 1);
    }

    #[test]
    fn test_tcp_overrides_by_sni() {
        let mut snap = snapshot();
        snap.tcp.routers = json!({
            "db@docker": {
                "rule": "HostSNI(`app.example.com`)",
                "service": "db@docker",
                "entryPoints": ["tcp"]
            }
        })
        .as_object()
        .cloned()
        .unwrap();

        let mut res = resource();
        res.tcp_enabled = true;
        res.tcp_entrypoints = vec!["postgres".to_string()];
        res.tcp_sni_rule = Some("HostSNI(`db.example.com`)".to_string());

        let doc = merge(&snap, &inputs(res));
        let tcp = doc.tcp.unwrap();
        assert_eq!(tcp["routers"]["db@docker"]["entryPoints"], json!(["postgres"]));
        assert_eq!(tcp["routers"]["db@docker"]["rule"], "HostSNI(`db.example.com`)");
    }

    #[test]
    fn test_merge_is_byte_stable() {
        let mut res = resource();
        res.custom_headers.insert("B".to_string(), "2".to_string());
        res.custom_headers.insert("A".to_string(), "1".to_string());
        let inputs = inputs(res);

        let first = merge(&snapshot(), &inputs).to_json_bytes().unwrap();
        let second = merge(&snapshot(), &inputs).to_json_bytes().unwrap();
        assert_eq!(first, second);
    }
}
