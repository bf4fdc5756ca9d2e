//! Discovered routes ("resources") and their administrator overrides.

use crate::domain::ResourceId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Router priority the upstream assigns when nothing else is configured.
/// A resource at this priority leaves the upstream router untouched.
pub const DEFAULT_ROUTER_PRIORITY: i64 = 100;

/// Entrypoint given to newly discovered resources.
pub const DEFAULT_ENTRYPOINT: &str = "websecure";

/// Placeholder for org/site attribution the upstream does not report.
pub const UNKNOWN_ATTRIBUTION: &str = "unknown";

/// Lifecycle state of a resource. Reconciliation never deletes rows, it only
/// flips them to `Disabled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    Active,
    Disabled,
}

impl ResourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceStatus::Active => "active",
            ResourceStatus::Disabled => "disabled",
        }
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ResourceStatus::Active),
            "disabled" => Ok(ResourceStatus::Disabled),
            other => Err(format!("unknown resource status '{}'", other)),
        }
    }
}

/// Which upstream authority a record was discovered through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// An aggregator API publishing one complete configuration document
    Aggregator,
    /// The proxy's own management API
    Native,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Aggregator => "aggregator",
            SourceType::Native => "native",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "aggregator" => Ok(SourceType::Aggregator),
            "native" => Ok(SourceType::Native),
            other => Err(format!(
                "unknown data source '{}' (expected 'aggregator' or 'native')",
                other
            )),
        }
    }
}

/// Per-resource mutual TLS whitelist overrides. Unset fields fall back to the
/// global defaults in `MtlsSettings`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceMtls {
    pub enabled: bool,
    pub rules: Option<Vec<Value>>,
    pub request_headers: Option<BTreeMap<String, String>>,
    pub reject_message: Option<String>,
    pub reject_code: Option<i64>,
    pub refresh_interval: Option<String>,
    pub external_data: Option<Value>,
}

/// A discovered route with its stable identity and local overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub upstream_id: Option<String>,
    pub host: String,
    pub service_id: String,
    pub org_id: String,
    pub site_id: String,
    pub status: ResourceStatus,
    pub source_type: SourceType,
    pub entrypoints: Vec<String>,
    pub tls_domains: Vec<String>,
    pub tcp_enabled: bool,
    pub tcp_entrypoints: Vec<String>,
    pub tcp_sni_rule: Option<String>,
    pub router_priority: i64,
    pub router_priority_manual: bool,
    pub custom_headers: BTreeMap<String, String>,
    pub mtls: ResourceMtls,
    pub tls_hardening_enabled: bool,
    pub secure_headers_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Resource {
    /// A freshly observed route with source defaults applied.
    pub fn discovered(
        upstream_id: impl Into<String>,
        host: impl Into<String>,
        service_id: impl Into<String>,
        source_type: SourceType,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ResourceId::new(),
            upstream_id: Some(upstream_id.into()),
            host: host.into(),
            service_id: service_id.into(),
            org_id: UNKNOWN_ATTRIBUTION.to_string(),
            site_id: UNKNOWN_ATTRIBUTION.to_string(),
            status: ResourceStatus::Active,
            source_type,
            entrypoints: vec![DEFAULT_ENTRYPOINT.to_string()],
            tls_domains: Vec::new(),
            tcp_enabled: false,
            tcp_entrypoints: Vec::new(),
            tcp_sni_rule: None,
            router_priority: DEFAULT_ROUTER_PRIORITY,
            router_priority_manual: false,
            custom_headers: BTreeMap::new(),
            mtls: ResourceMtls::default(),
            tls_hardening_enabled: false,
            secure_headers_enabled: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ResourceStatus::Active
    }

    /// Custom request headers with empty names dropped
    pub fn effective_custom_headers(&self) -> BTreeMap<String, String> {
        self.custom_headers
            .iter()
            .filter(|(name, _)| !name.trim().is_empty())
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }
}

/// Split a stored comma list, dropping blanks.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Join a list for storage.
pub fn join_list(items: &[String]) -> String {
    items
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(",")
}
