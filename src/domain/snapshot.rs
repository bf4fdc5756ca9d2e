//! Fetched upstream state.
//!
//! Collections are kept as open JSON maps so plugin-defined fields survive a
//! fetch/publish round trip unchanged. Only the pieces the reconcilers need
//! (`routes`, `services`) are lifted into typed records.

use crate::domain::SourceType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Insertion-ordered JSON object.
pub type ConfigMap = Map<String, Value>;

/// Routers, services and middlewares of one protocol plane. Absent or `null`
/// collections decode as empty maps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProtocolSection {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub routers: ConfigMap,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub services: ConfigMap,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub middlewares: ConfigMap,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<ConfigMap, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<ConfigMap>::deserialize(deserializer)?.unwrap_or_default())
}

impl ProtocolSection {
    pub fn is_empty(&self) -> bool {
        self.routers.is_empty() && self.services.is_empty() && self.middlewares.is_empty()
    }

    /// Object form with empty collections left out, or `None` when nothing remains.
    pub fn to_pruned_map(&self) -> Option<ConfigMap> {
        let mut section = ConfigMap::new();
        let collections = [
            ("routers", &self.routers),
            ("services", &self.services),
            ("middlewares", &self.middlewares),
        ];
        for (key, collection) in collections {
            if !collection.is_empty() {
                section.insert(key.to_string(), Value::Object(collection.clone()));
            }
        }
        if section.is_empty() {
            None
        } else {
            Some(section)
        }
    }
}

/// Informational data reported by the upstream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub proxy_version: Option<String>,
    #[serde(default)]
    pub entrypoints: Vec<Value>,
    pub overview: Option<Value>,
}

/// An HTTP router surfaced for reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredRoute {
    pub upstream_id: String,
    pub host: String,
    pub service_id: String,
    pub entrypoints: Vec<String>,
    pub tls_domains: Vec<String>,
    pub priority: Option<i64>,
    pub rule: String,
}

/// An upstream service surfaced for the service watcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredService {
    pub upstream_id: String,
    /// First configuration key, e.g. `loadBalancer` or `weighted`
    pub service_type: String,
    pub config: Value,
}

/// One complete view of the upstream at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingSnapshot {
    pub source_type: SourceType,
    pub http: ProtocolSection,
    pub tcp: ProtocolSection,
    pub udp: ProtocolSection,
    pub tls: ConfigMap,
    /// Top-level keys the upstream published that have no dedicated field
    pub extra: ConfigMap,
    pub metadata: SnapshotMetadata,
    pub routes: Vec<DiscoveredRoute>,
    pub services: Vec<DiscoveredService>,
    pub fetched_at: DateTime<Utc>,
}

impl RoutingSnapshot {
    pub fn empty(source_type: SourceType) -> Self {
        Self {
            source_type,
            http: ProtocolSection::default(),
            tcp: ProtocolSection::default(),
            udp: ProtocolSection::default(),
            tls: ConfigMap::new(),
            extra: ConfigMap::new(),
            metadata: SnapshotMetadata::default(),
            routes: Vec::new(),
            services: Vec::new(),
            fetched_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_absent_collections_decode_as_empty() {
        let section: ProtocolSection =
            serde_json::from_value(json!({"routers": {"a": {}}, "services": null})).unwrap();
        assert_eq!(section.routers.len(), 1);
        assert!(section.services.is_empty());
        assert!(section.middlewares.is_empty());
    }

    #[test]
    fn test_pruned_map_drops_empty_collections() {
        let mut section = ProtocolSection::default();
        assert!(section.to_pruned_map().is_none());

        section
            .routers
            .insert("dns".to_string(), json!({"service": "dns"}));
        let pruned = section.to_pruned_map().unwrap();
        assert_eq!(pruned.keys().collect::<Vec<_>>(), vec!["routers"]);
    }

    #[test]
    fn test_unknown_router_fields_survive() {
        let raw = json!({"routers": {"r": {"rule": "Host(`a`)", "x-plugin": {"deep": [1, 2]}}}});
        let section: ProtocolSection = serde_json::from_value(raw.clone()).unwrap();
        let back = serde_json::to_value(&section).unwrap();
        assert_eq!(back["routers"], raw["routers"]);
    }
}
