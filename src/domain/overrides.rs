//! Administrator-managed override records read by the merge engine.

use crate::domain::Resource;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A custom middleware definition. `config` is opaque: it is emitted as
/// `{ <type>: <config> }` in the produced document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MiddlewareRecord {
    pub id: String,
    pub name: String,
    pub middleware_type: String,
    pub config: Value,
    pub source_type: Option<String>,
}

impl MiddlewareRecord {
    /// Dynamic-configuration form of this middleware
    pub fn to_definition(&self) -> Value {
        let mut definition = Map::new();
        definition.insert(self.middleware_type.clone(), self.config.clone());
        Value::Object(definition)
    }
}

/// A service record, either administrator-created (`source_type` unset) or
/// mirrored from the upstream by the service watcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub id: String,
    pub name: String,
    pub service_type: String,
    pub config: Value,
    pub status: String,
    pub source_type: Option<String>,
}

impl ServiceRecord {
    /// Dynamic-configuration form of this service
    pub fn to_definition(&self) -> Value {
        let mut definition = Map::new();
        definition.insert(self.service_type.clone(), self.config.clone());
        Value::Object(definition)
    }
}

/// A middleware assigned to a resource with its ordering priority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignedMiddleware {
    pub middleware: MiddlewareRecord,
    pub priority: i64,
}

/// Everything stored about one active resource that the merge engine applies.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceOverrides {
    pub resource: Resource,
    pub middlewares: Vec<AssignedMiddleware>,
    pub custom_service: Option<ServiceRecord>,
}

impl ResourceOverrides {
    /// Assigned middlewares by descending priority; equal priorities keep
    /// their input order
    pub fn middlewares_by_priority(&self) -> Vec<&AssignedMiddleware> {
        let mut ordered: Vec<&AssignedMiddleware> = self.middlewares.iter().collect();
        ordered.sort_by(|a, b| b.priority.cmp(&a.priority));
        ordered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SourceType;
    use serde_json::json;

    fn middleware(id: &str, priority: i64) -> AssignedMiddleware {
        AssignedMiddleware {
            middleware: MiddlewareRecord {
                id: id.to_string(),
                name: id.to_string(),
                middleware_type: "headers".to_string(),
                config: json!({}),
                source_type: None,
            },
            priority,
        }
    }

    #[test]
    fn test_definition_wraps_config_under_type() {
        let record = MiddlewareRecord {
            id: "strip".to_string(),
            name: "strip".to_string(),
            middleware_type: "stripPrefix".to_string(),
            config: json!({"prefixes": ["/api"]}),
            source_type: None,
        };
        assert_eq!(record.to_definition(), json!({"stripPrefix": {"prefixes": ["/api"]}}));
    }

    #[test]
    fn test_priority_sort_is_descending_and_stable() {
        let overrides = ResourceOverrides {
            resource: Resource::discovered("app", "app.example.com", "app", SourceType::Aggregator),
            middlewares: vec![middleware("a", 100), middleware("b", 200), middleware("c", 100)],
            custom_service: None,
        };
        let ids: Vec<&str> = overrides
            .middlewares_by_priority()
            .iter()
            .map(|m| m.middleware.id.as_str())
            .collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }
}
