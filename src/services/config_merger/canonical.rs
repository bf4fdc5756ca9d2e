//! Output normalization for the merged document.
//!
//! Everything here is a pure function of its input, so two merges of the
//! same snapshot and overrides serialize to the same bytes.

use crate::domain::{ConfigMap, ProtocolSection};
use crate::services::config_merger::middleware::WHITELIST_PLUGIN;
use serde_json::Value;

/// Router fields in the order the proxy itself reports them; anything else
/// follows in name order.
const ROUTER_FIELD_ORDER: &[&str] = &[
    "entryPoints",
    "middlewares",
    "service",
    "rule",
    "ruleSyntax",
    "priority",
    "tls",
    "observability",
];

/// Middleware types whose configuration holds only plain data and can be
/// key-sorted without changing meaning.
const SIMPLE_MIDDLEWARE_TYPES: &[&str] = &[
    "addPrefix",
    "basicAuth",
    "buffering",
    "chain",
    "circuitBreaker",
    "compress",
    "contentType",
    "digestAuth",
    "errors",
    "forwardAuth",
    "headers",
    "inFlightReq",
    "ipAllowList",
    "ipWhiteList",
    "passTLSClientCert",
    "rateLimit",
    "redirectRegex",
    "redirectScheme",
    "replacePath",
    "replacePathRegex",
    "retry",
    "stripPrefix",
    "stripPrefixRegex",
];

/// Copy of `map` with keys in ascending order.
pub fn sorted(map: &ConfigMap) -> ConfigMap {
    let mut entries: Vec<(&String, &Value)> = map.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries
        .into_iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Router with its fields in canonical order.
pub fn canonical_router(router: &Value) -> Value {
    let Some(fields) = router.as_object() else {
        return router.clone();
    };

    let mut ordered = ConfigMap::new();
    for key in ROUTER_FIELD_ORDER {
        if let Some(value) = fields.get(*key) {
            ordered.insert(key.to_string(), value.clone());
        }
    }
    for (key, value) in sorted(fields) {
        if !ordered.contains_key(&key) {
            ordered.insert(key, value);
        }
    }
    Value::Object(ordered)
}

/// Key-sort a middleware whose single type is a known plain-data type.
/// Plugins and unknown types are returned unchanged.
pub fn canonical_middleware(middleware: &Value) -> Value {
    match middleware.as_object() {
        Some(fields) if fields.len() == 1 => {
            let simple = fields
                .keys()
                .next()
                .is_some_and(|t| SIMPLE_MIDDLEWARE_TYPES.contains(&t.as_str()));
            if simple {
                deep_sorted(middleware)
            } else {
                middleware.clone()
            }
        }
        _ => middleware.clone(),
    }
}

fn deep_sorted(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            sorted(map)
                .into_iter()
                .map(|(k, v)| (k, deep_sorted(&v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(deep_sorted).collect()),
        other => other.clone(),
    }
}

/// Force the whitelist plugin's `requestHeaders` to a string-to-string map.
///
/// A string is parsed as a JSON object when possible; any other shape
/// becomes an empty map. Non-string values are stringified.
pub fn sanitize_whitelist_headers(middleware: &mut Value) {
    let Some(config) = middleware
        .get_mut("plugin")
        .and_then(|plugin| plugin.get_mut(WHITELIST_PLUGIN))
        .and_then(Value::as_object_mut)
    else {
        return;
    };
    let Some(headers) = config.get_mut("requestHeaders") else {
        return;
    };

    let parsed = match headers.take() {
        Value::Object(map) => map,
        Value::String(raw) => match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => map,
            _ => ConfigMap::new(),
        },
        _ => ConfigMap::new(),
    };

    let normalized: ConfigMap = sorted(&parsed)
        .into_iter()
        .filter(|(name, _)| !name.trim().is_empty())
        .map(|(name, value)| {
            let value = match value {
                Value::String(s) => s,
                Value::Null => String::new(),
                other => other.to_string(),
            };
            (name, Value::String(value))
        })
        .collect();
    *headers = Value::Object(normalized);
}

/// Sort every collection and normalize routers and middlewares.
pub fn canonicalize_section(section: &ProtocolSection) -> ProtocolSection {
    let routers = sorted(&section.routers)
        .into_iter()
        .map(|(name, router)| (name, canonical_router(&router)))
        .collect();

    let middlewares = sorted(&section.middlewares)
        .into_iter()
        .map(|(name, middleware)| {
            let mut middleware = canonical_middleware(&middleware);
            sanitize_whitelist_headers(&mut middleware);
            (name, middleware)
        })
        .collect();

    ProtocolSection {
        routers,
        services: sorted(&section.services),
        middlewares,
    }
}

/// TLS section with empty blocks removed and option names sorted, or `None`
/// when nothing remains.
pub fn prune_tls(tls: &ConfigMap) -> Option<ConfigMap> {
    let mut pruned = ConfigMap::new();
    for (key, value) in sorted(tls) {
        let value = match value {
            Value::Object(map) if map.is_empty() => continue,
            Value::Array(items) if items.is_empty() => continue,
            Value::Null => continue,
            Value::Object(map) if key == "options" => Value::Object(sorted(&map)),
            other => other,
        };
        pruned.insert(key, value);
    }
    if pruned.is_empty() {
        None
    } else {
        Some(pruned)
    }
}
