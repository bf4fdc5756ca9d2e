//! Definitions the merge engine injects into the document: the mTLS
//! whitelist plugin, header middlewares and the two TLS option sets.

use crate::domain::{ConfigMap, MtlsSettings, ResourceId, ResourceMtls};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Plugin key of the client-certificate whitelist middleware.
pub const WHITELIST_PLUGIN: &str = "mtlswhitelist";

/// TLS options applied to hardened routers.
pub const TLS_HARDENED_OPTIONS: &str = "tls-hardened";

/// TLS options requiring a client certificate signed by the local CA.
pub const MTLS_OPTIONS: &str = "mtls-verify";

/// Shared secure response headers middleware.
pub const SECURE_HEADERS_MIDDLEWARE: &str = "secure-headers";

const MIN_TLS_VERSION: &str = "VersionTLS12";

const HARDENED_CIPHER_SUITES: &[&str] = &[
    "TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384",
    "TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384",
    "TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305",
    "TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305",
    "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256",
    "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256",
];

pub fn whitelist_middleware_name(id: &ResourceId) -> String {
    format!("mtls-whitelist-{}", id)
}

pub fn custom_headers_middleware_name(id: &ResourceId) -> String {
    format!("custom-headers-{}", id)
}

/// Whitelist plugin configuration for one resource.
///
/// Per-resource rules replace the global rules; per-resource request headers
/// are layered over the global ones. Scalars fall back to the global value.
pub fn whitelist_middleware(global: &MtlsSettings, resource: &ResourceMtls) -> Value {
    let rules = resource
        .rules
        .clone()
        .unwrap_or_else(|| global.rules.clone());

    let mut request_headers = global.request_headers.clone();
    if let Some(overrides) = &resource.request_headers {
        request_headers.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    let mut config = ConfigMap::new();
    config.insert("rules".to_string(), Value::Array(rules));
    if !request_headers.is_empty() {
        config.insert("requestHeaders".to_string(), json!(request_headers));
    }
    let reject_message = resource.reject_message.as_ref();
    if let Some(message) = reject_message.or(global.reject_message.as_ref()) {
        config.insert("rejectMessage".to_string(), Value::String(message.clone()));
    }
    let reject_code = resource.reject_code.unwrap_or(global.reject_code);
    config.insert("rejectCode".to_string(), json!(reject_code));
    let refresh_interval = resource.refresh_interval.as_ref();
    if let Some(interval) = refresh_interval.or(global.refresh_interval.as_ref()) {
        config.insert("refreshInterval".to_string(), Value::String(interval.clone()));
    }
    let external_data = resource.external_data.as_ref();
    if let Some(data) = external_data.or(global.external_data.as_ref()) {
        config.insert("externalData".to_string(), data.clone());
    }

    json!({ "plugin": { WHITELIST_PLUGIN: config } })
}

pub fn secure_headers_middleware(headers: &BTreeMap<String, String>) -> Value {
    json!({ "headers": { "customResponseHeaders": headers } })
}

pub fn custom_headers_middleware(headers: &BTreeMap<String, String>) -> Value {
    json!({ "headers": { "customRequestHeaders": headers } })
}

pub fn tls_hardened_options() -> Value {
    json!({
        "minVersion": MIN_TLS_VERSION,
        "sniStrict": true,
        "cipherSuites": HARDENED_CIPHER_SUITES,
    })
}

pub fn mtls_options(ca_cert_path: &str) -> Value {
    json!({
        "minVersion": MIN_TLS_VERSION,
        "sniStrict": true,
        "clientAuth": {
            "caFiles": [ca_cert_path],
            "clientAuthType": "RequireAndVerifyClientCert",
        },
    })
}

/// `ours` followed by the router's existing chain, first occurrence of each
/// name kept.
pub fn prefix_chain(ours: &[String], existing: Option<&Value>) -> Vec<Value> {
    let existing = existing
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let mut seen = std::collections::HashSet::new();
    let mut chain = Vec::with_capacity(ours.len() + existing.len());
    let names = ours
        .iter()
        .map(String::as_str)
        .chain(existing.iter().filter_map(Value::as_str));
    for name in names {
        if seen.insert(name.to_string()) {
            chain.push(Value::String(name.to_string()));
        }
    }
    chain
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whitelist_merges_global_and_resource() {
        let global = MtlsSettings {
            enabled: true,
            rules: vec![json!({"type": "allowAll"})],
            request_headers: BTreeMap::from([
                ("X-Client-CN".to_string(), "[[.Cert.Subject.CommonName]]".to_string()),
                ("X-Org".to_string(), "global".to_string()),
            ]),
            reject_message: Some("denied".to_string()),
            ..Default::default()
        };
        let resource = ResourceMtls {
            enabled: true,
            request_headers: Some(BTreeMap::from([("X-Org".to_string(), "team".to_string())])),
            reject_code: Some(401),
            ..Default::default()
        };

        let middleware = whitelist_middleware(&global, &resource);
        let config = &middleware["plugin"][WHITELIST_PLUGIN];
        assert_eq!(config["rules"], json!([{"type": "allowAll"}]));
        assert_eq!(config["requestHeaders"]["X-Org"], "team");
        assert_eq!(config["requestHeaders"]["X-Client-CN"], "[[.Cert.Subject.CommonName]]");
        assert_eq!(config["rejectMessage"], "denied");
        assert_eq!(config["rejectCode"], 401);

        // the global settings are untouched by the per-resource layer
        assert_eq!(global.request_headers["X-Org"], "global");
    }

    #[test]
    fn test_resource_rules_replace_global_rules() {
        let global = MtlsSettings {
            rules: vec![json!({"type": "allowAll"})],
            ..Default::default()
        };
        let resource = ResourceMtls {
            rules: Some(vec![json!({"type": "header"})]),
            ..Default::default()
        };

        let middleware = whitelist_middleware(&global, &resource);
        assert_eq!(middleware["plugin"][WHITELIST_PLUGIN]["rules"], json!([{"type": "header"}]));
        assert_eq!(middleware["plugin"][WHITELIST_PLUGIN]["rejectCode"], 403);
    }

    #[test]
    fn test_prefix_chain_dedups() {
        let ours = vec!["auth".to_string(), "headers".to_string()];
        let existing = json!(["compress", "auth"]);
        assert_eq!(
            prefix_chain(&ours, Some(&existing)),
            vec![json!("auth"), json!("headers"), json!("compress")]
        );
        assert_eq!(prefix_chain(&ours, None).len(), 2);
    }
}
