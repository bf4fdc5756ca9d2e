//! Global mutual-TLS and security settings (singleton rows) and the narrow
//! view of the certificate authority the merge engine consumes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Default status code returned by the whitelist plugin when a client
/// certificate does not match any rule.
pub const DEFAULT_MTLS_REJECT_CODE: i64 = 403;

/// Global defaults for the mTLS whitelist middleware.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MtlsSettings {
    pub enabled: bool,
    pub ca_cert_path: Option<String>,
    pub rules: Vec<Value>,
    pub request_headers: BTreeMap<String, String>,
    pub reject_message: Option<String>,
    pub reject_code: i64,
    pub refresh_interval: Option<String>,
    pub external_data: Option<Value>,
}

impl Default for MtlsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            ca_cert_path: None,
            rules: Vec::new(),
            request_headers: BTreeMap::new(),
            reject_message: None,
            reject_code: DEFAULT_MTLS_REJECT_CODE,
            refresh_interval: None,
            external_data: None,
        }
    }
}

/// Global TLS hardening and secure response header settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecuritySettings {
    pub tls_hardening_enabled: bool,
    pub secure_headers_enabled: bool,
    /// Response header name -> value; empty values are not emitted
    pub secure_headers: BTreeMap<String, String>,
}

impl SecuritySettings {
    /// Secure headers with a non-empty value
    pub fn effective_secure_headers(&self) -> BTreeMap<String, String> {
        self.secure_headers
            .iter()
            .filter(|(name, value)| !name.trim().is_empty() && !value.trim().is_empty())
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }
}

/// What the certificate authority exposes to the merge engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaConfig {
    pub enabled: bool,
    pub has_ca: bool,
    pub ca_cert_path: String,
}

impl CaConfig {
    /// mTLS can only be emitted when the CA is enabled and its certificate exists
    pub fn is_usable(&self) -> bool {
        self.enabled && self.has_ca && !self.ca_cert_path.is_empty()
    }
}
