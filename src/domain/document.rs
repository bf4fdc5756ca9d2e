//! The dynamic configuration document handed to the proxy.

use crate::domain::snapshot::{ConfigMap, ProtocolSection};
use serde::{Deserialize, Serialize};

/// `{http:{routers,services,middlewares}, tcp?, udp?, tls?}`
///
/// `http` always carries all three collections. The optional sections are
/// omitted entirely when empty since strict validators reject empty blocks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProxyDocument {
    pub http: ProtocolSection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp: Option<ConfigMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub udp: Option<ConfigMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<ConfigMap>,
    #[serde(flatten)]
    pub extra: ConfigMap,
}

impl ProxyDocument {
    pub fn to_json_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_document_shape() {
        let doc = ProxyDocument::default();
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value, json!({"http": {"routers": {}, "services": {}, "middlewares": {}}}));
    }
}
