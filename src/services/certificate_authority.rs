//! Certificate authority view consumed by the merge engine.

use crate::domain::CaConfig;
use crate::errors::Result;
use crate::storage::SettingsRepository;
use async_trait::async_trait;

/// Source of the CA state that gates mTLS emission.
#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    async fn get_config(&self) -> Result<CaConfig>;
}

/// Reads the CA location from the global mTLS settings and checks that the
/// certificate file exists.
#[derive(Debug, Clone)]
pub struct StoredCertificateAuthority {
    settings: SettingsRepository,
}

impl StoredCertificateAuthority {
    pub fn new(settings: SettingsRepository) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl CertificateAuthority for StoredCertificateAuthority {
    async fn get_config(&self) -> Result<CaConfig> {
        let mtls = self.settings.get_mtls().await?;
        let ca_cert_path = mtls.ca_cert_path.unwrap_or_default();

        let has_ca = if ca_cert_path.is_empty() {
            false
        } else {
            match tokio::fs::try_exists(&ca_cert_path).await {
                Ok(exists) => exists,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        path = %ca_cert_path,
                        "Unable to check CA certificate"
                    );
                    false
                }
            }
        };

        Ok(CaConfig {
            enabled: mtls.enabled,
            has_ca,
            ca_cert_path,
        })
    }
}

/// Fixed CA state.
#[derive(Debug, Clone, Default)]
pub struct StaticCertificateAuthority(pub CaConfig);

#[async_trait]
impl CertificateAuthority for StaticCertificateAuthority {
    async fn get_config(&self) -> Result<CaConfig> {
        Ok(self.0.clone())
    }
}
