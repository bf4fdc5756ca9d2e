//! Settings repository for the singleton mTLS and security rows.
//!
//! Both tables hold at most one row with `id = 1`. A missing row reads as
//! defaults so a fresh database produces a valid document.

use crate::domain::{MtlsSettings, SecuritySettings, DEFAULT_MTLS_REJECT_CODE};
use crate::errors::{Result, RouteplaneError};
use crate::storage::repositories::resource::parse_string_map;
use crate::storage::DbPool;
use chrono::Utc;
use serde_json::Value;
use sqlx::FromRow;
use tracing::instrument;

#[derive(Debug, Clone, FromRow)]
struct MtlsRow {
    pub enabled: bool,
    pub ca_cert_path: Option<String>,
    pub rules: Option<String>,
    pub request_headers: Option<String>,
    pub reject_message: Option<String>,
    pub reject_code: Option<i64>,
    pub refresh_interval: Option<String>,
    pub external_data: Option<String>,
}

impl From<MtlsRow> for MtlsSettings {
    fn from(row: MtlsRow) -> Self {
        // Malformed JSON columns fall back to their defaults
        let rules = row
            .rules
            .as_deref()
            .filter(|raw| !raw.trim().is_empty())
            .and_then(|raw| match serde_json::from_str::<Vec<Value>>(raw) {
                Ok(rules) => Some(rules),
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring malformed mTLS rules");
                    None
                }
            })
            .unwrap_or_default();

        Self {
            enabled: row.enabled,
            ca_cert_path: row.ca_cert_path.filter(|p| !p.trim().is_empty()),
            rules,
            request_headers: row
                .request_headers
                .as_deref()
                .and_then(parse_string_map)
                .unwrap_or_default(),
            reject_message: row.reject_message.filter(|m| !m.is_empty()),
            reject_code: row.reject_code.unwrap_or(DEFAULT_MTLS_REJECT_CODE),
            refresh_interval: row.refresh_interval.filter(|r| !r.is_empty()),
            external_data: row
                .external_data
                .as_deref()
                .filter(|raw| !raw.trim().is_empty())
                .and_then(|raw| serde_json::from_str(raw).ok()),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
struct SecurityRow {
    pub tls_hardening_enabled: bool,
    pub secure_headers_enabled: bool,
    pub secure_headers: String,
}

impl From<SecurityRow> for SecuritySettings {
    fn from(row: SecurityRow) -> Self {
        let secure_headers = parse_string_map(&row.secure_headers).unwrap_or_else(|| {
            tracing::warn!("Ignoring malformed secure headers");
            Default::default()
        });

        Self {
            tls_hardening_enabled: row.tls_hardening_enabled,
            secure_headers_enabled: row.secure_headers_enabled,
            secure_headers,
        }
    }
}

/// Repository for global settings
#[derive(Debug, Clone)]
pub struct SettingsRepository {
    pool: DbPool,
}

impl SettingsRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Global mTLS settings, or defaults when none are stored.
    #[instrument(skip(self), name = "db_get_mtls_settings")]
    pub async fn get_mtls(&self) -> Result<MtlsSettings> {
        let row = sqlx::query_as::<_, MtlsRow>(
            "SELECT enabled, ca_cert_path, rules, request_headers, reject_message, reject_code, \
             refresh_interval, external_data FROM mtls_config WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to load mTLS settings");
            RouteplaneError::database(e, "Failed to load mTLS settings")
        })?;

        Ok(row.map(MtlsSettings::from).unwrap_or_default())
    }

    /// Global security settings, or defaults when none are stored.
    #[instrument(skip(self), name = "db_get_security_settings")]
    pub async fn get_security(&self) -> Result<SecuritySettings> {
        let row = sqlx::query_as::<_, SecurityRow>(
            "SELECT tls_hardening_enabled, secure_headers_enabled, secure_headers \
             FROM security_config WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to load security settings");
            RouteplaneError::database(e, "Failed to load security settings")
        })?;

        Ok(row.map(SecuritySettings::from).unwrap_or_default())
    }

    #[instrument(skip(self, settings), name = "db_save_mtls_settings")]
    pub async fn save_mtls(&self, settings: &MtlsSettings) -> Result<()> {
        let external_data = settings
            .external_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            "INSERT INTO mtls_config (id, enabled, ca_cert_path, rules, request_headers, \
             reject_message, reject_code, refresh_interval, external_data, updated_at) \
             VALUES (1, $1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT(id) DO UPDATE SET enabled = excluded.enabled, \
             ca_cert_path = excluded.ca_cert_path, \
             rules = excluded.rules, request_headers = excluded.request_headers, \
             reject_message = excluded.reject_message, reject_code = excluded.reject_code, \
             refresh_interval = excluded.refresh_interval, external_data = excluded.external_data, \
             updated_at = excluded.updated_at",
        )
        .bind(settings.enabled)
        .bind(settings.ca_cert_path.as_deref())
        .bind(serde_json::to_string(&settings.rules)?)
        .bind(serde_json::to_string(&settings.request_headers)?)
        .bind(settings.reject_message.as_deref())
        .bind(settings.reject_code)
        .bind(settings.refresh_interval.as_deref())
        .bind(external_data)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to save mTLS settings");
            RouteplaneError::database(e, "Failed to save mTLS settings")
        })?;

        Ok(())
    }

    #[instrument(skip(self, settings), name = "db_save_security_settings")]
    pub async fn save_security(&self, settings: &SecuritySettings) -> Result<()> {
        sqlx::query(
            "INSERT INTO security_config \
             (id, tls_hardening_enabled, secure_headers_enabled, secure_headers, updated_at) \
             VALUES (1, $1, $2, $3, $4) \
             ON CONFLICT(id) DO UPDATE SET tls_hardening_enabled = excluded.tls_hardening_enabled, \
             secure_headers_enabled = excluded.secure_headers_enabled, \
             secure_headers = excluded.secure_headers, updated_at = excluded.updated_at",
        )
        .bind(settings.tls_hardening_enabled)
        .bind(settings.secure_headers_enabled)
        .bind(serde_json::to_string(&settings.secure_headers)?)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to save security settings");
            RouteplaneError::database(e, "Failed to save security settings")
        })?;

        Ok(())
    }
}
