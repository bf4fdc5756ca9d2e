//! Resource Repository
//!
//! Persistence for discovered routes. The reconciler drives the lookup,
//! insert and update functions inside its own per-resource transaction, so
//! those take a connection rather than the pool.

use crate::db_span;
use crate::domain::resource::{join_list, split_list};
use crate::domain::{Resource, ResourceId, ResourceMtls, ResourceStatus, SourceType};
use crate::errors::{Result, RouteplaneError};
use crate::storage::DbPool;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, SqliteConnection};
use std::collections::{BTreeMap, HashSet};
use tracing::{instrument, Instrument};

const RESOURCE_COLUMNS: &str =
    "id, upstream_id, host, service_id, org_id, site_id, status, source_type, \
     entrypoints, tls_domains, tcp_enabled, tcp_entrypoints, tcp_sni_rule, router_priority, \
     router_priority_manual, custom_headers, mtls_enabled, mtls_rules, mtls_request_headers, \
     mtls_reject_message, mtls_reject_code, mtls_refresh_interval, mtls_external_data, \
     tls_hardening_enabled, secure_headers_enabled, created_at, updated_at";

/// Internal database row structure for resources.
#[derive(Debug, Clone, FromRow)]
struct ResourceRow {
    pub id: String,
    pub upstream_id: Option<String>,
    pub host: String,
    pub service_id: String,
    pub org_id: String,
    pub site_id: String,
    pub status: String,
    pub source_type: String,
    pub entrypoints: String,
    pub tls_domains: String,
    pub tcp_enabled: bool,
    pub tcp_entrypoints: String,
    pub tcp_sni_rule: Option<String>,
    pub router_priority: i64,
    pub router_priority_manual: bool,
    pub custom_headers: String,
    pub mtls_enabled: bool,
    pub mtls_rules: Option<String>,
    pub mtls_request_headers: Option<String>,
    pub mtls_reject_message: Option<String>,
    pub mtls_reject_code: Option<i64>,
    pub mtls_refresh_interval: Option<String>,
    pub mtls_external_data: Option<String>,
    pub tls_hardening_enabled: bool,
    pub secure_headers_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<ResourceRow> for Resource {
    type Error = RouteplaneError;

    fn try_from(row: ResourceRow) -> Result<Self> {
        let status: ResourceStatus = row.status.parse().map_err(RouteplaneError::internal)?;
        let source_type: SourceType =
            row.source_type.parse().map_err(RouteplaneError::internal)?;

        let custom_headers = parse_string_map(&row.custom_headers)
            .ok_or_else(|| RouteplaneError::internal("custom_headers is not a JSON object"))?;

        let rules = match non_blank(row.mtls_rules) {
            Some(raw) => Some(serde_json::from_str::<Vec<Value>>(&raw).map_err(|e| {
                RouteplaneError::internal(format!("mtls_rules is not a JSON array: {}", e))
            })?),
            None => None,
        };

        let external_data = match non_blank(row.mtls_external_data) {
            Some(raw) => Some(serde_json::from_str::<Value>(&raw).map_err(|e| {
                RouteplaneError::internal(format!("mtls_external_data is not valid JSON: {}", e))
            })?),
            None => None,
        };

        Ok(Self {
            id: ResourceId::from_string(row.id),
            upstream_id: non_blank(row.upstream_id),
            host: row.host,
            service_id: row.service_id,
            org_id: row.org_id,
            site_id: row.site_id,
            status,
            source_type,
            entrypoints: split_list(&row.entrypoints),
            tls_domains: split_list(&row.tls_domains),
            tcp_enabled: row.tcp_enabled,
            tcp_entrypoints: split_list(&row.tcp_entrypoints),
            tcp_sni_rule: non_blank(row.tcp_sni_rule),
            router_priority: row.router_priority,
            router_priority_manual: row.router_priority_manual,
            custom_headers,
            mtls: ResourceMtls {
                enabled: row.mtls_enabled,
                rules,
                request_headers: non_blank(row.mtls_request_headers)
                    .and_then(|raw| parse_string_map(&raw)),
                reject_message: non_blank(row.mtls_reject_message),
                reject_code: row.mtls_reject_code,
                refresh_interval: non_blank(row.mtls_refresh_interval),
                external_data,
            },
            tls_hardening_enabled: row.tls_hardening_enabled,
            secure_headers_enabled: row.secure_headers_enabled,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Parse a JSON object into a string map, stringifying non-string values.
/// An empty string reads as an empty map.
pub(crate) fn parse_string_map(raw: &str) -> Option<BTreeMap<String, String>> {
    if raw.trim().is_empty() {
        return Some(BTreeMap::new());
    }
    match serde_json::from_str::<Value>(raw).ok()? {
        Value::Object(map) => Some(
            map.into_iter()
                .map(|(k, v)| {
                    let v = match v {
                        Value::String(s) => s,
                        other => other.to_string(),
                    };
                    (k, v)
                })
                .collect(),
        ),
        _ => None,
    }
}

fn decode_row(row: &SqliteRow) -> Result<Resource> {
    let row = ResourceRow::from_row(row)
        .map_err(|e| RouteplaneError::database(e, "Failed to scan resource row"))?;
    Resource::try_from(row)
}

/// Decode rows one by one; a row that fails is logged and skipped.
fn decode_rows(rows: &[SqliteRow]) -> Vec<Resource> {
    rows.iter()
        .filter_map(|row| match decode_row(row) {
            Ok(resource) => Some(resource),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping undecodable resource row");
                None
            }
        })
        .collect()
}

/// Fields refreshed from the upstream on every observation.
#[derive(Debug, Clone)]
pub struct DiscoveredUpdate<'a> {
    pub upstream_id: &'a str,
    pub host: &'a str,
    pub service_id: &'a str,
    pub source_type: SourceType,
    pub entrypoints: &'a [String],
    pub tls_domains: &'a [String],
    /// Applied only when the stored priority is not administrator-set
    pub priority: Option<i64>,
}

/// Repository for resource operations.
#[derive(Debug, Clone)]
pub struct ResourceRepository {
    pool: DbPool,
}

impl ResourceRepository {
    /// Creates a new repository with the given database pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Get a resource by ID.
    #[instrument(skip(self), fields(id = %id), name = "db_get_resource_by_id")]
    pub async fn get_by_id(&self, id: &ResourceId) -> Result<Resource> {
        let row = sqlx::query(&format!("SELECT {} FROM resources WHERE id = $1", RESOURCE_COLUMNS))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, id = %id, "Failed to get resource by ID");
                RouteplaneError::database(e, format!("Failed to get resource by ID: {}", id))
            })?
            .ok_or_else(|| RouteplaneError::not_found("Resource", id.as_str()))?;

        decode_row(&row)
    }

    /// List active resources ordered by host. Undecodable rows are skipped.
    #[instrument(skip(self), name = "db_list_active_resources")]
    pub async fn list_active(&self) -> Result<Vec<Resource>> {
        self.list_by_status(ResourceStatus::Active).await
    }

    /// List resources with the given status ordered by host.
    #[instrument(skip(self), fields(status = %status), name = "db_list_resources_by_status")]
    pub async fn list_by_status(&self, status: ResourceStatus) -> Result<Vec<Resource>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM resources WHERE status = $1 ORDER BY host ASC, id ASC",
            RESOURCE_COLUMNS
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, status = %status, "Failed to list resources");
            RouteplaneError::database(e, format!("Failed to list {} resources", status))
        })?;

        Ok(decode_rows(&rows))
    }

    /// Active resource currently tracked under an upstream id.
    pub async fn find_active_by_upstream_id(
        conn: &mut SqliteConnection,
        upstream_id: &str,
    ) -> Result<Option<Resource>> {
        Self::find_one(
            conn,
            "WHERE status = 'active' AND upstream_id = $1 ORDER BY created_at ASC LIMIT 1",
            &[upstream_id],
        )
        .await
    }

    /// Active resource for a host.
    pub async fn find_active_by_host(
        conn: &mut SqliteConnection,
        host: &str,
    ) -> Result<Option<Resource>> {
        Self::find_one(conn, "WHERE status = 'active' AND host = $1 LIMIT 1", &[host]).await
    }

    /// Row written before upstream ids were tracked: its id is the upstream
    /// id, or it has no upstream id and the same host. Active rows first.
    pub async fn find_legacy(
        conn: &mut SqliteConnection,
        upstream_id: &str,
        host: &str,
    ) -> Result<Option<Resource>> {
        Self::find_one(
            conn,
            "WHERE id = $1 OR ((upstream_id IS NULL OR upstream_id = '') AND host = $2) \
             ORDER BY CASE status WHEN 'active' THEN 0 ELSE 1 END, created_at ASC LIMIT 1",
            &[upstream_id, host],
        )
        .await
    }

    /// Most recently updated disabled resource for an upstream id.
    pub async fn find_disabled_by_upstream_id(
        conn: &mut SqliteConnection,
        upstream_id: &str,
    ) -> Result<Option<Resource>> {
        Self::find_one(
            conn,
            "WHERE status = 'disabled' AND upstream_id = $1 ORDER BY updated_at DESC LIMIT 1",
            &[upstream_id],
        )
        .await
    }

    /// Most recently updated disabled resource for a host.
    pub async fn find_disabled_by_host(
        conn: &mut SqliteConnection,
        host: &str,
    ) -> Result<Option<Resource>> {
        Self::find_one(
            conn,
            "WHERE status = 'disabled' AND host = $1 ORDER BY updated_at DESC LIMIT 1",
            &[host],
        )
        .await
    }

    async fn find_one(
        conn: &mut SqliteConnection,
        predicate: &str,
        binds: &[&str],
    ) -> Result<Option<Resource>> {
        let sql = format!("SELECT {} FROM resources {}", RESOURCE_COLUMNS, predicate);
        let mut query = sqlx::query(&sql);
        for value in binds {
            query = query.bind(*value);
        }

        let row = query
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| RouteplaneError::database(e, "Failed to look up resource"))?;

        row.as_ref().map(decode_row).transpose()
    }

    /// Insert a resource.
    pub async fn insert(conn: &mut SqliteConnection, resource: &Resource) -> Result<()> {
        sqlx::query(
            "INSERT INTO resources (id, upstream_id, host, service_id, org_id, site_id, status, \
             source_type, entrypoints, tls_domains, tcp_enabled, tcp_entrypoints, tcp_sni_rule, \
             router_priority, router_priority_manual, custom_headers, mtls_enabled, \
             tls_hardening_enabled, secure_headers_enabled, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
             $17, $18, $19, $20, $21)",
        )
        .bind(resource.id.as_str())
        .bind(resource.upstream_id.as_deref())
        .bind(&resource.host)
        .bind(&resource.service_id)
        .bind(&resource.org_id)
        .bind(&resource.site_id)
        .bind(resource.status.as_str())
        .bind(resource.source_type.as_str())
        .bind(join_list(&resource.entrypoints))
        .bind(join_list(&resource.tls_domains))
        .bind(resource.tcp_enabled)
        .bind(join_list(&resource.tcp_entrypoints))
        .bind(resource.tcp_sni_rule.as_deref())
        .bind(resource.router_priority)
        .bind(resource.router_priority_manual)
        .bind(encode_map(&resource.custom_headers)?)
        .bind(resource.mtls.enabled)
        .bind(resource.tls_hardening_enabled)
        .bind(resource.secure_headers_enabled)
        .bind(resource.created_at)
        .bind(resource.updated_at)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, host = %resource.host, "Failed to insert resource");
            RouteplaneError::database(
                e,
                format!("Failed to insert resource for host '{}'", resource.host),
            )
        })?;

        Ok(())
    }

    /// Refresh upstream-owned fields and mark the resource active.
    pub async fn apply_discovered(
        conn: &mut SqliteConnection,
        id: &ResourceId,
        update: &DiscoveredUpdate<'_>,
    ) -> Result<()> {
        let entrypoints = (!update.entrypoints.is_empty()).then(|| join_list(update.entrypoints));

        let result = sqlx::query(
            "UPDATE resources SET upstream_id = $1, host = $2, service_id = $3, source_type = $4, \
             entrypoints = COALESCE($5, entrypoints), tls_domains = $6, status = 'active', \
             router_priority = CASE WHEN router_priority_manual = 0 AND $7 IS NOT NULL \
             THEN $7 ELSE router_priority END, updated_at = $8 WHERE id = $9",
        )
        .bind(update.upstream_id)
        .bind(update.host)
        .bind(update.service_id)
        .bind(update.source_type.as_str())
        .bind(entrypoints)
        .bind(join_list(update.tls_domains))
        .bind(update.priority)
        .bind(Utc::now())
        .bind(id.as_str())
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, id = %id, host = %update.host, "Failed to update resource");
            RouteplaneError::database(e, format!("Failed to update resource '{}'", id))
        })?;

        if result.rows_affected() != 1 {
            return Err(RouteplaneError::not_found("Resource", id.as_str()));
        }
        Ok(())
    }

    /// Disable every active resource whose id is not in `touched`.
    /// Returns the number of resources disabled.
    pub async fn disable_untouched(&self, touched: &HashSet<ResourceId>) -> Result<u64> {
        async {
            let active: Vec<String> =
                sqlx::query_scalar("SELECT id FROM resources WHERE status = 'active'")
                    .fetch_all(&self.pool)
                    .await
                    .map_err(|e| {
                        RouteplaneError::database(e, "Failed to list active resource ids")
                    })?;

            let now = Utc::now();
            let mut disabled = 0;
            for id in active.into_iter().map(ResourceId::from_string) {
                if touched.contains(&id) {
                    continue;
                }
                let result = sqlx::query(
                    "UPDATE resources SET status = 'disabled', updated_at = $1 \
                     WHERE id = $2 AND status = 'active'",
                )
                .bind(now)
                .bind(id.as_str())
                .execute(&self.pool)
                .await;

                match result {
                    Ok(done) => {
                        disabled += done.rows_affected();
                        tracing::info!(id = %id, "Disabled resource no longer reported upstream");
                    }
                    Err(e) => tracing::error!(error = %e, id = %id, "Failed to disable resource"),
                }
            }
            Ok::<u64, RouteplaneError>(disabled)
        }
        .instrument(db_span!("disable_untouched_resources", touched = touched.len()))
        .await
    }

    /// Persist the administrator-owned fields of a resource.
    #[instrument(
        skip(self, resource),
        fields(id = %resource.id),
        name = "db_save_resource_overrides"
    )]
    pub async fn save_overrides(&self, resource: &Resource) -> Result<()> {
        let mtls = &resource.mtls;
        let rules = mtls.rules.as_ref().map(serde_json::to_string).transpose()?;
        let request_headers = mtls.request_headers.as_ref().map(encode_map).transpose()?;
        let external_data = mtls
            .external_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(
            "UPDATE resources SET entrypoints = $1, tcp_enabled = $2, tcp_entrypoints = $3, \
             tcp_sni_rule = $4, router_priority = $5, router_priority_manual = $6, \
             custom_headers = $7, mtls_enabled = $8, mtls_rules = $9, mtls_request_headers = $10, \
             mtls_reject_message = $11, mtls_reject_code = $12, mtls_refresh_interval = $13, \
             mtls_external_data = $14, tls_hardening_enabled = $15, secure_headers_enabled = $16, \
             org_id = $17, site_id = $18, updated_at = $19 WHERE id = $20",
        )
        .bind(join_list(&resource.entrypoints))
        .bind(resource.tcp_enabled)
        .bind(join_list(&resource.tcp_entrypoints))
        .bind(resource.tcp_sni_rule.as_deref())
        .bind(resource.router_priority)
        .bind(resource.router_priority_manual)
        .bind(encode_map(&resource.custom_headers)?)
        .bind(mtls.enabled)
        .bind(rules)
        .bind(request_headers)
        .bind(mtls.reject_message.as_deref())
        .bind(mtls.reject_code)
        .bind(mtls.refresh_interval.as_deref())
        .bind(external_data)
        .bind(resource.tls_hardening_enabled)
        .bind(resource.secure_headers_enabled)
        .bind(&resource.org_id)
        .bind(&resource.site_id)
        .bind(Utc::now())
        .bind(resource.id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, id = %resource.id, "Failed to save resource overrides");
            RouteplaneError::database(
                e,
                format!("Failed to save overrides for resource '{}'", resource.id),
            )
        })?;

        if result.rows_affected() != 1 {
            return Err(RouteplaneError::not_found("Resource", resource.id.as_str()));
        }
        Ok(())
    }

    /// Count resources by status.
    #[instrument(skip(self), fields(status = %status), name = "db_count_resources")]
    pub async fn count_by_status(&self, status: ResourceStatus) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM resources WHERE status = $1")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| RouteplaneError::database(e, "Failed to count resources"))
    }
}

fn encode_map(map: &BTreeMap<String, String>) -> Result<String> {
    Ok(serde_json::to_string(map)?)
}
