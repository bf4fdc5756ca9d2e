//! Service repository
//!
//! Two kinds of rows share the `services` table: administrator-created custom
//! services (`source_type` NULL) and services mirrored from the upstream by
//! the service watcher. Mirrored rows are keyed by their upstream name, and
//! custom rows are never touched by the mirroring path.

use crate::db_span;
use crate::domain::{ResourceId, ServiceRecord, SourceType};
use crate::errors::{Result, RouteplaneError};
use crate::storage::repositories::middleware::parse_config;
use crate::storage::DbPool;
use chrono::Utc;
use serde_json::Value;
use sqlx::FromRow;
use std::collections::{HashMap, HashSet};
use tracing::{instrument, Instrument};

/// Database row structure for services
#[derive(Debug, Clone, FromRow)]
struct ServiceRow {
    pub id: String,
    pub name: String,
    #[sqlx(rename = "type")]
    pub service_type: String,
    pub config: String,
    pub status: String,
    pub source_type: Option<String>,
}

impl TryFrom<ServiceRow> for ServiceRecord {
    type Error = RouteplaneError;

    fn try_from(row: ServiceRow) -> Result<Self> {
        let config = parse_config(&row.config).ok_or_else(|| {
            RouteplaneError::internal(format!("service '{}' config is not JSON", row.id))
        })?;

        Ok(Self {
            id: row.id,
            name: row.name,
            service_type: row.service_type,
            config,
            status: row.status,
            source_type: row.source_type,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
struct ResourceServiceRow {
    pub resource_id: String,
    #[sqlx(flatten)]
    pub service: ServiceRow,
}

/// Result of mirroring one upstream service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
    /// A custom service already uses this id
    SkippedCustom,
}

/// Repository for service persistence
#[derive(Debug, Clone)]
pub struct ServiceRepository {
    pool: DbPool,
}

impl ServiceRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Create an administrator-owned service.
    #[instrument(skip(self, config), fields(name = %name), name = "db_create_custom_service")]
    pub async fn create_custom(
        &self,
        name: &str,
        service_type: &str,
        config: &Value,
    ) -> Result<ServiceRecord> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO services (id, name, type, config, status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, 'active', $5, $6)",
        )
        .bind(&id)
        .bind(name)
        .bind(service_type)
        .bind(serde_json::to_string(config)?)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, name = %name, "Failed to create service");
            RouteplaneError::database(e, format!("Failed to create service '{}'", name))
        })?;

        Ok(ServiceRecord {
            id,
            name: name.to_string(),
            service_type: service_type.to_string(),
            config: config.clone(),
            status: "active".to_string(),
            source_type: None,
        })
    }

    /// Point a resource at a service, replacing any previous assignment.
    #[instrument(
        skip(self),
        fields(resource_id = %resource_id, service_id = %service_id),
        name = "db_assign_service"
    )]
    pub async fn assign_to_resource(
        &self,
        resource_id: &ResourceId,
        service_id: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO resource_services (resource_id, service_id) VALUES ($1, $2) \
             ON CONFLICT(resource_id) DO UPDATE SET service_id = excluded.service_id",
        )
        .bind(resource_id.as_str())
        .bind(service_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, resource_id = %resource_id, "Failed to assign service");
            RouteplaneError::database(
                e,
                format!("Failed to assign service to resource '{}'", resource_id),
            )
        })?;

        Ok(())
    }

    /// Service override per resource. Undecodable rows are logged and skipped.
    #[instrument(skip(self), name = "db_list_resource_services")]
    pub async fn list_resource_services(&self) -> Result<HashMap<ResourceId, ServiceRecord>> {
        let rows = sqlx::query_as::<_, ResourceServiceRow>(
            "SELECT rs.resource_id, s.id, s.name, s.type, s.config, s.status, s.source_type \
             FROM resource_services rs JOIN services s ON s.id = rs.service_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to list resource services");
            RouteplaneError::database(e, "Failed to list resource services")
        })?;

        let mut services = HashMap::new();
        for row in rows {
            let resource_id = ResourceId::from_string(row.resource_id);
            match ServiceRecord::try_from(row.service) {
                Ok(service) => {
                    services.insert(resource_id, service);
                }
                Err(e) => tracing::warn!(
                    error = %e,
                    resource_id = %resource_id,
                    "Skipping service override"
                ),
            }
        }
        Ok(services)
    }

    /// Get a service by id.
    #[instrument(skip(self), fields(id = %id), name = "db_get_service_by_id")]
    pub async fn get_by_id(&self, id: &str) -> Result<ServiceRecord> {
        let row = sqlx::query_as::<_, ServiceRow>(
            "SELECT id, name, type, config, status, source_type FROM services WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RouteplaneError::database(e, format!("Failed to get service '{}'", id)))?
        .ok_or_else(|| RouteplaneError::not_found("Service", id))?;

        ServiceRecord::try_from(row)
    }

    /// Mirrored services for one source type, ordered by id.
    #[instrument(
        skip(self),
        fields(source_type = %source_type),
        name = "db_list_services_by_source"
    )]
    pub async fn list_by_source(&self, source_type: SourceType) -> Result<Vec<ServiceRecord>> {
        let rows = sqlx::query_as::<_, ServiceRow>(
            "SELECT id, name, type, config, status, source_type FROM services \
             WHERE source_type = $1 ORDER BY id ASC",
        )
        .bind(source_type.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RouteplaneError::database(e, "Failed to list services by source"))?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let id = row.id.clone();
                ServiceRecord::try_from(row)
                    .map_err(|e| {
                        tracing::warn!(error = %e, id = %id, "Skipping undecodable service row")
                    })
                    .ok()
            })
            .collect())
    }

    /// Insert or refresh a mirrored service and mark it active. A custom
    /// service with the same id is left alone.
    #[instrument(
        skip(self, config),
        fields(id = %id, service_type = %service_type),
        name = "db_upsert_discovered_service"
    )]
    pub async fn upsert_discovered(
        &self,
        id: &str,
        service_type: &str,
        config: &Value,
        source_type: SourceType,
    ) -> Result<UpsertOutcome> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            RouteplaneError::database(e, "Failed to begin service upsert transaction")
        })?;

        let existing: Option<Option<String>> =
            sqlx::query_scalar("SELECT source_type FROM services WHERE id = $1")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| {
                    RouteplaneError::database(e, format!("Failed to look up service '{}'", id))
                })?;

        let now = Utc::now();
        let config = serde_json::to_string(config)?;

        let outcome = match existing {
            Some(None) => UpsertOutcome::SkippedCustom,
            Some(Some(_)) => {
                sqlx::query(
                    "UPDATE services SET type = $1, config = $2, status = 'active', \
                     source_type = $3, updated_at = $4 \
                     WHERE id = $5 AND source_type IS NOT NULL",
                )
                .bind(service_type)
                .bind(&config)
                .bind(source_type.as_str())
                .bind(now)
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    RouteplaneError::database(e, format!("Failed to update service '{}'", id))
                })?;
                UpsertOutcome::Updated
            }
            None => {
                sqlx::query(
                    "INSERT INTO services \
                     (id, name, type, config, status, source_type, created_at, updated_at) \
                     VALUES ($1, $2, $3, $4, 'active', $5, $6, $7)",
                )
                .bind(id)
                .bind(id)
                .bind(service_type)
                .bind(&config)
                .bind(source_type.as_str())
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    RouteplaneError::database(e, format!("Failed to insert service '{}'", id))
                })?;
                UpsertOutcome::Created
            }
        };

        tx.commit()
            .await
            .map_err(|e| RouteplaneError::database(e, "Failed to commit service upsert"))?;

        Ok(outcome)
    }

    /// Disable active mirrored services whose id is not in `touched`.
    pub async fn disable_untouched(&self, touched: &HashSet<String>) -> Result<u64> {
        async {
            let active: Vec<String> = sqlx::query_scalar(
                "SELECT id FROM services WHERE status = 'active' AND source_type IS NOT NULL",
            )
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RouteplaneError::database(e, "Failed to list mirrored services"))?;

            let now = Utc::now();
            let mut disabled = 0;
            for id in active.iter().filter(|id| !touched.contains(*id)) {
                let result = sqlx::query(
                    "UPDATE services SET status = 'disabled', updated_at = $1 WHERE id = $2",
                )
                .bind(now)
                .bind(id)
                .execute(&self.pool)
                .await;

                match result {
                    Ok(done) => disabled += done.rows_affected(),
                    Err(e) => tracing::error!(error = %e, id = %id, "Failed to disable service"),
                }
            }
            Ok::<u64, RouteplaneError>(disabled)
        }
        .instrument(db_span!("disable_untouched_services", touched = touched.len()))
        .await
    }
}
