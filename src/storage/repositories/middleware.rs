//! Middleware repository for custom middleware definitions and their
//! assignment to resources.

use crate::domain::{AssignedMiddleware, MiddlewareRecord, ResourceId};
use crate::errors::{Result, RouteplaneError};
use crate::storage::DbPool;
use chrono::Utc;
use serde_json::Value;
use sqlx::FromRow;
use std::collections::HashMap;
use tracing::instrument;

/// Database row structure for middleware assignments
#[derive(Debug, Clone, FromRow)]
struct AssignmentRow {
    pub resource_id: String,
    pub priority: i64,
    pub id: String,
    pub name: String,
    #[sqlx(rename = "type")]
    pub middleware_type: String,
    pub config: String,
    pub source_type: Option<String>,
}

impl AssignmentRow {
    fn into_assignment(self) -> Result<(ResourceId, AssignedMiddleware)> {
        let config = parse_config(&self.config).ok_or_else(|| {
            RouteplaneError::internal(format!("middleware '{}' config is not JSON", self.id))
        })?;

        Ok((
            ResourceId::from_string(self.resource_id),
            AssignedMiddleware {
                middleware: MiddlewareRecord {
                    id: self.id,
                    name: self.name,
                    middleware_type: self.middleware_type,
                    config,
                    source_type: self.source_type,
                },
                priority: self.priority,
            },
        ))
    }
}

/// Parse a stored JSON config; an empty string reads as `{}`.
pub(crate) fn parse_config(raw: &str) -> Option<Value> {
    if raw.trim().is_empty() {
        return Some(Value::Object(Default::default()));
    }
    serde_json::from_str(raw).ok()
}

/// Repository for middleware persistence
#[derive(Debug, Clone)]
pub struct MiddlewareRepository {
    pool: DbPool,
}

impl MiddlewareRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Create a middleware definition.
    #[instrument(
        skip(self, config),
        fields(name = %name, middleware_type = %middleware_type),
        name = "db_create_middleware"
    )]
    pub async fn create(
        &self,
        name: &str,
        middleware_type: &str,
        config: &Value,
    ) -> Result<MiddlewareRecord> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO middlewares (id, name, type, config, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&id)
        .bind(name)
        .bind(middleware_type)
        .bind(serde_json::to_string(config)?)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, name = %name, "Failed to create middleware");
            RouteplaneError::database(e, format!("Failed to create middleware '{}'", name))
        })?;

        Ok(MiddlewareRecord {
            id,
            name: name.to_string(),
            middleware_type: middleware_type.to_string(),
            config: config.clone(),
            source_type: None,
        })
    }

    /// Assign a middleware to a resource, replacing any previous priority.
    #[instrument(
        skip(self),
        fields(resource_id = %resource_id, middleware_id = %middleware_id),
        name = "db_assign_middleware"
    )]
    pub async fn assign(
        &self,
        resource_id: &ResourceId,
        middleware_id: &str,
        priority: i64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO resource_middlewares (resource_id, middleware_id, priority) \
             VALUES ($1, $2, $3) \
             ON CONFLICT(resource_id, middleware_id) DO UPDATE SET priority = excluded.priority",
        )
        .bind(resource_id.as_str())
        .bind(middleware_id)
        .bind(priority)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, resource_id = %resource_id, "Failed to assign middleware");
            RouteplaneError::database(
                e,
                format!("Failed to assign middleware to resource '{}'", resource_id),
            )
        })?;

        Ok(())
    }

    /// All middleware assignments grouped by resource. Assignments whose
    /// config cannot be decoded are logged and skipped.
    #[instrument(skip(self), name = "db_list_middleware_assignments")]
    pub async fn list_assignments(&self) -> Result<HashMap<ResourceId, Vec<AssignedMiddleware>>> {
        let rows = sqlx::query_as::<_, AssignmentRow>(
            "SELECT rm.resource_id, rm.priority, m.id, m.name, m.type, m.config, m.source_type \
             FROM resource_middlewares rm JOIN middlewares m ON m.id = rm.middleware_id \
             ORDER BY rm.resource_id, rm.priority DESC, m.name ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to list middleware assignments");
            RouteplaneError::database(e, "Failed to list middleware assignments")
        })?;

        let mut grouped: HashMap<ResourceId, Vec<AssignedMiddleware>> = HashMap::new();
        for row in rows {
            let middleware_id = row.id.clone();
            match row.into_assignment() {
                Ok((resource_id, assigned)) => {
                    grouped.entry(resource_id).or_default().push(assigned)
                }
                Err(e) => tracing::warn!(
                    error = %e,
                    middleware_id = %middleware_id,
                    "Skipping middleware assignment"
                ),
            }
        }
        Ok(grouped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Resource, SourceType};
    use crate::storage::repositories::ResourceRepository;
    use crate::storage::test_helpers::TestDatabase;
    use serde_json::json;

    #[tokio::test]
    async fn test_assignments_grouped_by_resource() {
        let db = TestDatabase::new("middleware_assignments").await;
        let resources = ResourceRepository::new(db.pool.clone());
        let repo = MiddlewareRepository::new(db.pool.clone());

        let resource =
            Resource::discovered("app", "app.example.com", "app", SourceType::Aggregator);
        let mut conn = db.pool.acquire().await.unwrap();
        ResourceRepository::insert(&mut conn, &resource)
            .await
            .unwrap();
        drop(conn);

        let auth = repo
            .create("auth", "basicAuth", &json!({"users": ["admin:hash"]}))
            .await
            .unwrap();
        let ratelimit = repo
            .create("limit", "rateLimit", &json!({"average": 10}))
            .await
            .unwrap();

        repo.assign(&resource.id, &auth.id, 10).await.unwrap();
        repo.assign(&resource.id, &ratelimit.id, 200).await.unwrap();
        repo.assign(&resource.id, &auth.id, 300).await.unwrap();

        let grouped = repo.list_assignments().await.unwrap();
        let assigned = &grouped[&resource.id];
        assert_eq!(assigned.len(), 2);
        assert_eq!(assigned[0].middleware.name, "auth");
        assert_eq!(assigned[0].priority, 300);
        assert_eq!(assigned[1].middleware.config, json!({"average": 10}));

        assert!(resources.get_by_id(&resource.id).await.is_ok());
    }

    #[test]
    fn test_parse_config() {
        assert_eq!(parse_config("").unwrap(), json!({}));
        assert_eq!(parse_config(r#"{"a":1}"#).unwrap(), json!({"a": 1}));
        assert!(parse_config("{broken").is_none());
    }
}
