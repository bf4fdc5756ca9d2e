//! # Storage and Persistence
//!
//! SQLite connectivity, embedded migrations and the repositories for
//! resources, overrides and global settings.

pub mod migrations;
pub mod pool;
pub mod repositories;

#[cfg(test)]
pub mod test_helpers;

pub use crate::config::DatabaseConfig;

pub use migrations::{get_migration_version, run_migrations, validate_migrations};
pub use pool::{create_pool, get_pool_stats, DbPool, PoolStats};
pub use repositories::{
    DiscoveredUpdate, MiddlewareRepository, ResourceRepository, ServiceRepository,
    SettingsRepository, UpsertOutcome,
};

use crate::errors::{Result, RouteplaneError};
use tracing::{info, warn};

/// Check database connectivity
pub async fn check_connection(pool: &DbPool) -> Result<()> {
    sqlx::query("SELECT 1")
        .fetch_one(pool)
        .await
        .map_err(|e| RouteplaneError::database(e, "Database connectivity check failed"))?;

    Ok(())
}

/// Check connectivity and report the applied schema version.
///
/// A schema that differs from the embedded migrations is logged, not rejected.
pub async fn check_schema(pool: &DbPool) -> Result<i64> {
    check_connection(pool).await?;

    let version = get_migration_version(pool).await?;
    if !validate_migrations(pool).await? {
        warn!(schema_version = version, "Database schema does not match embedded migrations");
    }

    let stats = get_pool_stats(pool);
    info!(
        schema_version = version,
        pool_size = stats.size,
        pool_idle = stats.idle,
        "Database ready"
    );
    Ok(version)
}
