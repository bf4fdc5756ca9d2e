//! Test database utilities for in-library tests.
//!
//! Each `TestDatabase` is a fresh SQLite file inside its own temporary
//! directory with all migrations applied. `:memory:` databases are
//! per-connection in SQLite, so a file is needed for a pooled database.
//!
//! This module is only available in test builds (`#[cfg(test)]`).

use crate::config::DatabaseConfig;
use crate::storage::{create_pool, DbPool};
use tempfile::TempDir;

/// A migrated SQLite database removed when dropped.
pub struct TestDatabase {
    pub pool: DbPool,
    _dir: TempDir,
}

impl TestDatabase {
    /// Create a new test database with all migrations applied.
    /// The `prefix` names the database file for debugging.
    pub async fn new(prefix: &str) -> Self {
        let dir = tempfile::tempdir()
            .unwrap_or_else(|e| panic!("Failed to create temp dir for {}: {}", prefix, e));
        let path = dir.path().join(format!("{}.db", prefix));

        let config = DatabaseConfig {
            url: format!("sqlite://{}", path.display()),
            auto_migrate: true,
            max_connections: 5,
            min_connections: 1,
            ..Default::default()
        };

        let pool = create_pool(&config)
            .await
            .unwrap_or_else(|e| panic!("Failed to create test pool for {}: {}", prefix, e));

        Self { pool, _dir: dir }
    }
}
