//! # Resource Reconciler
//!
//! Mirrors the routes surfaced by the upstream into the `resources` table.
//! A route is matched to a stored resource in this order:
//!
//! 1. an active resource with the same upstream id
//! 2. an active resource for the same host (the upstream id is rewritten)
//! 3. a legacy row whose id is the upstream id, or which has no upstream id
//!    and the same host
//! 4. a disabled resource with the same upstream id, else the same host,
//!    which is reactivated
//! 5. otherwise a new resource with a fresh id and default settings
//!
//! Active resources not matched by any route in a cycle are disabled, so a
//! successful fetch with zero routes disables everything. A failed fetch
//! changes nothing.

use crate::domain::{DiscoveredRoute, Resource, ResourceId, ResourceStatus, SourceType};
use crate::errors::{Result, RouteplaneError};
use crate::observability::MetricsRecorder;
use crate::services::fetch_coordinator::SnapshotSource;
use crate::storage::{DbPool, DiscoveredUpdate, ResourceRepository};
use crate::upstream::is_redirect_router;
use sqlx::SqliteConnection;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Counters for one reconcile cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub created: u64,
    pub updated: u64,
    pub reactivated: u64,
    pub disabled: u64,
    pub skipped: u64,
    pub failed: u64,
}

/// How a route was matched to storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    ActiveByUpstreamId,
    ActiveByHost,
    Legacy,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Applied {
    Created,
    Updated,
    Reactivated,
}

/// Periodically reconciles upstream routes into resources.
pub struct ResourceWatcher {
    source: Arc<dyn SnapshotSource>,
    pool: DbPool,
    repository: ResourceRepository,
    interval: Duration,
    metrics: MetricsRecorder,
}

impl ResourceWatcher {
    pub fn new(source: Arc<dyn SnapshotSource>, pool: DbPool, interval: Duration) -> Self {
        Self {
            source,
            repository: ResourceRepository::new(pool.clone()),
            pool,
            interval,
            metrics: MetricsRecorder::new(),
        }
    }

    /// Run one reconcile cycle.
    #[instrument(skip(self), fields(source = %self.source.source_type()), name = "check_resources")]
    pub async fn check_resources(&self) -> Result<ReconcileReport> {
        let snapshot = self.source.snapshot().await?;
        let source_type = snapshot.source_type;

        // Non-redirect routers claim a host before its redirect routers
        let mut routes: Vec<&DiscoveredRoute> = snapshot.routes.iter().collect();
        routes.sort_by_key(|route| is_redirect_router(&route.upstream_id));

        let mut report = ReconcileReport::default();
        let mut touched: HashSet<ResourceId> = HashSet::new();
        let mut seen_hosts: HashSet<&str> = HashSet::new();

        for route in routes {
            if route.host.is_empty() || route.service_id.is_empty() {
                report.skipped += 1;
                continue;
            }
            if !seen_hosts.insert(route.host.as_str()) {
                debug!(
                    router = %route.upstream_id,
                    host = %route.host,
                    "Host already claimed this cycle"
                );
                report.skipped += 1;
                continue;
            }

            match self.upsert_route(route, source_type, &mut touched).await {
                Ok(Applied::Created) => report.created += 1,
                Ok(Applied::Updated) => report.updated += 1,
                Ok(Applied::Reactivated) => report.reactivated += 1,
                Err(e) => {
                    report.failed += 1;
                    error!(
                        error = %e,
                        router = %route.upstream_id,
                        host = %route.host,
                        "Failed to reconcile route"
                    );
                }
            }
        }

        report.disabled = self.repository.disable_untouched(&touched).await?;

        self.metrics.record_reconcile(
            "resources",
            report.created + report.reactivated,
            report.updated,
            report.disabled,
            report.failed,
        );
        self.metrics.update_active_resources(touched.len());

        info!(
            created = report.created,
            updated = report.updated,
            reactivated = report.reactivated,
            disabled = report.disabled,
            skipped = report.skipped,
            failed = report.failed,
            "Resource reconcile cycle complete"
        );

        Ok(report)
    }

    /// Resolve and write one route inside its own transaction. The matched
    /// id is recorded in `touched` before the write so a failed update does
    /// not get its resource disabled.
    async fn upsert_route(
        &self,
        route: &DiscoveredRoute,
        source_type: SourceType,
        touched: &mut HashSet<ResourceId>,
    ) -> Result<Applied> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RouteplaneError::database(e, "Failed to begin reconcile transaction"))?;

        let applied = match resolve(&mut tx, route).await? {
            Some((existing, resolution)) => {
                touched.insert(existing.id.clone());
                if resolution == Resolution::ActiveByHost {
                    info!(
                        id = %existing.id,
                        host = %route.host,
                        previous = ?existing.upstream_id,
                        current = %route.upstream_id,
                        "Upstream id changed for host"
                    );
                }

                let update = DiscoveredUpdate {
                    upstream_id: &route.upstream_id,
                    host: &route.host,
                    service_id: &route.service_id,
                    source_type,
                    entrypoints: &route.entrypoints,
                    tls_domains: &route.tls_domains,
                    priority: route.priority,
                };
                ResourceRepository::apply_discovered(&mut tx, &existing.id, &update).await?;

                if existing.status == ResourceStatus::Disabled {
                    info!(
                        id = %existing.id,
                        host = %route.host,
                        ?resolution,
                        "Reactivated resource"
                    );
                    Applied::Reactivated
                } else {
                    Applied::Updated
                }
            }
            None => {
                let mut resource = Resource::discovered(
                    &route.upstream_id,
                    &route.host,
                    &route.service_id,
                    source_type,
                );
                if !route.entrypoints.is_empty() {
                    resource.entrypoints = route.entrypoints.clone();
                }
                resource.tls_domains = route.tls_domains.clone();
                if let Some(priority) = route.priority {
                    resource.router_priority = priority;
                }

                ResourceRepository::insert(&mut tx, &resource).await?;
                touched.insert(resource.id.clone());
                info!(
                    id = %resource.id,
                    host = %route.host,
                    router = %route.upstream_id,
                    "Created resource"
                );
                Applied::Created
            }
        };

        tx.commit()
            .await
            .map_err(|e| RouteplaneError::database(e, "Failed to commit reconcile transaction"))?;

        Ok(applied)
    }

    /// Reconcile on every tick until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_secs = self.interval.as_secs(), "Resource watcher started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Resource watcher stopping");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.check_resources().await {
                        if e.is_throttled() {
                            debug!("Resource check throttled");
                        } else {
                            self.metrics.record_reconcile_error("resources");
                            warn!(error = %e, "Resource check failed; keeping current resources");
                        }
                    }
                }
            }
        }
    }
}

async fn resolve(
    conn: &mut SqliteConnection,
    route: &DiscoveredRoute,
) -> Result<Option<(Resource, Resolution)>> {
    let upstream_id = route.upstream_id.as_str();
    if let Some(found) = ResourceRepository::find_active_by_upstream_id(conn, upstream_id).await? {
        return Ok(Some((found, Resolution::ActiveByUpstreamId)));
    }
    if let Some(found) = ResourceRepository::find_active_by_host(conn, &route.host).await? {
        return Ok(Some((found, Resolution::ActiveByHost)));
    }
    if let Some(found) = ResourceRepository::find_legacy(conn, upstream_id, &route.host).await? {
        return Ok(Some((found, Resolution::Legacy)));
    }
    if let Some(found) =
        ResourceRepository::find_disabled_by_upstream_id(conn, upstream_id).await?
    {
        return Ok(Some((found, Resolution::Disabled)));
    }
    if let Some(found) = ResourceRepository::find_disabled_by_host(conn, &route.host).await? {
        return Ok(Some((found, Resolution::Disabled)));
    }
    Ok(None)
}

impl std::fmt::Debug for ResourceWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceWatcher")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}
