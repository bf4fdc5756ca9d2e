//! # Service Watcher
//!
//! Mirrors upstream HTTP services into the `services` table with the same
//! lifecycle as resources: upsert on every observation, disable when no
//! longer reported. Administrator-created services are never modified.

use crate::errors::Result;
use crate::observability::MetricsRecorder;
use crate::services::fetch_coordinator::SnapshotSource;
use crate::storage::{DbPool, ServiceRepository, UpsertOutcome};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Counters for one service sync cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceSyncReport {
    pub created: u64,
    pub updated: u64,
    pub disabled: u64,
    pub skipped: u64,
    pub failed: u64,
}

pub struct ServiceWatcher {
    source: Arc<dyn SnapshotSource>,
    repository: ServiceRepository,
    interval: Duration,
    metrics: MetricsRecorder,
}

impl ServiceWatcher {
    pub fn new(source: Arc<dyn SnapshotSource>, pool: DbPool, interval: Duration) -> Self {
        Self {
            source,
            repository: ServiceRepository::new(pool),
            interval,
            metrics: MetricsRecorder::new(),
        }
    }

    #[instrument(skip(self), fields(source = %self.source.source_type()), name = "check_services")]
    pub async fn check_services(&self) -> Result<ServiceSyncReport> {
        let snapshot = self.source.snapshot().await?;

        let mut report = ServiceSyncReport::default();
        let mut touched: HashSet<String> = HashSet::new();

        for service in &snapshot.services {
            let outcome = self
                .repository
                .upsert_discovered(
                    &service.upstream_id,
                    &service.service_type,
                    &service.config,
                    snapshot.source_type,
                )
                .await;

            match outcome {
                Ok(UpsertOutcome::Created) => {
                    report.created += 1;
                    touched.insert(service.upstream_id.clone());
                }
                Ok(UpsertOutcome::Updated) => {
                    report.updated += 1;
                    touched.insert(service.upstream_id.clone());
                }
                Ok(UpsertOutcome::SkippedCustom) => {
                    debug!(
                        service = %service.upstream_id,
                        "Custom service shadows upstream service"
                    );
                    report.skipped += 1;
                }
                Err(e) => {
                    // keep the previous row rather than disabling it
                    touched.insert(service.upstream_id.clone());
                    report.failed += 1;
                    error!(error = %e, service = %service.upstream_id, "Failed to mirror service");
                }
            }
        }

        report.disabled = self.repository.disable_untouched(&touched).await?;

        self.metrics.record_reconcile(
            "services",
            report.created,
            report.updated,
            report.disabled,
            report.failed,
        );
        info!(
            created = report.created,
            updated = report.updated,
            disabled = report.disabled,
            skipped = report.skipped,
            failed = report.failed,
            "Service sync cycle complete"
        );

        Ok(report)
    }

    /// Sync on every tick until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_secs = self.interval.as_secs(), "Service watcher started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Service watcher stopping");
                    break;
                }
                _ = ticker.tick() => {
                    match self.check_services().await {
                        Ok(_) => {}
                        Err(e) if e.is_throttled() => debug!("Service check throttled"),
                        Err(e) => {
                            self.metrics.record_reconcile_error("services");
                            warn!(error = %e, "Service check failed; keeping current services");
                        }
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for ServiceWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceWatcher")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}
