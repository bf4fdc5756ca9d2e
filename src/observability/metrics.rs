//! # Metrics Collection
//!
//! Prometheus metrics for upstream fetches, reconciliation and the merged
//! configuration cache. Recording goes through the `metrics` facade and is a
//! no-op until [`init_metrics`] installs the exporter.

use crate::config::ObservabilityConfig;
use crate::errors::{Result, RouteplaneError};
use ::tracing::{info, warn};
use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Metrics recorder that tracks application metrics
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsRecorder;

impl MetricsRecorder {
    /// Create a new metrics recorder instance
    pub fn new() -> Self {
        Self
    }

    /// Record one complete upstream fetch pass
    pub fn record_upstream_fetch(&self, source: &str, success: bool, duration: f64) {
        let status = if success { "success" } else { "error" };
        let labels = [("source", source.to_string()), ("status", status.to_string())];
        counter!("upstream_fetches_total", &labels).increment(1);

        let duration_labels = [("source", source.to_string())];
        histogram!("upstream_fetch_duration_seconds", &duration_labels).record(duration);
    }

    /// Record a failed native API endpoint
    pub fn record_endpoint_failure(&self, endpoint: &str, critical: bool) {
        let labels = [("endpoint", endpoint.to_string()), ("critical", critical.to_string())];
        counter!("upstream_endpoint_failures_total", &labels).increment(1);
    }

    /// Record a fetch served from a fallback base URL
    pub fn record_fallback_used(&self) {
        counter!("upstream_fallback_used_total").increment(1);
    }

    /// Record how the fetch coordinator answered a caller
    ///
    /// Outcomes: `fetched`, `joined`, `throttled_cached`, `throttled`
    pub fn record_coordinator_outcome(&self, outcome: &str) {
        let labels = [("outcome", outcome.to_string())];
        counter!("fetch_coordinator_calls_total", &labels).increment(1);
    }

    /// Record the result of one reconciliation cycle
    pub fn record_reconcile(
        &self,
        kind: &str,
        created: u64,
        updated: u64,
        disabled: u64,
        failed: u64,
    ) {
        let kind = kind.to_string();
        counter!("reconcile_cycles_total", "kind" => kind.clone()).increment(1);
        counter!("reconcile_created_total", "kind" => kind.clone()).increment(created);
        counter!("reconcile_updated_total", "kind" => kind.clone()).increment(updated);
        counter!("reconcile_disabled_total", "kind" => kind.clone()).increment(disabled);
        counter!("reconcile_failed_total", "kind" => kind).increment(failed);
    }

    /// Record a failed reconciliation cycle (snapshot unavailable)
    pub fn record_reconcile_error(&self, kind: &str) {
        counter!("reconcile_errors_total", "kind" => kind.to_string()).increment(1);
    }

    /// Record how a merged config request was served
    ///
    /// Outcomes: `hit`, `miss`, `stale`
    pub fn record_merge(&self, outcome: &str) {
        let labels = [("outcome", outcome.to_string())];
        counter!("merged_config_requests_total", &labels).increment(1);
    }

    /// Update the active resource gauge
    pub fn update_active_resources(&self, count: usize) {
        gauge!("active_resources").set(count as f64);
    }

    /// Register metric descriptions
    pub fn register_metrics(&self) {
        describe_counter!(
            "upstream_fetches_total",
            Unit::Count,
            "Upstream fetch passes by outcome"
        );
        describe_histogram!(
            "upstream_fetch_duration_seconds",
            Unit::Seconds,
            "Duration of one upstream fetch pass"
        );
        describe_counter!(
            "upstream_endpoint_failures_total",
            Unit::Count,
            "Native API endpoints that failed during a fetch"
        );
        describe_counter!(
            "upstream_fallback_used_total",
            Unit::Count,
            "Fetches answered by a fallback base URL"
        );
        describe_counter!(
            "fetch_coordinator_calls_total",
            Unit::Count,
            "Snapshot requests by coordinator outcome"
        );
        describe_counter!("reconcile_cycles_total", Unit::Count, "Completed reconciliation cycles");
        describe_counter!(
            "reconcile_created_total",
            Unit::Count,
            "Records created by reconciliation"
        );
        describe_counter!(
            "reconcile_updated_total",
            Unit::Count,
            "Records updated by reconciliation"
        );
        describe_counter!(
            "reconcile_disabled_total",
            Unit::Count,
            "Records disabled by reconciliation"
        );
        describe_counter!("reconcile_failed_total", Unit::Count, "Record upserts that failed");
        describe_counter!(
            "reconcile_errors_total",
            Unit::Count,
            "Reconciliation cycles aborted before any write"
        );
        describe_counter!(
            "merged_config_requests_total",
            Unit::Count,
            "Merged configuration requests by cache outcome"
        );
        describe_gauge!("active_resources", Unit::Count, "Active resources after the last cycle");
    }
}

/// Initialize metrics collection and Prometheus exporter
pub fn init_metrics(config: &ObservabilityConfig) -> Result<()> {
    if !config.enable_metrics {
        return Ok(());
    }

    let metrics_addr = match config.metrics_bind_address() {
        Some(addr) => addr,
        None => {
            warn!("Metrics disabled: no bind address configured");
            return Ok(());
        }
    };

    let socket_addr: SocketAddr = metrics_addr.parse().map_err(|e| {
        RouteplaneError::config(format!("Invalid metrics bind address '{}': {}", metrics_addr, e))
    })?;

    PrometheusBuilder::new()
        .with_http_listener(socket_addr)
        .add_global_label("service", &config.service_name)
        .install()
        .map_err(|e| {
            RouteplaneError::config(format!("Failed to initialize metrics exporter: {}", e))
        })?;

    MetricsRecorder::new().register_metrics();

    info!(
        metrics_addr = %metrics_addr,
        service_name = %config.service_name,
        "Metrics collection initialized"
    );

    Ok(())
}
