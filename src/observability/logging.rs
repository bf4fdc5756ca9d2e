//! # Structured Logging
//!
//! Subscriber setup and span macros built on the tracing ecosystem.
//!
//! `RUST_LOG` takes precedence over the configured level so a single module
//! can be turned up without touching the deployment configuration. With
//! `json_logging` enabled every event is emitted as one JSON object per line,
//! span fields included.

use crate::config::{AppConfig, ObservabilityConfig};
use crate::errors::{Result, RouteplaneError};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Create a tracing span for an upstream fetch.
///
/// ```rust,ignore
/// let span = fetch_span!("native", "http://traefik:8080");
/// let span = fetch_span!("native", base_url, endpoint = "/api/version");
/// ```
#[macro_export]
macro_rules! fetch_span {
    ($source:expr, $base_url:expr) => {
        tracing::info_span!(
            "upstream_fetch",
            source = %$source,
            base_url = %$base_url,
            fetch_id = %uuid::Uuid::new_v4()
        )
    };
    ($source:expr, $base_url:expr, $($field:tt)*) => {
        tracing::info_span!(
            "upstream_fetch",
            source = %$source,
            base_url = %$base_url,
            fetch_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Create a tracing span for database operations.
///
/// ```rust,ignore
/// let span = db_span!("disable_untouched", table = "resources");
/// ```
#[macro_export]
macro_rules! db_span {
    ($operation:expr) => {
        tracing::debug_span!(
            "db_operation",
            operation = %$operation,
            operation_id = %uuid::Uuid::new_v4()
        )
    };
    ($operation:expr, $($field:tt)*) => {
        tracing::debug_span!(
            "db_operation",
            operation = %$operation,
            operation_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| {
            RouteplaneError::config(format!("Invalid log level '{}': {}", config.log_level, e))
        })?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.json_logging {
        let layer = fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false);
        registry.with(layer).try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };

    result.map_err(|e| RouteplaneError::config(format!("Failed to install subscriber: {}", e)))
}

/// Log configuration at startup
pub fn log_config_info(config: &AppConfig) {
    tracing::info!(
        server_address = %config.server.bind_address(),
        data_source = %config.upstream.kind,
        upstream_url = %config.upstream.url,
        basic_auth = config.upstream.basic_auth().is_some(),
        require_tls_routers = config.upstream.require_tls_routers,
        fetch_min_interval_secs = config.sync.fetch_min_interval_seconds,
        config_cache_ttl_secs = config.sync.config_cache_ttl_seconds,
        metrics_enabled = %config.observability.enable_metrics,
        "routeplane configuration"
    );
}
