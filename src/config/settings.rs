//! # Configuration Settings
//!
//! Defines the configuration structure for the routeplane control plane.

use crate::domain::SourceType;
use crate::errors::{Result, RouteplaneError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

/// Base URLs tried, in order, when the native management API is unreachable
/// at the configured address.
pub const DEFAULT_NATIVE_FALLBACK_URLS: &[&str] = &[
    "http://traefik:8080",
    "http://host.docker.internal:8080",
    "http://localhost:8080",
    "http://127.0.0.1:8080",
];

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
pub struct AppConfig {
    /// Proxy config endpoint
    #[validate(nested)]
    pub server: ServerConfig,

    /// Database configuration
    #[validate(nested)]
    pub database: DatabaseConfig,

    /// Observability configuration
    #[validate(nested)]
    pub observability: ObservabilityConfig,

    /// Upstream authority the routing snapshot is fetched from
    #[validate(nested)]
    pub upstream: UpstreamConfig,

    /// Polling and caching intervals
    #[validate(nested)]
    pub sync: SyncConfig,
}

impl AppConfig {
    /// Build the full configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env(),
            observability: ObservabilityConfig::from_env(),
            upstream: UpstreamConfig::from_env()?,
            sync: SyncConfig::from_env(),
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(RouteplaneError::from)?;
        self.validate_custom()
    }

    fn validate_custom(&self) -> Result<()> {
        if self.observability.enable_metrics && self.server.port == self.observability.metrics_port
        {
            return Err(RouteplaneError::validation(
                "API and metrics ports cannot be the same",
            ));
        }

        if !self.database.url.starts_with("sqlite:") {
            return Err(RouteplaneError::validation_field(
                "Database URL must start with 'sqlite:'",
                "database.url",
            ));
        }

        let upstream = url::Url::parse(&self.upstream.url).map_err(|e| {
            RouteplaneError::validation_field(
                format!("Invalid upstream URL '{}': {}", self.upstream.url, e),
                "upstream.url",
            )
        })?;
        if upstream.scheme() != "http" && upstream.scheme() != "https" {
            return Err(RouteplaneError::validation_field(
                "Upstream URL must use http or https",
                "upstream.url",
            ));
        }

        if self.upstream.username.is_some() != self.upstream.password.is_some() {
            return Err(RouteplaneError::validation(
                "Upstream basic auth needs both a username and a password",
            ));
        }

        Ok(())
    }
}

/// HTTP endpoint serving the merged document to the proxy
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    /// Server bind address
    #[validate(length(min = 1, message = "Host cannot be empty"))]
    pub host: String,

    /// Server port
    #[validate(range(min = 1, message = "Port must be between 1 and 65535"))]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3456,
        }
    }
}

impl ServerConfig {
    /// Get the server bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let host = std::env::var("ROUTEPLANE_API_HOST").unwrap_or(defaults.host);
        let port = match std::env::var("ROUTEPLANE_API_PORT") {
            Ok(raw) => raw.parse().map_err(|e| {
                RouteplaneError::config(format!("Invalid ROUTEPLANE_API_PORT '{}': {}", raw, e))
            })?,
            Err(_) => defaults.port,
        };
        Ok(Self { host, port })
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DatabaseConfig {
    /// Database connection URL
    #[validate(length(min = 1, message = "Database URL cannot be empty"))]
    pub url: String,

    /// Maximum number of connections in the pool
    #[validate(range(
        min = 1,
        max = 100,
        message = "Max connections must be between 1 and 100"
    ))]
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    #[validate(range(max = 50, message = "Min connections must be between 0 and 50"))]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[validate(range(
        min = 1,
        max = 60,
        message = "Connect timeout must be between 1 and 60 seconds"
    ))]
    pub connect_timeout_seconds: u64,

    /// Idle timeout in seconds (0 = no timeout)
    pub idle_timeout_seconds: u64,

    /// Enable automatic migrations
    pub auto_migrate: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://./data/routeplane.db".to_string(),
            max_connections: 10,
            min_connections: 0,
            connect_timeout_seconds: 10,
            idle_timeout_seconds: 600,
            auto_migrate: true,
        }
    }
}

impl DatabaseConfig {
    /// Get connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    /// Get idle timeout as Duration (None if 0)
    pub fn idle_timeout(&self) -> Option<Duration> {
        if self.idle_timeout_seconds == 0 {
            None
        } else {
            Some(Duration::from_secs(self.idle_timeout_seconds))
        }
    }

    /// Create DatabaseConfig from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: std::env::var("DATABASE_URL").unwrap_or(defaults.url),
            max_connections: env_parse("DATABASE_MAX_CONNECTIONS", defaults.max_connections),
            min_connections: env_parse("DATABASE_MIN_CONNECTIONS", defaults.min_connections),
            connect_timeout_seconds: env_parse(
                "DATABASE_CONNECT_TIMEOUT_SECONDS",
                defaults.connect_timeout_seconds,
            ),
            idle_timeout_seconds: env_parse(
                "DATABASE_IDLE_TIMEOUT_SECONDS",
                defaults.idle_timeout_seconds,
            ),
            auto_migrate: env_flag("DATABASE_AUTO_MIGRATE", defaults.auto_migrate),
        }
    }
}

/// Observability configuration for logging and metrics
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ObservabilityConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub log_level: String,

    /// Enable JSON structured logging
    pub json_logging: bool,

    /// Enable the Prometheus exporter
    pub enable_metrics: bool,

    /// Metrics server port (0 = disabled)
    pub metrics_port: u16,

    /// Service name attached to exported metrics
    #[validate(length(min = 1, message = "Service name cannot be empty"))]
    pub service_name: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logging: false,
            enable_metrics: false,
            metrics_port: 9090,
            service_name: "routeplane".to_string(),
        }
    }
}

impl ObservabilityConfig {
    /// Get metrics bind address (None if disabled)
    pub fn metrics_bind_address(&self) -> Option<String> {
        if self.metrics_port == 0 {
            None
        } else {
            Some(format!("0.0.0.0:{}", self.metrics_port))
        }
    }

    /// Create ObservabilityConfig from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            log_level: std::env::var("ROUTEPLANE_LOG_LEVEL").unwrap_or(defaults.log_level),
            json_logging: env_flag("ROUTEPLANE_JSON_LOGGING", defaults.json_logging),
            enable_metrics: env_flag("ROUTEPLANE_ENABLE_METRICS", defaults.enable_metrics),
            metrics_port: env_parse("ROUTEPLANE_METRICS_PORT", defaults.metrics_port),
            service_name: std::env::var("ROUTEPLANE_SERVICE_NAME")
                .unwrap_or(defaults.service_name),
        }
    }
}

/// Upstream authority configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UpstreamConfig {
    /// Which authority publishes the routing snapshot
    pub kind: SourceType,

    /// Base URL of the authority
    #[validate(length(min = 1, message = "Upstream URL cannot be empty"))]
    pub url: String,

    /// Optional basic auth username
    pub username: Option<String>,

    /// Optional basic auth password
    #[serde(skip_serializing)]
    pub password: Option<String>,

    /// Skip TLS certificate verification (native source only)
    pub skip_tls_verify: bool,

    /// Base URLs retried once each when the primary is unreachable (native source only)
    pub fallback_urls: Vec<String>,

    /// Only surface routers that carry a certificate resolver
    pub require_tls_routers: bool,

    /// Overall deadline for one fetch, in seconds
    #[validate(range(
        min = 1,
        max = 300,
        message = "Fetch timeout must be between 1 and 300 seconds"
    ))]
    pub timeout_seconds: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            kind: SourceType::Aggregator,
            url: "http://localhost:3001/api/v1".to_string(),
            username: None,
            password: None,
            skip_tls_verify: false,
            fallback_urls: DEFAULT_NATIVE_FALLBACK_URLS
                .iter()
                .map(|u| u.to_string())
                .collect(),
            require_tls_routers: false,
            timeout_seconds: 10,
        }
    }
}

impl UpstreamConfig {
    /// Get the fetch deadline as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Basic auth credentials when both halves are configured
    pub fn basic_auth(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => Some((user.as_str(), pass.as_str())),
            _ => None,
        }
    }

    /// Create UpstreamConfig from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let kind = match std::env::var("ROUTEPLANE_DATA_SOURCE") {
            Ok(raw) => raw.parse::<SourceType>().map_err(RouteplaneError::config)?,
            Err(_) => defaults.kind,
        };

        let fallback_urls = match std::env::var("ROUTEPLANE_UPSTREAM_FALLBACK_URLS") {
            Ok(raw) => raw
                .split(',')
                .map(|u| u.trim().trim_end_matches('/').to_string())
                .filter(|u| !u.is_empty())
                .collect(),
            Err(_) => defaults.fallback_urls,
        };

        Ok(Self {
            kind,
            url: std::env::var("ROUTEPLANE_UPSTREAM_URL").unwrap_or(defaults.url),
            username: env_non_empty("ROUTEPLANE_UPSTREAM_USERNAME"),
            password: env_non_empty("ROUTEPLANE_UPSTREAM_PASSWORD"),
            skip_tls_verify: env_flag("ROUTEPLANE_UPSTREAM_SKIP_TLS_VERIFY", false),
            fallback_urls,
            require_tls_routers: env_flag("ROUTEPLANE_REQUIRE_TLS_ROUTERS", false),
            timeout_seconds: env_parse(
                "ROUTEPLANE_FETCH_TIMEOUT_SECONDS",
                defaults.timeout_seconds,
            ),
        })
    }
}

/// Polling and cache intervals
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SyncConfig {
    /// Minimum time between two completed upstream fetches
    #[validate(range(max = 3600, message = "Fetch interval must be at most 3600 seconds"))]
    pub fetch_min_interval_seconds: u64,

    /// TTL of the merged document cache
    #[validate(range(max = 3600, message = "Cache TTL must be at most 3600 seconds"))]
    pub config_cache_ttl_seconds: u64,

    /// Resource reconciliation period
    #[validate(range(min = 1, message = "Resource poll interval must be at least 1 second"))]
    pub resource_poll_seconds: u64,

    /// Service reconciliation period
    #[validate(range(min = 1, message = "Service poll interval must be at least 1 second"))]
    pub service_poll_seconds: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fetch_min_interval_seconds: 5,
            config_cache_ttl_seconds: 5,
            resource_poll_seconds: 30,
            service_poll_seconds: 30,
        }
    }
}

impl SyncConfig {
    pub fn fetch_min_interval(&self) -> Duration {
        Duration::from_secs(self.fetch_min_interval_seconds)
    }

    pub fn config_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.config_cache_ttl_seconds)
    }

    pub fn resource_poll_interval(&self) -> Duration {
        Duration::from_secs(self.resource_poll_seconds)
    }

    pub fn service_poll_interval(&self) -> Duration {
        Duration::from_secs(self.service_poll_seconds)
    }

    /// Create SyncConfig from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            fetch_min_interval_seconds: env_parse(
                "ROUTEPLANE_FETCH_MIN_INTERVAL_SECONDS",
                defaults.fetch_min_interval_seconds,
            ),
            config_cache_ttl_seconds: env_parse(
                "ROUTEPLANE_CONFIG_CACHE_TTL_SECONDS",
                defaults.config_cache_ttl_seconds,
            ),
            resource_poll_seconds: env_parse(
                "ROUTEPLANE_RESOURCE_POLL_SECONDS",
                defaults.resource_poll_seconds,
            ),
            service_poll_seconds: env_parse(
                "ROUTEPLANE_SERVICE_POLL_SECONDS",
                defaults.service_poll_seconds,
            ),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|s| {
            let s = s.trim().to_lowercase();
            s == "true" || s == "1" || s == "yes"
        })
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validation() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_server_config_bind_address() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8081,
        };
        assert_eq!(config.bind_address(), "127.0.0.1:8081");
    }

    #[test]
    fn test_database_config_timeouts() {
        let config = DatabaseConfig {
            connect_timeout_seconds: 15,
            idle_timeout_seconds: 300,
            ..Default::default()
        };
        assert_eq!(config.connect_timeout(), Duration::from_secs(15));
        assert_eq!(config.idle_timeout(), Some(Duration::from_secs(300)));

        let config_no_idle = DatabaseConfig {
            idle_timeout_seconds: 0,
            ..Default::default()
        };
        assert_eq!(config_no_idle.idle_timeout(), None);
    }

    #[test]
    fn test_sync_defaults_match_documented_intervals() {
        let sync = SyncConfig::default();
        assert_eq!(sync.fetch_min_interval(), Duration::from_secs(5));
        assert_eq!(sync.config_cache_ttl(), Duration::from_secs(5));
    }

    #[test]
    fn test_upstream_basic_auth_requires_both_halves() {
        let mut config = AppConfig::default();
        config.upstream.username = Some("admin".to_string());
        assert!(config.validate().is_err());

        config.upstream.password = Some("secret".to_string());
        assert!(config.validate().is_ok());
        assert_eq!(config.upstream.basic_auth(), Some(("admin", "secret")));
    }

    #[test]
    fn test_config_validation_errors() {
        let mut config = AppConfig::default();
        config.database.url = "postgresql://localhost/routeplane".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.upstream.url = "ftp://upstream".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.upstream.url = "not a url".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.observability.enable_metrics = true;
        config.observability.metrics_port = config.server.port;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_ranges() {
        let mut config = AppConfig::default();
        config.database.max_connections = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.upstream.timeout_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.sync.resource_poll_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_observability_config_metrics_address() {
        let config = ObservabilityConfig {
            metrics_port: 9191,
            ..Default::default()
        };
        assert_eq!(config.metrics_bind_address(), Some("0.0.0.0:9191".to_string()));

        let disabled = ObservabilityConfig {
            metrics_port: 0,
            ..Default::default()
        };
        assert_eq!(disabled.metrics_bind_address(), None);
    }
}
