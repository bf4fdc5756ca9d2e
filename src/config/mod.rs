//! # Configuration Management
//!
//! Environment-driven configuration for the routeplane control plane.
//! The binary loads a `.env` file first (if present), then reads every
//! setting through [`AppConfig::from_env`] and validates the result before
//! any component is constructed.

pub mod settings;

pub use settings::{
    AppConfig, DatabaseConfig, ObservabilityConfig, ServerConfig, SyncConfig, UpstreamConfig,
    DEFAULT_NATIVE_FALLBACK_URLS,
};
