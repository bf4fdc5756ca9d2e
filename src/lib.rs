//! # Routeplane
//!
//! Control plane that synthesizes a reverse proxy's dynamic routing
//! configuration. It reads routers, services and middlewares from an
//! upstream authority, mirrors them into local storage, lets operators attach
//! overrides to each host, and serves the merged result to the proxy.
//!
//! ## Architecture
//!
//! ```text
//! Upstream API → Fetch Coordinator → Resource/Service Watchers → SQLite
//!                        ↓                                          ↓
//!                  Config Merge Engine  ←───────────────────────────┘
//!                        ↓
//!              GET /api/v1/traefik-config → proxy
//! ```

pub mod api;
pub mod cli;
pub mod config;
pub mod domain;
pub mod errors;
pub mod observability;
pub mod rules;
pub mod services;
pub mod storage;
pub mod upstream;

pub use config::AppConfig;
pub use errors::{Result, RouteplaneError};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
