//! # Proxy-facing HTTP API
//!
//! Serves the merged configuration to the proxy's HTTP provider and a
//! liveness check.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod server;

pub use error::ApiError;
pub use routes::{build_router, ApiState, PROXY_CONFIG_PATH};
pub use server::start_api_server;
