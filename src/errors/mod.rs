//! # Error Handling
//!
//! Error handling for the routeplane control plane. Every fallible operation
//! returns [`Result`], whose error type distinguishes transport, decode and
//! throttle failures so callers can decide between fallback, stale-serving
//! and propagation.

pub mod types;

pub use types::{Result, RouteplaneError};
