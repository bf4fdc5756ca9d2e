//! Repository modules for data access
//!
//! Each repository owns the SQL for one table family. Row decoding happens
//! per row, so one malformed row never hides the rest of a listing.

pub mod middleware;
pub mod resource;
pub mod service;
pub mod settings;

pub use middleware::MiddlewareRepository;
pub use resource::{DiscoveredUpdate, ResourceRepository};
pub use service::{ServiceRepository, UpsertOutcome};
pub use settings::SettingsRepository;
