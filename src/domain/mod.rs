//! Domain layer
//!
//! Pure domain types with no infrastructure dependencies beyond the SQLx
//! traits on identifiers.
//!
//! ## Module Organization
//!
//! - `id`: Type-safe identifiers with NewType pattern
//! - `resource`: Discovered routes and their per-route overrides
//! - `overrides`: Custom middlewares, services and assignments
//! - `settings`: Global mTLS / security settings and the CA view
//! - `snapshot`: Fetched upstream state
//! - `document`: The produced proxy configuration document

pub mod document;
pub mod id;
pub mod overrides;
pub mod resource;
pub mod settings;
pub mod snapshot;

pub use document::ProxyDocument;
pub use id::ResourceId;
pub use overrides::{AssignedMiddleware, MiddlewareRecord, ResourceOverrides, ServiceRecord};
pub use resource::{
    Resource, ResourceMtls, ResourceStatus, SourceType, DEFAULT_ENTRYPOINT, DEFAULT_ROUTER_PRIORITY,
    UNKNOWN_ATTRIBUTION,
};
pub use settings::{CaConfig, MtlsSettings, SecuritySettings, DEFAULT_MTLS_REJECT_CODE};
pub use snapshot::{
    ConfigMap, DiscoveredRoute, DiscoveredService, ProtocolSection, RoutingSnapshot,
    SnapshotMetadata,
};
