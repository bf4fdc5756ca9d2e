//! # Services
//!
//! The long-running parts of the control plane: the fetch coordinator that
//! shares upstream reads, the watchers that reconcile storage with what the
//! upstream reports, and the merge engine that builds the served document.

pub mod certificate_authority;
pub mod config_merger;
pub mod fetch_coordinator;
pub mod in_flight;
pub mod resource_watcher;
pub mod service_watcher;

pub use certificate_authority::{
    CertificateAuthority, StaticCertificateAuthority, StoredCertificateAuthority,
};
pub use config_merger::{merge, ConfigMerger, MergeInputs, DEFAULT_CONFIG_CACHE_TTL};
pub use fetch_coordinator::{FetchCoordinator, SnapshotSource, DEFAULT_MIN_FETCH_INTERVAL};
pub use in_flight::{InFlight, Role};
pub use resource_watcher::{ReconcileReport, ResourceWatcher};
pub use service_watcher::{ServiceSyncReport, ServiceWatcher};
