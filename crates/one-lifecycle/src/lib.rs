//! one-lifecycle — the environment lifecycle orchestrator.
//!
//! Composes deterministic naming, per-environment locking, admission
//! control, and the persisted environment record into the creation and
//! deletion pipelines, driving four backing systems through the traits in
//! [`collaborators`]. Branch discovery across the repository catalog runs
//! through a cancellable fan-out pool.

pub mod capacity;
pub mod collaborators;
pub mod error;
pub mod fetch;
pub mod lifecycle;
pub mod locks;
pub mod records;

pub use capacity::{CapacityCounters, CapacityGovernor};
pub use collaborators::{BoxFuture, CiOrchestrator, ClonedHosts, Cluster, Collaborators, Dns, GitHost};
pub use error::{Backend, LifecycleError, LifecycleResult, UpstreamError, UpstreamResult};
pub use fetch::{BranchListing, RepoFetchPool};
pub use lifecycle::{DeleteCredential, EnvironmentLifecycle, LifecycleSettings, UNKNOWN_CI_STATUS};
pub use locks::{NamespaceLock, NamespaceLockTable};
pub use records::{EnvironmentRecords, derive_status};
