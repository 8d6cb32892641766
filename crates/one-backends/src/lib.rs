//! one-backends — concrete collaborators for the lifecycle orchestrator.
//!
//! - [`LocalCluster`]: namespaces and their objects in the embedded redb store
//! - [`LocalDns`]: public/private zone pair held in memory
//! - [`GitMirrorHost`]: branch metadata from bare git mirrors
//! - [`LocalCi`]: in-process job registry
//! - [`JenkinsCi`]: HTTP client for a Jenkins controller

pub mod git_mirror;
pub mod jenkins;
pub mod local_ci;
pub mod local_cluster;
pub mod local_dns;

pub use git_mirror::GitMirrorHost;
pub use jenkins::{JenkinsCi, JenkinsError, RetryPolicy};
pub use local_ci::LocalCi;
pub use local_cluster::LocalCluster;
pub use local_dns::{DnsRecord, LocalDns};
