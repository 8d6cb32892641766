//! Interfaces to the four backing systems an environment spans.
//!
//! Each trait returns boxed futures so implementations can be held as
//! `Arc<dyn Trait>` and swapped between the standalone backends, the
//! Jenkins client, and test fakes.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use one_core::{
    CommitInfo, JobRequest, JobStatuses, NamespaceSummary, RemoteBranch, SelfDestructJob,
};

use crate::error::UpstreamResult;

/// Boxed future returned by collaborator calls.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Project → rewritten hostnames cloned into an environment.
pub type ClonedHosts = BTreeMap<String, BTreeSet<String>>;

/// Source of branch and commit metadata.
pub trait GitHost: Send + Sync {
    /// Branch heads of a repository, optionally restricted by a filter pattern.
    fn list_branches<'a>(
        &'a self,
        repo: &'a str,
        filter: Option<&'a str>,
    ) -> BoxFuture<'a, UpstreamResult<Vec<RemoteBranch>>>;

    /// Metadata of one commit.
    fn get_commit<'a>(&'a self, repo: &'a str, sha: &'a str)
    -> BoxFuture<'a, UpstreamResult<CommitInfo>>;
}

/// Build system holding one folder of jobs per environment.
pub trait CiOrchestrator: Send + Sync {
    fn ensure_folder<'a>(&'a self, namespace: &'a str) -> BoxFuture<'a, UpstreamResult<()>>;

    /// Create the job if missing and return its name.
    fn create_job<'a>(&'a self, job: &'a JobRequest) -> BoxFuture<'a, UpstreamResult<String>>;

    fn trigger_job<'a>(&'a self, job: &'a JobRequest) -> BoxFuture<'a, UpstreamResult<()>>;

    /// Last build result of every job in the environment's folder.
    fn job_statuses<'a>(&'a self, namespace: &'a str) -> BoxFuture<'a, UpstreamResult<JobStatuses>>;

    /// Delete the environment's folder. A missing folder is not an error.
    fn delete_folder<'a>(&'a self, namespace: &'a str) -> BoxFuture<'a, UpstreamResult<()>>;
}

/// Container platform hosting environment namespaces.
pub trait Cluster: Send + Sync {
    /// Create or relabel a namespace.
    fn create_namespace<'a>(&'a self, name: &'a str, stable: bool)
    -> BoxFuture<'a, UpstreamResult<()>>;

    /// Delete a namespace and everything in it. A missing namespace is not an error.
    fn delete_namespace<'a>(&'a self, name: &'a str) -> BoxFuture<'a, UpstreamResult<()>>;

    fn get_namespace<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, UpstreamResult<Option<NamespaceSummary>>>;

    /// Managed namespaces only.
    fn list_namespaces(&self) -> BoxFuture<'_, UpstreamResult<Vec<NamespaceSummary>>>;

    /// Copy the routing rules of `projects` from `source` into `target`,
    /// rewriting every hostname for the target environment.
    fn clone_ingress<'a>(
        &'a self,
        source: &'a str,
        target: &'a str,
        projects: &'a [String],
    ) -> BoxFuture<'a, UpstreamResult<ClonedHosts>>;

    fn put_config_record<'a>(
        &'a self,
        namespace: &'a str,
        key: &'a str,
        value: Vec<u8>,
    ) -> BoxFuture<'a, UpstreamResult<()>>;

    fn get_config_record<'a>(
        &'a self,
        namespace: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, UpstreamResult<Option<Vec<u8>>>>;

    fn create_scheduled_job<'a>(
        &'a self,
        namespace: &'a str,
        job: &'a SelfDestructJob,
    ) -> BoxFuture<'a, UpstreamResult<()>>;
}

/// Public and private DNS zones.
pub trait Dns: Send + Sync {
    /// Upsert a CNAME for `hostname` in both zones.
    fn upsert_record<'a>(&'a self, hostname: &'a str) -> BoxFuture<'a, UpstreamResult<()>>;

    /// Delete the CNAME for `hostname` from both zones. Absent records count as deleted.
    fn delete_record<'a>(&'a self, hostname: &'a str) -> BoxFuture<'a, UpstreamResult<()>>;
}

/// The set of backends a lifecycle service drives.
#[derive(Clone)]
pub struct Collaborators {
    pub git: Arc<dyn GitHost>,
    pub ci: Arc<dyn CiOrchestrator>,
    pub cluster: Arc<dyn Cluster>,
    pub dns: Arc<dyn Dns>,
}
