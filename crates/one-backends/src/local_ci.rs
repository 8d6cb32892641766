//! In-process CI registry.
//!
//! Keeps one folder of jobs per environment; a triggered job reports a
//! successful build immediately.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use one_core::{JobRequest, JobStatuses, job_name};
use one_lifecycle::{Backend, BoxFuture, CiOrchestrator, UpstreamError, UpstreamResult};
use tracing::debug;

pub const STATUS_SUCCESS: &str = "SUCCESS";
pub const STATUS_PENDING: &str = "PENDING";

#[derive(Debug, Clone)]
struct LocalJob {
    branch: String,
    builds: u32,
}

type Folders = BTreeMap<String, BTreeMap<String, LocalJob>>;

#[derive(Debug, Clone, Default)]
pub struct LocalCi {
    folders: Arc<RwLock<Folders>>,
}

impl LocalCi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of builds run for a job, if it exists.
    pub fn builds(&self, namespace: &str, job: &str) -> Option<u32> {
        let folders = self.folders.read().unwrap_or_else(PoisonError::into_inner);
        folders.get(namespace)?.get(job).map(|j| j.builds)
    }

    /// Branch a job was last triggered for.
    pub fn branch(&self, namespace: &str, job: &str) -> Option<String> {
        let folders = self.folders.read().unwrap_or_else(PoisonError::into_inner);
        folders.get(namespace)?.get(job).map(|j| j.branch.clone())
    }

    fn missing_folder(namespace: &str) -> UpstreamError {
        UpstreamError::new(Backend::Ci, format!("folder {namespace} does not exist"))
    }
}

impl CiOrchestrator for LocalCi {
    fn ensure_folder<'a>(&'a self, namespace: &'a str) -> BoxFuture<'a, UpstreamResult<()>> {
        Box::pin(async move {
            let mut folders = self.folders.write().unwrap_or_else(PoisonError::into_inner);
            folders.entry(namespace.to_string()).or_default();
            Ok(())
        })
    }

    fn create_job<'a>(&'a self, job: &'a JobRequest) -> BoxFuture<'a, UpstreamResult<String>> {
        Box::pin(async move {
            let name = job_name(&job.namespace, &job.project);
            let mut folders = self.folders.write().unwrap_or_else(PoisonError::into_inner);
            let folder = folders
                .get_mut(&job.namespace)
                .ok_or_else(|| Self::missing_folder(&job.namespace))?;
            folder.entry(name.clone()).or_insert_with(|| LocalJob {
                branch: job.branch.clone(),
                builds: 0,
            });
            debug!(namespace = %job.namespace, job = %name, template = %job.template, "job created");
            Ok(name)
        })
    }

    fn trigger_job<'a>(&'a self, job: &'a JobRequest) -> BoxFuture<'a, UpstreamResult<()>> {
        Box::pin(async move {
            let name = job_name(&job.namespace, &job.project);
            let mut folders = self.folders.write().unwrap_or_else(PoisonError::into_inner);
            let entry = folders
                .get_mut(&job.namespace)
                .and_then(|folder| folder.get_mut(&name))
                .ok_or_else(|| UpstreamError::new(Backend::Ci, format!("job {name} does not exist")))?;
            entry.builds += 1;
            entry.branch = job.branch.clone();
            debug!(namespace = %job.namespace, job = %name, branch = %job.branch, build = entry.builds, "job triggered");
            Ok(())
        })
    }

    fn job_statuses<'a>(&'a self, namespace: &'a str) -> BoxFuture<'a, UpstreamResult<JobStatuses>> {
        Box::pin(async move {
            let folders = self.folders.read().unwrap_or_else(PoisonError::into_inner);
            let folder = folders
                .get(namespace)
                .ok_or_else(|| Self::missing_folder(namespace))?;
            Ok(folder
                .iter()
                .map(|(name, job)| {
                    let status = if job.builds > 0 { STATUS_SUCCESS } else { STATUS_PENDING };
                    (name.clone(), status.to_string())
                })
                .collect())
        })
    }

    fn delete_folder<'a>(&'a self, namespace: &'a str) -> BoxFuture<'a, UpstreamResult<()>> {
        Box::pin(async move {
            let mut folders = self.folders.write().unwrap_or_else(PoisonError::into_inner);
            folders.remove(namespace);
            Ok(())
        })
    }
}
