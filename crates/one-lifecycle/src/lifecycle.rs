//! Environment creation and deletion pipelines.
//!
//! Every mutating operation runs while holding the environment's lock.
//! Pipelines abort on the first failing step and leave whatever was already
//! provisioned in place; operators retry creation or deletion.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use one_core::{
    BranchQueryJob, CommitRef, CreateRequest, Environment, EnvironmentStatus, EnvironmentSummary,
    JobRequest, JobStatuses, OneConfig, ProjectDetails, RepositoryConfig, SelfDestructJob,
    is_managed, namespace_name,
};
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};

use crate::capacity::CapacityGovernor;
use crate::collaborators::Collaborators;
use crate::error::{LifecycleError, LifecycleResult, at};
use crate::fetch::{BranchListing, RepoFetchPool};
use crate::locks::NamespaceLockTable;
use crate::records::{EnvironmentRecords, derive_status};

/// CI status recorded for a job the orchestrator reported nothing for.
pub const UNKNOWN_CI_STATUS: &str = "UNKNOWN";

const DELETE_SECRET_BYTES: usize = 32;

/// Settings the pipelines need from the daemon configuration.
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub public_url: String,
    pub source_namespace: String,
    pub self_destruct_schedule: String,
    pub capacity: one_core::CapacityLimits,
    pub repositories: BTreeMap<String, RepositoryConfig>,
    pub max_fetch_workers: Option<usize>,
}

impl LifecycleSettings {
    pub fn from_config(config: &OneConfig) -> Self {
        Self {
            public_url: config.public_url.trim_end_matches('/').to_string(),
            source_namespace: config.source_namespace.clone(),
            self_destruct_schedule: config.self_destruct.schedule.clone(),
            capacity: config.capacity,
            repositories: config.repositories.clone(),
            max_fetch_workers: config.fetch.max_workers,
        }
    }

    fn job_request(&self, namespace: &str, project: &str, branch: &str, stable: bool) -> JobRequest {
        let repo = self.repositories.get(project);
        JobRequest {
            project: project.to_string(),
            template: repo
                .and_then(|r| r.ci_job.clone())
                .unwrap_or_else(|| project.to_string()),
            token: repo.map(|r| r.ci_token.clone()).unwrap_or_default(),
            namespace: namespace.to_string(),
            branch: branch.to_string(),
            stable,
        }
    }
}

/// Who is asking to delete an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteCredential<'a> {
    /// An authenticated caller, identified by subject.
    Authenticated(&'a str),
    /// An anonymous caller, possibly presenting the environment's delete secret.
    Secret(Option<&'a str>),
}

/// The environment lifecycle orchestrator.
#[derive(Clone)]
pub struct EnvironmentLifecycle {
    settings: Arc<LifecycleSettings>,
    backends: Collaborators,
    locks: Arc<NamespaceLockTable>,
    creating: Arc<Mutex<HashSet<String>>>,
    records: EnvironmentRecords,
    governor: CapacityGovernor,
    fetch_pool: RepoFetchPool,
}

impl EnvironmentLifecycle {
    pub fn new(
        settings: LifecycleSettings,
        backends: Collaborators,
        locks: Arc<NamespaceLockTable>,
    ) -> Self {
        let records = EnvironmentRecords::new(backends.cluster.clone());
        let governor =
            CapacityGovernor::new(settings.capacity, backends.cluster.clone(), records.clone());
        let fetch_pool = RepoFetchPool::new(backends.git.clone(), settings.max_fetch_workers);
        Self {
            settings: Arc::new(settings),
            backends,
            locks,
            creating: Arc::default(),
            records,
            governor,
            fetch_pool,
        }
    }

    pub fn locks(&self) -> &NamespaceLockTable {
        &self.locks
    }

    pub fn governor(&self) -> &CapacityGovernor {
        &self.governor
    }

    pub fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    /// Provision a new environment for `request`.
    pub async fn create(&self, request: CreateRequest) -> LifecycleResult<Environment> {
        let CreateRequest {
            stable,
            commit_per_project: spec,
        } = request;

        if spec.is_empty() {
            return Err(LifecycleError::InvalidRequest(
                "commit_per_project must name at least one repository".to_string(),
            ));
        }
        let mut unknown: Vec<&str> = spec
            .keys()
            .filter(|repo| !self.settings.repositories.contains_key(*repo))
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            unknown.sort_unstable();
            return Err(LifecycleError::InvalidRequest(format!(
                "unknown repositories: {}",
                unknown.join(", ")
            )));
        }

        let name = namespace_name(&spec);
        let _lock = self.locks.acquire(&name).await;
        let _creating = CreateInFlight::enter(&self.creating, &name);
        debug!(namespace = %name, registered_locks = self.locks.len(), "create started");

        // 1. Duplicate detection. A namespace without a record is what a
        // failed create leaves behind; provisioning runs again over it.
        if let Some(existing) = self.records.get(&name).await? {
            if existing.status != EnvironmentStatus::Deleted {
                info!(namespace = %name, status = ?existing.status, "environment already exists");
                return Err(LifecycleError::Conflict(name));
            }
        }
        let leftover = self
            .backends
            .cluster
            .get_namespace(&name)
            .await
            .map_err(at("look up namespace"))?;
        if leftover.is_some() {
            warn!(namespace = %name, "resuming over a partially provisioned environment");
        }

        // 2. Admission control.
        if !self.governor.can_create(stable).await? {
            let limits = self.governor.limits();
            return Err(LifecycleError::AdmissionDenied(format!(
                "limit reached (max {} environments, max {} stable)",
                limits.max_universe, limits.max_stable_universe
            )));
        }

        // 3. Namespace.
        info!(namespace = %name, stable, step = "namespace", "creating namespace");
        self.backends
            .cluster
            .create_namespace(&name, stable)
            .await
            .map_err(at("create namespace"))?;

        // 4. Routing rules.
        let mut projects: Vec<String> = spec.keys().cloned().collect();
        projects.sort_unstable();
        info!(namespace = %name, step = "ingress", source = %self.settings.source_namespace, "cloning routing rules");
        let cloned = self
            .backends
            .cluster
            .clone_ingress(&self.settings.source_namespace, &name, &projects)
            .await
            .map_err(at("clone ingress"))?;

        // 5-6. Delete secret and self-destruct job.
        let delete_secret = generate_delete_secret()?;
        let job = SelfDestructJob {
            name: format!("seppuku-{name}"),
            schedule: self.settings.self_destruct_schedule.clone(),
            suspended: stable,
            delete_url: format!(
                "{}/api/stagings/{name}?delete_secret={delete_secret}",
                self.settings.public_url
            ),
        };
        info!(namespace = %name, step = "self_destruct", suspended = stable, "scheduling self-destruct");
        self.backends
            .cluster
            .create_scheduled_job(&name, &job)
            .await
            .map_err(at("create self-destruct job"))?;

        // 7. DNS.
        let hostnames: BTreeSet<&str> = cloned
            .values()
            .flat_map(|hosts| hosts.iter().map(String::as_str))
            .collect();
        info!(namespace = %name, step = "dns", records = hostnames.len(), "registering hostnames");
        for host in &hostnames {
            self.backends
                .dns
                .upsert_record(host)
                .await
                .map_err(at("upsert dns record"))?;
        }

        // 8. CI jobs.
        info!(namespace = %name, step = "ci", jobs = projects.len(), "creating ci jobs");
        self.backends
            .ci
            .ensure_folder(&name)
            .await
            .map_err(at("create ci folder"))?;
        let mut job_names = BTreeMap::new();
        for project in &projects {
            let branch = spec.get(project).map(|c| c.branch.as_str()).unwrap_or_default();
            let request = self.settings.job_request(&name, project, branch, stable);
            let job_name = self
                .backends
                .ci
                .create_job(&request)
                .await
                .map_err(at("create ci job"))?;
            self.backends
                .ci
                .trigger_job(&request)
                .await
                .map_err(at("trigger ci job"))?;
            debug!(namespace = %name, %project, job = %job_name, %branch, "ci job triggered");
            job_names.insert(project.clone(), job_name);
        }

        // 9. Project details.
        let statuses = self
            .backends
            .ci
            .job_statuses(&name)
            .await
            .map_err(at("query ci status"))?;
        let mut details = BTreeMap::new();
        for (project, job_name) in job_names {
            let status = statuses
                .get(&job_name)
                .cloned()
                .unwrap_or_else(|| UNKNOWN_CI_STATUS.to_string());
            let commit = spec.get(&project).map(CommitRef::from).unwrap_or(CommitRef {
                branch: String::new(),
                sha: None,
            });
            let ingresses = cloned.get(&project).cloned().unwrap_or_default();
            details.insert(
                project,
                ProjectDetails {
                    ingresses,
                    job_name,
                    status,
                    commit,
                },
            );
        }

        // 10. Record.
        let env = Environment {
            name: name.clone(),
            stable,
            status: EnvironmentStatus::Active,
            delete_secret,
            projects: details,
            created_at: unix_now(),
        };
        self.records.put(&env).await?;
        info!(namespace = %name, stable, projects = env.projects.len(), "environment active");
        Ok(env)
    }

    /// Tear an environment down.
    pub async fn delete(&self, name: &str, credential: DeleteCredential<'_>) -> LifecycleResult<()> {
        let _lock = self.locks.acquire(name).await;

        let env = self
            .records
            .get(name)
            .await?
            .ok_or_else(|| LifecycleError::NotFound(format!("environment {name}")))?;

        match credential {
            DeleteCredential::Authenticated(subject) => {
                info!(namespace = %name, %subject, "delete requested by authenticated caller");
            }
            DeleteCredential::Secret(Some(secret)) if secrets_match(secret, &env.delete_secret) => {
                info!(namespace = %name, "delete requested with delete secret");
            }
            DeleteCredential::Secret(_) => {
                warn!(namespace = %name, "delete rejected: bad or missing delete secret");
                return Err(LifecycleError::Unauthorized(
                    "authentication or a valid delete secret is required".to_string(),
                ));
            }
        }

        info!(namespace = %name, step = "ci", "deleting ci jobs");
        self.backends
            .ci
            .delete_folder(name)
            .await
            .map_err(at("delete ci folder"))?;

        let hostnames: BTreeSet<&str> = env.hostnames().collect();
        info!(namespace = %name, step = "dns", records = hostnames.len(), "deleting hostnames");
        for host in hostnames {
            self.backends
                .dns
                .delete_record(host)
                .await
                .map_err(at("delete dns record"))?;
        }

        info!(namespace = %name, step = "namespace", "deleting namespace");
        self.backends
            .cluster
            .delete_namespace(name)
            .await
            .map_err(at("delete namespace"))?;

        info!(namespace = %name, "environment deleted");
        Ok(())
    }

    /// The persisted record of an environment.
    pub async fn describe(&self, name: &str) -> LifecycleResult<Environment> {
        let _lock = self.locks.acquire(name).await;
        self.require(name).await
    }

    /// Last build result of each of the environment's CI jobs.
    pub async fn pipeline_status(&self, name: &str) -> LifecycleResult<JobStatuses> {
        let _lock = self.locks.acquire(name).await;
        self.require(name).await?;
        self.backends
            .ci
            .job_statuses(name)
            .await
            .map_err(at("query ci status"))
    }

    /// Re-trigger one project's CI job with the branch it was created from.
    /// Returns the job name.
    pub async fn replay(&self, name: &str, project: &str) -> LifecycleResult<String> {
        let _lock = self.locks.acquire(name).await;
        let env = self.require(name).await?;
        let details = env.projects.get(project).ok_or_else(|| {
            LifecycleError::NotFound(format!("project {project} in environment {name}"))
        })?;

        let request = self
            .settings
            .job_request(name, project, &details.commit.branch, env.stable);
        self.backends
            .ci
            .trigger_job(&request)
            .await
            .map_err(at("trigger ci job"))?;
        info!(namespace = %name, %project, job = %details.job_name, "ci job replayed");
        Ok(details.job_name.clone())
    }

    /// Every managed environment with its derived status.
    pub async fn list(&self) -> LifecycleResult<Vec<EnvironmentSummary>> {
        let namespaces = self
            .backends
            .cluster
            .list_namespaces()
            .await
            .map_err(at("list namespaces"))?;

        let mut summaries = Vec::with_capacity(namespaces.len());
        for ns in namespaces.into_iter().filter(|ns| is_managed(&ns.name)) {
            let record = self.records.get(&ns.name).await?;
            let status = derive_status(&ns, record.as_ref(), self.is_creating(&ns.name));
            summaries.push(EnvironmentSummary {
                stable: record.as_ref().map_or(ns.stable, |env| env.stable),
                name: ns.name,
                status,
            });
        }
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(summaries)
    }

    /// Branches of every catalog repository, optionally filtered.
    pub async fn available_branches(&self, filter: Option<&str>) -> LifecycleResult<BranchListing> {
        let jobs = self
            .settings
            .repositories
            .keys()
            .map(|repository| BranchQueryJob {
                repository: repository.clone(),
                filter: filter.map(str::to_string),
            })
            .collect();
        self.fetch_pool.fetch(jobs).await
    }

    fn is_creating(&self, name: &str) -> bool {
        self.creating
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(name)
    }

    async fn require(&self, name: &str) -> LifecycleResult<Environment> {
        self.records
            .get(name)
            .await?
            .ok_or_else(|| LifecycleError::NotFound(format!("environment {name}")))
    }
}

/// Marks a name as having a create pipeline in flight until dropped.
struct CreateInFlight<'a> {
    names: &'a Mutex<HashSet<String>>,
    name: String,
}

impl<'a> CreateInFlight<'a> {
    fn enter(names: &'a Mutex<HashSet<String>>, name: &str) -> Self {
        names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string());
        Self {
            names,
            name: name.to_string(),
        }
    }
}

impl Drop for CreateInFlight<'_> {
    fn drop(&mut self) {
        self.names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.name);
    }
}

fn generate_delete_secret() -> LifecycleResult<String> {
    let mut bytes = [0u8; DELETE_SECRET_BYTES];
    getrandom::getrandom(&mut bytes)
        .map_err(|e| LifecycleError::Internal(format!("cannot generate delete secret: {e}")))?;
    Ok(hex::encode(bytes))
}

fn secrets_match(supplied: &str, stored: &str) -> bool {
    supplied.as_bytes().ct_eq(stored.as_bytes()).into()
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delete_secret_is_64_hex_chars_and_random() {
        let a = generate_delete_secret().unwrap();
        let b = generate_delete_secret().unwrap();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn secret_comparison() {
        assert!(secrets_match("abc", "abc"));
        assert!(!secrets_match("abd", "abc"));
        assert!(!secrets_match("ab", "abc"));
        assert!(!secrets_match("", "abc"));
    }

    #[test]
    fn job_request_uses_catalog_template() {
        let mut repositories = BTreeMap::new();
        repositories.insert(
            "portal".to_string(),
            RepositoryConfig {
                ci_job: Some("portal-pipeline".to_string()),
                ci_token: "tok".to_string(),
            },
        );
        repositories.insert(
            "cards".to_string(),
            RepositoryConfig {
                ci_job: None,
                ci_token: String::new(),
            },
        );
        let settings = LifecycleSettings {
            public_url: "https://one.example.com".to_string(),
            source_namespace: "staging".to_string(),
            self_destruct_schedule: "0 20 * * *".to_string(),
            capacity: one_core::CapacityLimits {
                max_universe: 1,
                max_stable_universe: 1,
            },
            repositories,
            max_fetch_workers: None,
        };

        let portal = settings.job_request("ms-1", "portal", "master", true);
        assert_eq!(portal.template, "portal-pipeline");
        assert_eq!(portal.token, "tok");
        assert!(portal.stable);

        let cards = settings.job_request("ms-1", "cards", "develop", false);
        assert_eq!(cards.template, "cards");
        assert_eq!(cards.branch, "develop");
    }
}
