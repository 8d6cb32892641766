//! In-memory collaborator fakes shared by the lifecycle integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use one_core::{
    CapacityLimits, CommitInfo, JobRequest, JobStatuses, NamespacePhase, NamespaceSummary,
    RemoteBranch, RepositoryConfig, SelfDestructJob, job_name, rewrite_host,
};
use one_lifecycle::{
    Backend, BoxFuture, CiOrchestrator, ClonedHosts, Cluster, Collaborators, Dns,
    EnvironmentLifecycle, GitHost, LifecycleSettings, NamespaceLockTable, UpstreamError,
    UpstreamResult,
};

pub const SOURCE_NAMESPACE: &str = "staging";

// ── Git ──────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeGit {
    pub branches: Mutex<BTreeMap<String, Vec<RemoteBranch>>>,
    pub failing: Mutex<HashSet<String>>,
    pub delay: Mutex<HashMap<String, Duration>>,
    pub calls: AtomicUsize,
}

impl FakeGit {
    pub fn with_repo(&self, repo: &str, branches: &[(&str, &str)]) {
        self.branches.lock().unwrap().insert(
            repo.to_string(),
            branches
                .iter()
                .map(|(name, sha)| RemoteBranch {
                    name: name.to_string(),
                    sha: sha.to_string(),
                })
                .collect(),
        );
    }

    pub fn fail(&self, repo: &str) {
        self.failing.lock().unwrap().insert(repo.to_string());
    }

    pub fn slow(&self, repo: &str, delay: Duration) {
        self.delay.lock().unwrap().insert(repo.to_string(), delay);
    }
}

impl GitHost for FakeGit {
    fn list_branches<'a>(
        &'a self,
        repo: &'a str,
        filter: Option<&'a str>,
    ) -> BoxFuture<'a, UpstreamResult<Vec<RemoteBranch>>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let delay = self.delay.lock().unwrap().get(repo).copied();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if self.failing.lock().unwrap().contains(repo) {
                return Err(UpstreamError::new(Backend::Git, format!("{repo} unreachable")));
            }
            let branches = self
                .branches
                .lock()
                .unwrap()
                .get(repo)
                .cloned()
                .unwrap_or_default();
            Ok(branches
                .into_iter()
                .filter(|b| filter.is_none_or(|f| b.name.starts_with(f)))
                .collect())
        })
    }

    fn get_commit<'a>(
        &'a self,
        _repo: &'a str,
        sha: &'a str,
    ) -> BoxFuture<'a, UpstreamResult<CommitInfo>> {
        Box::pin(async move {
            Ok(CommitInfo {
                message: format!("commit {sha}"),
                author: "dev@example.com".to_string(),
                created_at: 1_700_000_000,
            })
        })
    }
}

// ── CI ───────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeCi {
    pub folders: Mutex<BTreeSet<String>>,
    pub jobs: Mutex<BTreeMap<String, JobRequest>>,
    pub triggers: Mutex<Vec<JobRequest>>,
    pub fail_trigger: Mutex<bool>,
    /// Report no statuses at all, as for jobs that never built.
    pub hide_statuses: Mutex<bool>,
}

impl CiOrchestrator for FakeCi {
    fn ensure_folder<'a>(&'a self, namespace: &'a str) -> BoxFuture<'a, UpstreamResult<()>> {
        Box::pin(async move {
            self.folders.lock().unwrap().insert(namespace.to_string());
            Ok(())
        })
    }

    fn create_job<'a>(&'a self, job: &'a JobRequest) -> BoxFuture<'a, UpstreamResult<String>> {
        Box::pin(async move {
            let name = job_name(&job.namespace, &job.project);
            self.jobs.lock().unwrap().insert(name.clone(), job.clone());
            Ok(name)
        })
    }

    fn trigger_job<'a>(&'a self, job: &'a JobRequest) -> BoxFuture<'a, UpstreamResult<()>> {
        Box::pin(async move {
            if *self.fail_trigger.lock().unwrap() {
                return Err(UpstreamError::new(Backend::Ci, "jenkins returned 500"));
            }
            self.triggers.lock().unwrap().push(job.clone());
            Ok(())
        })
    }

    fn job_statuses<'a>(&'a self, namespace: &'a str) -> BoxFuture<'a, UpstreamResult<JobStatuses>> {
        Box::pin(async move {
            if *self.hide_statuses.lock().unwrap() {
                return Ok(JobStatuses::new());
            }
            let triggered: BTreeSet<String> = self
                .triggers
                .lock()
                .unwrap()
                .iter()
                .map(|j| job_name(&j.namespace, &j.project))
                .collect();
            Ok(self
                .jobs
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, job)| job.namespace == namespace)
                .map(|(name, _)| {
                    let status = if triggered.contains(name) { "RUNNING" } else { "PENDING" };
                    (name.clone(), status.to_string())
                })
                .collect())
        })
    }

    fn delete_folder<'a>(&'a self, namespace: &'a str) -> BoxFuture<'a, UpstreamResult<()>> {
        Box::pin(async move {
            self.folders.lock().unwrap().remove(namespace);
            self.jobs
                .lock()
                .unwrap()
                .retain(|_, job| job.namespace != namespace);
            Ok(())
        })
    }
}

// ── Cluster ──────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeCluster {
    pub namespaces: Mutex<BTreeMap<String, NamespaceSummary>>,
    /// Project → template hostnames in the source namespace.
    pub templates: Mutex<BTreeMap<String, Vec<String>>>,
    pub records: Mutex<HashMap<(String, String), Vec<u8>>>,
    pub scheduled: Mutex<BTreeMap<String, SelfDestructJob>>,
    pub fail_scheduled_job: Mutex<bool>,
    pub fail_delete_namespace: Mutex<bool>,
    /// Pause after the namespace appears, before create_namespace returns.
    pub create_delay: Mutex<Option<Duration>>,
}

impl FakeCluster {
    pub fn with_template(&self, project: &str, hosts: &[&str]) {
        self.templates.lock().unwrap().insert(
            project.to_string(),
            hosts.iter().map(|h| h.to_string()).collect(),
        );
    }

    pub fn namespace_count(&self) -> usize {
        self.namespaces.lock().unwrap().len()
    }

    pub fn set_phase(&self, name: &str, phase: NamespacePhase) {
        if let Some(ns) = self.namespaces.lock().unwrap().get_mut(name) {
            ns.phase = phase;
        }
    }
}

impl Cluster for FakeCluster {
    fn create_namespace<'a>(&'a self, name: &'a str, stable: bool) -> BoxFuture<'a, UpstreamResult<()>> {
        Box::pin(async move {
            self.namespaces.lock().unwrap().insert(
                name.to_string(),
                NamespaceSummary {
                    name: name.to_string(),
                    stable,
                    phase: NamespacePhase::Active,
                },
            );
            let delay = *self.create_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            Ok(())
        })
    }

    fn delete_namespace<'a>(&'a self, name: &'a str) -> BoxFuture<'a, UpstreamResult<()>> {
        Box::pin(async move {
            if *self.fail_delete_namespace.lock().unwrap() {
                return Err(UpstreamError::new(Backend::Cluster, "api server unavailable"));
            }
            self.namespaces.lock().unwrap().remove(name);
            self.records.lock().unwrap().retain(|(ns, _), _| ns != name);
            self.scheduled.lock().unwrap().remove(name);
            Ok(())
        })
    }

    fn get_namespace<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, UpstreamResult<Option<NamespaceSummary>>> {
        Box::pin(async move { Ok(self.namespaces.lock().unwrap().get(name).cloned()) })
    }

    fn list_namespaces(&self) -> BoxFuture<'_, UpstreamResult<Vec<NamespaceSummary>>> {
        Box::pin(async move { Ok(self.namespaces.lock().unwrap().values().cloned().collect()) })
    }

    fn clone_ingress<'a>(
        &'a self,
        _source: &'a str,
        target: &'a str,
        projects: &'a [String],
    ) -> BoxFuture<'a, UpstreamResult<ClonedHosts>> {
        Box::pin(async move {
            let templates = self.templates.lock().unwrap();
            Ok(projects
                .iter()
                .map(|project| {
                    let hosts = templates
                        .get(project)
                        .into_iter()
                        .flatten()
                        .map(|h| rewrite_host(target, h))
                        .collect();
                    (project.clone(), hosts)
                })
                .collect())
        })
    }

    fn put_config_record<'a>(
        &'a self,
        namespace: &'a str,
        key: &'a str,
        value: Vec<u8>,
    ) -> BoxFuture<'a, UpstreamResult<()>> {
        Box::pin(async move {
            self.records
                .lock()
                .unwrap()
                .insert((namespace.to_string(), key.to_string()), value);
            Ok(())
        })
    }

    fn get_config_record<'a>(
        &'a self,
        namespace: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, UpstreamResult<Option<Vec<u8>>>> {
        Box::pin(async move {
            Ok(self
                .records
                .lock()
                .unwrap()
                .get(&(namespace.to_string(), key.to_string()))
                .cloned())
        })
    }

    fn create_scheduled_job<'a>(
        &'a self,
        namespace: &'a str,
        job: &'a SelfDestructJob,
    ) -> BoxFuture<'a, UpstreamResult<()>> {
        Box::pin(async move {
            if *self.fail_scheduled_job.lock().unwrap() {
                return Err(UpstreamError::new(Backend::Cluster, "cronjob quota exceeded"));
            }
            self.scheduled
                .lock()
                .unwrap()
                .insert(namespace.to_string(), job.clone());
            Ok(())
        })
    }
}

// ── DNS ──────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeDns {
    pub records: Mutex<BTreeSet<String>>,
    pub fail_delete: Mutex<bool>,
}

impl Dns for FakeDns {
    fn upsert_record<'a>(&'a self, hostname: &'a str) -> BoxFuture<'a, UpstreamResult<()>> {
        Box::pin(async move {
            self.records.lock().unwrap().insert(hostname.to_string());
            Ok(())
        })
    }

    fn delete_record<'a>(&'a self, hostname: &'a str) -> BoxFuture<'a, UpstreamResult<()>> {
        Box::pin(async move {
            if *self.fail_delete.lock().unwrap() {
                return Err(UpstreamError::new(Backend::Dns, "throttled"));
            }
            self.records.lock().unwrap().remove(hostname);
            Ok(())
        })
    }
}

// ── Harness ──────────────────────────────────────────────────────────

pub struct Harness {
    pub lifecycle: EnvironmentLifecycle,
    pub git: Arc<FakeGit>,
    pub ci: Arc<FakeCi>,
    pub cluster: Arc<FakeCluster>,
    pub dns: Arc<FakeDns>,
}

pub fn harness(limits: CapacityLimits, repos: &[&str]) -> Harness {
    let git = Arc::new(FakeGit::default());
    let ci = Arc::new(FakeCi::default());
    let cluster = Arc::new(FakeCluster::default());
    let dns = Arc::new(FakeDns::default());

    let repositories = repos
        .iter()
        .map(|repo| {
            (
                repo.to_string(),
                RepositoryConfig {
                    ci_job: None,
                    ci_token: format!("{repo}-token"),
                },
            )
        })
        .collect();
    let settings = LifecycleSettings {
        public_url: "https://one.example.com".to_string(),
        source_namespace: SOURCE_NAMESPACE.to_string(),
        self_destruct_schedule: "0 20 * * *".to_string(),
        capacity: limits,
        repositories,
        max_fetch_workers: None,
    };
    let backends = Collaborators {
        git: git.clone(),
        ci: ci.clone(),
        cluster: cluster.clone(),
        dns: dns.clone(),
    };
    let lifecycle = EnvironmentLifecycle::new(settings, backends, Arc::new(NamespaceLockTable::new()));
    Harness {
        lifecycle,
        git,
        ci,
        cluster,
        dns,
    }
}

pub fn roomy() -> CapacityLimits {
    CapacityLimits {
        max_universe: 10,
        max_stable_universe: 3,
    }
}
