//! Shared types used across the one crates.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Requested commit per repository. Iteration order is irrelevant.
pub type CommitSpec = HashMap<String, Commit>;

/// Branch (and optionally a pinned sha) requested for one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Commit {
    pub fn new(branch: &str, sha: Option<&str>) -> Self {
        Self {
            branch: branch.to_string(),
            sha: sha.map(str::to_string),
            message: None,
        }
    }
}

/// Body of a creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRequest {
    #[serde(default)]
    pub stable: bool,
    pub commit_per_project: CommitSpec,
}

// ── Environment ───────────────────────────────────────────────────

/// Lifecycle status of an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentStatus {
    Provisioning,
    Active,
    Deleting,
    Deleted,
    Failed,
}

/// Branch and sha a project was deployed from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRef {
    pub branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha: Option<String>,
}

impl From<&Commit> for CommitRef {
    fn from(commit: &Commit) -> Self {
        Self {
            branch: commit.branch.clone(),
            sha: commit.sha.clone(),
        }
    }
}

/// Per-project state inside an environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectDetails {
    /// Rewritten hostnames cloned into the environment.
    pub ingresses: BTreeSet<String>,
    pub job_name: String,
    /// Last CI build result as reported by the CI orchestrator.
    pub status: String,
    pub commit: CommitRef,
}

/// The persisted record of one environment.
///
/// Stored as a single JSON blob; reads and writes are whole-record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub name: String,
    pub stable: bool,
    pub status: EnvironmentStatus,
    pub delete_secret: String,
    pub projects: BTreeMap<String, ProjectDetails>,
    /// Unix timestamp (seconds) of creation.
    pub created_at: u64,
}

impl Environment {
    /// Every hostname registered for this environment, across projects.
    pub fn hostnames(&self) -> impl Iterator<Item = &str> {
        self.projects
            .values()
            .flat_map(|p| p.ingresses.iter().map(String::as_str))
    }
}

/// One row of the environment listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSummary {
    pub name: String,
    pub stable: bool,
    pub status: EnvironmentStatus,
}

// ── Cluster ───────────────────────────────────────────────────────

/// Phase of a namespace as reported by the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamespacePhase {
    Active,
    Terminating,
}

/// A namespace managed by one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceSummary {
    pub name: String,
    pub stable: bool,
    pub phase: NamespacePhase,
}

/// A routing rule: hostnames served by a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressRule {
    pub project: String,
    pub name: String,
    pub hosts: Vec<String>,
}

/// Scheduled job that calls back into the delete endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelfDestructJob {
    pub name: String,
    /// Cron expression.
    pub schedule: String,
    pub suspended: bool,
    pub delete_url: String,
}

// ── Git ───────────────────────────────────────────────────────────

/// Input of a branch listing job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchQueryJob {
    pub repository: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

/// A branch head as listed by the git host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteBranch {
    pub name: String,
    pub sha: String,
}

/// Commit metadata resolved for a branch head.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub message: String,
    pub author: String,
    /// Unix timestamp (seconds).
    pub created_at: u64,
}

/// Latest commit of one branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchSummary {
    pub branch: String,
    pub sha: String,
    pub comment: String,
    pub author: String,
    pub created_at: u64,
}

impl BranchSummary {
    pub fn new(branch: RemoteBranch, commit: CommitInfo) -> Self {
        Self {
            branch: branch.name,
            sha: branch.sha,
            comment: commit.message,
            author: commit.author,
            created_at: commit.created_at,
        }
    }
}

// ── CI ────────────────────────────────────────────────────────────

/// Parameters for creating or triggering one project's CI job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    pub project: String,
    /// Template job the environment job is copied from.
    pub template: String,
    pub token: String,
    pub namespace: String,
    pub branch: String,
    pub stable: bool,
}

/// Job name → last build result.
pub type JobStatuses = BTreeMap<String, String>;
