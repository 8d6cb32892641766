//! one.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::types::IngressRule;

/// Default schedule of the self-destruct job: every day at 20:00.
pub const DEFAULT_SELF_DESTRUCT_SCHEDULE: &str = "0 20 * * *";

/// Invalid settings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error(
        "stable universe limit ({max_stable_universe}) is greater than total universe limit ({max_universe})"
    )]
    StableLimitExceedsTotal {
        max_universe: u32,
        max_stable_universe: u32,
    },

    #[error("missing setting: {0}")]
    Missing(&'static str),

    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OneConfig {
    /// Externally reachable base URL of this service.
    pub public_url: String,
    /// Namespace routing rules are cloned from.
    pub source_namespace: String,
    pub capacity: CapacityLimits,
    #[serde(default)]
    pub self_destruct: SelfDestructConfig,
    pub auth: AuthConfig,
    pub dns: DnsConfig,
    #[serde(default)]
    pub ci: CiConfig,
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub repositories: BTreeMap<String, RepositoryConfig>,
    #[serde(default)]
    pub ingress_templates: Vec<IngressRule>,
}

/// Admission limits on concurrently active environments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityLimits {
    pub max_universe: u32,
    pub max_stable_universe: u32,
}

impl CapacityLimits {
    /// The stable limit must not exceed the total limit.
    pub fn check(&self) -> Result<(), ConfigError> {
        if self.max_stable_universe > self.max_universe {
            return Err(ConfigError::StableLimitExceedsTotal {
                max_universe: self.max_universe,
                max_stable_universe: self.max_stable_universe,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelfDestructConfig {
    /// Cron expression, five fields (minute first) or six (seconds first).
    pub schedule: String,
    /// How often the daemon looks for due jobs.
    pub check_interval_secs: u64,
}

impl Default for SelfDestructConfig {
    fn default() -> Self {
        Self {
            schedule: DEFAULT_SELF_DESTRUCT_SCHEDULE.to_string(),
            check_interval_secs: 60,
        }
    }
}

/// How API callers are authenticated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AuthConfig {
    /// Every caller is treated as authenticated.
    None,
    /// Bearer tokens, keyed by the subject they identify.
    Tokens { tokens: BTreeMap<String, String> },
}

/// Public and private zones, each pointing at its load balancer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    pub public_zone: String,
    pub public_target: String,
    pub private_zone: String,
    pub private_target: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CiConfig {
    #[default]
    Local,
    Jenkins(JenkinsConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JenkinsConfig {
    pub url: String,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    /// Folder copied for each environment.
    pub folder_template: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitConfig {
    /// Directory holding `{repo}.git` bare mirrors.
    pub mirror_dir: PathBuf,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            mirror_dir: PathBuf::from("/var/lib/one/mirrors"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Upper bound on concurrent branch queries. Unset means one worker per repository.
    pub max_workers: Option<usize>,
}

/// A repository that can be part of an environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// CI template job; defaults to the repository name.
    #[serde(default)]
    pub ci_job: Option<String>,
    #[serde(default)]
    pub ci_token: String,
}

impl OneConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: OneConfig = toml::from_str(&content)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Overlay `ONE_`-prefixed values looked up through `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("ONE_PUBLIC_URL") {
            self.public_url = url;
        }
        if let CiConfig::Jenkins(jenkins) = &mut self.ci {
            if let Some(password) = lookup("ONE_CI_PASSWORD") {
                jenkins.password = Some(password);
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.capacity.check()?;
        if self.source_namespace.is_empty() {
            return Err(ConfigError::Missing("source_namespace"));
        }
        if self.public_url.is_empty() {
            return Err(ConfigError::Missing("public_url"));
        }
        if let CiConfig::Jenkins(jenkins) = &self.ci {
            if !jenkins.url.starts_with("http://") {
                return Err(ConfigError::Invalid {
                    key: "ci.url",
                    reason: format!("only plain http endpoints are supported, got {}", jenkins.url),
                });
            }
            if jenkins.password.is_none() {
                return Err(ConfigError::Missing("ci.password"));
            }
        }
        if self.fetch.max_workers == Some(0) {
            return Err(ConfigError::Invalid {
                key: "fetch.max_workers",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
