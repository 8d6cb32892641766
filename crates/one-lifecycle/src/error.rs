//! Lifecycle error taxonomy.

use std::fmt;

use one_core::ConfigError;
use thiserror::Error;

/// The backing system a collaborator call went to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Git,
    Ci,
    Cluster,
    Dns,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Git => "git",
            Self::Ci => "ci",
            Self::Cluster => "cluster",
            Self::Dns => "dns",
        };
        f.write_str(name)
    }
}

/// A failed collaborator call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{backend}: {message}")]
pub struct UpstreamError {
    pub backend: Backend,
    pub message: String,
}

impl UpstreamError {
    pub fn new(backend: Backend, message: impl Into<String>) -> Self {
        Self {
            backend,
            message: message.into(),
        }
    }
}

/// Result of a collaborator call.
pub type UpstreamResult<T> = Result<T, UpstreamError>;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("configuration: {0}")]
    Configuration(#[from] ConfigError),

    #[error("environment {0} already exists")]
    Conflict(String),

    #[error("admission denied: {0}")]
    AdmissionDenied(String),

    #[error("{step} failed: {source}")]
    Upstream {
        step: &'static str,
        #[source]
        source: UpstreamError,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("internal: {0}")]
    Internal(String),
}

impl LifecycleError {
    /// Backend of an upstream failure.
    pub fn backend(&self) -> Option<Backend> {
        match self {
            Self::Upstream { source, .. } => Some(source.backend),
            _ => None,
        }
    }
}

/// Attach the failing pipeline step to an upstream error.
pub(crate) fn at(step: &'static str) -> impl FnOnce(UpstreamError) -> LifecycleError {
    move |source| LifecycleError::Upstream { step, source }
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_message_names_step_and_backend() {
        let err = at("create namespace")(UpstreamError::new(Backend::Cluster, "timeout"));
        assert_eq!(err.to_string(), "create namespace failed: cluster: timeout");
        assert_eq!(err.backend(), Some(Backend::Cluster));
    }

    #[test]
    fn config_errors_convert() {
        let err: LifecycleError = ConfigError::StableLimitExceedsTotal {
            max_universe: 1,
            max_stable_universe: 2,
        }
        .into();
        assert!(matches!(err, LifecycleError::Configuration(_)));
        assert_eq!(err.backend(), None);
    }
}
