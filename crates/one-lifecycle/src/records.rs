//! Persisted environment records.
//!
//! Each environment's record lives as a JSON config record inside its own
//! namespace, keyed by the environment name, so deleting the namespace
//! removes the record with it.

use std::sync::Arc;

use one_core::{Environment, EnvironmentStatus, NamespacePhase, NamespaceSummary};
use tracing::debug;

use crate::collaborators::Cluster;
use crate::error::{LifecycleError, LifecycleResult, at};

/// Whole-record get/put of environments through the cluster.
#[derive(Clone)]
pub struct EnvironmentRecords {
    cluster: Arc<dyn Cluster>,
}

impl EnvironmentRecords {
    pub fn new(cluster: Arc<dyn Cluster>) -> Self {
        Self { cluster }
    }

    pub async fn get(&self, name: &str) -> LifecycleResult<Option<Environment>> {
        let Some(bytes) = self
            .cluster
            .get_config_record(name, name)
            .await
            .map_err(at("read environment record"))?
        else {
            return Ok(None);
        };
        let env = serde_json::from_slice(&bytes).map_err(|e| {
            LifecycleError::Internal(format!("corrupt environment record {name}: {e}"))
        })?;
        Ok(Some(env))
    }

    pub async fn put(&self, env: &Environment) -> LifecycleResult<()> {
        let bytes = serde_json::to_vec(env).map_err(|e| {
            LifecycleError::Internal(format!("cannot encode environment record {}: {e}", env.name))
        })?;
        debug!(namespace = %env.name, bytes = bytes.len(), "writing environment record");
        self.cluster
            .put_config_record(&env.name, &env.name, bytes)
            .await
            .map_err(at("write environment record"))
    }
}

/// Status reported for a managed namespace.
///
/// A terminating namespace is `Deleting`; otherwise the record decides. A
/// namespace without a record is still being provisioned while a create for
/// it is in flight, and was abandoned by a failed pipeline otherwise.
pub fn derive_status(
    namespace: &NamespaceSummary,
    record: Option<&Environment>,
    creating: bool,
) -> EnvironmentStatus {
    if namespace.phase == NamespacePhase::Terminating {
        return EnvironmentStatus::Deleting;
    }
    match record {
        Some(env) => env.status,
        None if creating => EnvironmentStatus::Provisioning,
        None => EnvironmentStatus::Failed,
    }
}
