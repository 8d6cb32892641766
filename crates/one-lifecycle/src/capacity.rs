//! Admission control over concurrently active environments.

use std::sync::Arc;

use one_core::{CapacityLimits, EnvironmentStatus, NamespacePhase};
use tracing::{debug, info};

use crate::collaborators::Cluster;
use crate::error::{LifecycleResult, at};
use crate::records::EnvironmentRecords;

/// Active environment counts, derived on demand.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapacityCounters {
    pub active: u32,
    pub active_stable: u32,
}

impl CapacityCounters {
    /// Whether one more environment fits under `limits`.
    pub fn admits(&self, limits: &CapacityLimits, stable: bool) -> bool {
        if self.active >= limits.max_universe {
            return false;
        }
        !(stable && self.active_stable >= limits.max_stable_universe)
    }
}

/// Counts active environments and gates creation.
#[derive(Clone)]
pub struct CapacityGovernor {
    limits: CapacityLimits,
    cluster: Arc<dyn Cluster>,
    records: EnvironmentRecords,
}

impl CapacityGovernor {
    pub fn new(limits: CapacityLimits, cluster: Arc<dyn Cluster>, records: EnvironmentRecords) -> Self {
        Self {
            limits,
            cluster,
            records,
        }
    }

    pub fn limits(&self) -> CapacityLimits {
        self.limits
    }

    /// Count environments whose status is Active, split by stability.
    pub async fn counters(&self) -> LifecycleResult<CapacityCounters> {
        let namespaces = self
            .cluster
            .list_namespaces()
            .await
            .map_err(at("list namespaces"))?;

        let mut counters = CapacityCounters::default();
        for ns in namespaces {
            if ns.phase == NamespacePhase::Terminating {
                continue;
            }
            let Some(env) = self.records.get(&ns.name).await? else {
                continue;
            };
            if env.status == EnvironmentStatus::Active {
                counters.active += 1;
                if env.stable {
                    counters.active_stable += 1;
                }
            }
        }
        Ok(counters)
    }

    /// Whether a new environment may be created.
    ///
    /// Fails with a configuration error when the stable limit exceeds the
    /// total limit, before counting anything.
    pub async fn can_create(&self, stable: bool) -> LifecycleResult<bool> {
        self.limits.check()?;
        let counters = self.counters().await?;
        let admitted = counters.admits(&self.limits, stable);
        debug!(
            active = counters.active,
            active_stable = counters.active_stable,
            max_universe = self.limits.max_universe,
            max_stable_universe = self.limits.max_stable_universe,
            stable,
            admitted,
            "capacity check"
        );
        if !admitted {
            info!(stable, "environment creation denied by capacity limits");
        }
        Ok(admitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMITS: CapacityLimits = CapacityLimits {
        max_universe: 3,
        max_stable_universe: 1,
    };

    #[test]
    fn full_universe_denies() {
        let counters = CapacityCounters {
            active: 3,
            active_stable: 0,
        };
        assert!(!counters.admits(&LIMITS, false));
        assert!(!counters.admits(&LIMITS, true));
    }

    #[test]
    fn stable_limit_applies_only_to_stable() {
        let counters = CapacityCounters {
            active: 1,
            active_stable: 1,
        };
        assert!(counters.admits(&LIMITS, false));
        assert!(!counters.admits(&LIMITS, true));
    }

    #[test]
    fn empty_admits() {
        assert!(CapacityCounters::default().admits(&LIMITS, true));
    }

    #[test]
    fn zero_limits_deny_everything() {
        let limits = CapacityLimits {
            max_universe: 0,
            max_stable_universe: 0,
        };
        assert!(!CapacityCounters::default().admits(&limits, false));
    }
}
