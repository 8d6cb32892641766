//! Standalone cluster backed by the embedded redb store.

use std::collections::BTreeSet;

use one_core::{IngressRule, NamespacePhase, NamespaceSummary, SelfDestructJob, is_managed, rewrite_host};
use one_lifecycle::{Backend, BoxFuture, ClonedHosts, Cluster, UpstreamError, UpstreamResult};
use one_state::{ClusterStore, StateError};
use tracing::{debug, info};

fn upstream(e: StateError) -> UpstreamError {
    UpstreamError::new(Backend::Cluster, e.to_string())
}

fn require_managed(name: &str) -> UpstreamResult<()> {
    if is_managed(name) {
        Ok(())
    } else {
        Err(UpstreamError::new(
            Backend::Cluster,
            format!("namespace {name} is not managed by one"),
        ))
    }
}

/// Cluster collaborator over a [`ClusterStore`].
#[derive(Clone)]
pub struct LocalCluster {
    store: ClusterStore,
}

impl LocalCluster {
    pub fn new(store: ClusterStore) -> Self {
        Self { store }
    }

    /// Replace-or-insert the routing rules of the source namespace.
    pub fn seed_templates(&self, source: &str, rules: &[IngressRule]) -> UpstreamResult<()> {
        for rule in rules {
            self.store
                .put_template_ingress(source, rule)
                .map_err(upstream)?;
        }
        info!(namespace = %source, rules = rules.len(), "ingress templates seeded");
        Ok(())
    }

    pub fn store(&self) -> &ClusterStore {
        &self.store
    }

    fn clone_rules(&self, source: &str, target: &str, projects: &[String]) -> UpstreamResult<ClonedHosts> {
        let mut cloned = ClonedHosts::new();
        for project in projects {
            let mut hosts = BTreeSet::new();
            for template in self
                .store
                .list_ingresses_for_project(source, project)
                .map_err(upstream)?
            {
                let rewritten: Vec<String> = template
                    .hosts
                    .iter()
                    .map(|host| rewrite_host(target, host))
                    .collect();
                hosts.extend(rewritten.iter().cloned());
                let rule = IngressRule {
                    project: project.clone(),
                    name: template.name,
                    hosts: rewritten,
                };
                self.store.put_ingress(target, &rule).map_err(upstream)?;
            }
            debug!(namespace = %target, %project, hosts = hosts.len(), "ingress cloned");
            cloned.insert(project.clone(), hosts);
        }
        Ok(cloned)
    }
}

impl Cluster for LocalCluster {
    fn create_namespace<'a>(&'a self, name: &'a str, stable: bool) -> BoxFuture<'a, UpstreamResult<()>> {
        Box::pin(async move {
            require_managed(name)?;
            self.store
                .put_namespace(&NamespaceSummary {
                    name: name.to_string(),
                    stable,
                    phase: NamespacePhase::Active,
                })
                .map_err(upstream)
        })
    }

    fn delete_namespace<'a>(&'a self, name: &'a str) -> BoxFuture<'a, UpstreamResult<()>> {
        Box::pin(async move {
            require_managed(name)?;
            if !self.store.mark_terminating(name).map_err(upstream)? {
                debug!(namespace = %name, "namespace already gone");
                return Ok(());
            }
            self.store.delete_namespace(name).map_err(upstream)?;
            Ok(())
        })
    }

    fn get_namespace<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, UpstreamResult<Option<NamespaceSummary>>> {
        Box::pin(async move { self.store.get_namespace(name).map_err(upstream) })
    }

    fn list_namespaces(&self) -> BoxFuture<'_, UpstreamResult<Vec<NamespaceSummary>>> {
        Box::pin(async move {
            let mut namespaces = self.store.list_namespaces().map_err(upstream)?;
            namespaces.retain(|ns| is_managed(&ns.name));
            Ok(namespaces)
        })
    }

    fn clone_ingress<'a>(
        &'a self,
        source: &'a str,
        target: &'a str,
        projects: &'a [String],
    ) -> BoxFuture<'a, UpstreamResult<ClonedHosts>> {
        Box::pin(async move { self.clone_rules(source, target, projects) })
    }

    fn put_config_record<'a>(
        &'a self,
        namespace: &'a str,
        key: &'a str,
        value: Vec<u8>,
    ) -> BoxFuture<'a, UpstreamResult<()>> {
        Box::pin(async move {
            self.store
                .put_config_record(namespace, key, &value)
                .map_err(upstream)
        })
    }

    fn get_config_record<'a>(
        &'a self,
        namespace: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, UpstreamResult<Option<Vec<u8>>>> {
        Box::pin(async move { self.store.get_config_record(namespace, key).map_err(upstream) })
    }

    fn create_scheduled_job<'a>(
        &'a self,
        namespace: &'a str,
        job: &'a SelfDestructJob,
    ) -> BoxFuture<'a, UpstreamResult<()>> {
        Box::pin(async move {
            self.store.put_scheduled_job(namespace, job).map_err(upstream)?;
            debug!(%namespace, job = %job.name, schedule = %job.schedule, suspended = job.suspended, "scheduled job created");
            Ok(())
        })
    }
}
