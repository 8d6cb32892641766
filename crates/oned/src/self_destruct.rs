//! Self-destruct runner.
//!
//! Every environment carries a scheduled job whose cron expression says
//! when it should be torn down. The runner wakes up on an interval, finds
//! jobs that came due since the previous pass, and deletes their
//! environments with the secret embedded in the job's delete URL. Stable
//! environments carry a suspended job and are never touched.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tracing::{debug, error, info, warn};

use one_core::{NamespacePhase, SelfDestructJob, is_managed};
use one_lifecycle::{DeleteCredential, EnvironmentLifecycle};
use one_state::ClusterStore;

/// Parse a cron expression. Five-field expressions (minute first) get a
/// zero seconds field prepended.
pub fn parse_schedule(expr: &str) -> Result<Schedule, cron::error::Error> {
    let normalized = if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    };
    Schedule::from_str(&normalized)
}

/// The delete secret carried in a job's delete URL.
fn delete_secret(job: &SelfDestructJob) -> Option<&str> {
    let (_, query) = job.delete_url.split_once('?')?;
    query
        .split('&')
        .find_map(|pair| pair.strip_prefix("delete_secret="))
        .filter(|secret| !secret.is_empty())
}

pub struct SelfDestructRunner {
    lifecycle: EnvironmentLifecycle,
    store: ClusterStore,
    last_check: DateTime<Utc>,
}

impl SelfDestructRunner {
    pub fn new(lifecycle: EnvironmentLifecycle, store: ClusterStore) -> Self {
        Self::starting_at(lifecycle, store, Utc::now())
    }

    /// A runner whose first pass looks for firings after `last_check`.
    pub fn starting_at(
        lifecycle: EnvironmentLifecycle,
        store: ClusterStore,
        last_check: DateTime<Utc>,
    ) -> Self {
        Self {
            lifecycle,
            store,
            last_check,
        }
    }

    /// Jobs in active managed namespaces whose schedule fired in
    /// `(last_check, now]`.
    fn due_jobs(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<(String, SelfDestructJob)>> {
        let mut due = Vec::new();
        for ns in self.store.list_namespaces()? {
            if !is_managed(&ns.name) || ns.phase != NamespacePhase::Active {
                continue;
            }
            for job in self.store.list_scheduled_jobs(&ns.name)? {
                if job.suspended {
                    continue;
                }
                let schedule = match parse_schedule(&job.schedule) {
                    Ok(schedule) => schedule,
                    Err(e) => {
                        warn!(namespace = %ns.name, job = %job.name, schedule = %job.schedule, error = %e, "unparseable self-destruct schedule");
                        continue;
                    }
                };
                let fired = schedule
                    .after(&self.last_check)
                    .next()
                    .is_some_and(|at| at <= now);
                if fired {
                    due.push((ns.name.clone(), job));
                }
            }
        }
        Ok(due)
    }

    /// Run one pass at `now`. Returns the environments deleted.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> anyhow::Result<Vec<String>> {
        let due = self.due_jobs(now)?;
        self.last_check = now;

        let mut deleted = Vec::new();
        for (namespace, job) in due {
            let Some(secret) = delete_secret(&job) else {
                warn!(%namespace, job = %job.name, "self-destruct job has no delete secret");
                continue;
            };
            info!(%namespace, job = %job.name, "self-destruct job fired");
            match self
                .lifecycle
                .delete(&namespace, DeleteCredential::Secret(Some(secret)))
                .await
            {
                Ok(()) => deleted.push(namespace),
                Err(e) => error!(%namespace, error = %e, "self-destruct failed"),
            }
        }
        if deleted.is_empty() {
            debug!("no self-destruct jobs due");
        }
        Ok(deleted)
    }

    /// Run the self-destruct loop until `shutdown` changes.
    pub async fn run(&mut self, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "self-destruct runner started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.tick(Utc::now()).await {
                        error!(error = %e, "self-destruct pass failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("self-destruct runner shutting down");
                    break;
                }
            }
        }
    }
}
