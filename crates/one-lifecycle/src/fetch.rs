//! Parallel branch listing across repositories.
//!
//! The coordinator spawns workers over a shared job queue, each publishing
//! one tagged result per job on a channel sized to the job count. The first
//! failing result cancels the remaining workers and is returned as-is.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use one_core::{BranchQueryJob, BranchSummary};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::collaborators::GitHost;
use crate::error::{LifecycleError, LifecycleResult, UpstreamResult, at};

/// Repository → latest commit of each branch.
pub type BranchListing = BTreeMap<String, Vec<BranchSummary>>;

/// One job's outcome, tagged with its repository.
struct FetchResult {
    repository: String,
    outcome: UpstreamResult<Vec<BranchSummary>>,
}

type JobQueue = Arc<Mutex<VecDeque<BranchQueryJob>>>;

/// Fan-out/fan-in pool of branch listing workers.
#[derive(Clone)]
pub struct RepoFetchPool {
    git: Arc<dyn GitHost>,
    max_workers: Option<usize>,
}

impl RepoFetchPool {
    /// A pool with one worker per job, optionally capped.
    pub fn new(git: Arc<dyn GitHost>, max_workers: Option<usize>) -> Self {
        Self { git, max_workers }
    }

    fn worker_count(&self, jobs: usize) -> usize {
        self.max_workers.map_or(jobs, |cap| cap.clamp(1, jobs))
    }

    /// Run every job and collect the results, or return the first error.
    pub async fn fetch(&self, jobs: Vec<BranchQueryJob>) -> LifecycleResult<BranchListing> {
        let total = jobs.len();
        if total == 0 {
            return Ok(BranchListing::new());
        }
        let workers = self.worker_count(total);
        debug!(jobs = total, workers, "starting branch fetch");

        let queue: JobQueue = Arc::new(Mutex::new(jobs.into()));
        let (result_tx, mut result_rx) = mpsc::channel(total);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            handles.push(tokio::spawn(run_worker(
                id,
                self.git.clone(),
                queue.clone(),
                result_tx.clone(),
                cancel_rx.clone(),
            )));
        }
        drop(result_tx);

        let mut listing = BranchListing::new();
        for _ in 0..total {
            match result_rx.recv().await {
                Some(FetchResult {
                    repository,
                    outcome: Ok(branches),
                }) => {
                    listing.insert(repository, branches);
                }
                Some(FetchResult {
                    repository,
                    outcome: Err(e),
                }) => {
                    let _ = cancel_tx.send(true);
                    warn!(%repository, error = %e, "branch fetch failed, cancelling remaining workers");
                    return Err(at("list branches")(e));
                }
                None => {
                    let _ = cancel_tx.send(true);
                    return Err(LifecycleError::Internal(
                        "fetch workers exited before publishing every result".to_string(),
                    ));
                }
            }
        }

        let _ = cancel_tx.send(true);
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "fetch worker did not shut down cleanly");
            }
        }
        debug!(repositories = listing.len(), "branch fetch complete");
        Ok(listing)
    }
}

async fn run_worker(
    id: usize,
    git: Arc<dyn GitHost>,
    queue: JobQueue,
    results: mpsc::Sender<FetchResult>,
    mut cancel: watch::Receiver<bool>,
) {
    loop {
        if *cancel.borrow() {
            break;
        }
        let next = queue.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
        let Some(job) = next else {
            break;
        };

        let outcome = query(git.as_ref(), &job).await;
        let result = FetchResult {
            repository: job.repository,
            outcome,
        };
        tokio::select! {
            sent = results.send(result) => {
                if sent.is_err() {
                    break;
                }
            }
            _ = cancel.changed() => break,
        }
    }
    debug!(worker = id, "fetch worker stopped");
}

/// List branches of one repository and resolve each head commit.
async fn query(git: &dyn GitHost, job: &BranchQueryJob) -> UpstreamResult<Vec<BranchSummary>> {
    let branches = git
        .list_branches(&job.repository, job.filter.as_deref())
        .await?;
    let mut summaries = Vec::with_capacity(branches.len());
    for branch in branches {
        let commit = git.get_commit(&job.repository, &branch.sha).await?;
        summaries.push(BranchSummary::new(branch, commit));
    }
    Ok(summaries)
}
