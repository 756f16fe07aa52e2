//! Periodic reconciliation of tracked repositories.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::store::RepoStore;

use super::engine::Indexer;

/// Drives steady-state ingestion: on every tick, each repository that is
/// not mid-backfill gets an incremental pass from its checkpoint. Passes
/// for distinct repositories run concurrently under a bounded pool; the
/// engine's per-repository lock keeps any single repository on one worker.
pub struct Reconciler {
    repos: Arc<dyn RepoStore>,
    indexer: Arc<Indexer>,
    interval: Duration,
    pool: Arc<Semaphore>,
    resume_from_checkpoint: bool,
}

impl Reconciler {
    /// Default width of the worker pool.
    pub const DEFAULT_POOL_SIZE: usize = 4;

    /// Create a reconciler ticking at `interval` with a pool of
    /// `pool_size` concurrent passes.
    ///
    /// When `resume_from_checkpoint` is false, every tick restarts each
    /// repository's scan at page 1 instead of continuing from `last_page`.
    pub fn new(
        repos: Arc<dyn RepoStore>,
        indexer: Arc<Indexer>,
        interval: Duration,
        pool_size: usize,
        resume_from_checkpoint: bool,
    ) -> Self {
        Self {
            repos,
            indexer,
            interval,
            pool: Arc::new(Semaphore::new(pool_size.max(1))),
            resume_from_checkpoint,
        }
    }

    /// Run until cancelled: resume interrupted backfills once, then sweep
    /// steady-state repositories on every tick.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "reconciler started");

        self.resume_interrupted(&cancel).await;

        let mut ticker = tokio::time::interval(self.interval);
        // The first tick of a tokio interval fires immediately; consume it
        // so sweeps start one full interval after the resume pass.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.run_once(&cancel).await,
            }
        }

        info!("reconciler stopped");
    }

    /// One reconciliation sweep over every steady-state repository.
    pub async fn run_once(&self, cancel: &CancellationToken) {
        self.sweep(cancel, false).await;
    }

    /// Resume backfills that a previous process left `indexing = true`.
    pub async fn resume_interrupted(&self, cancel: &CancellationToken) {
        self.sweep(cancel, true).await;
    }

    async fn sweep(&self, cancel: &CancellationToken, interrupted_only: bool) {
        let repos = match self.repos.get_all().await {
            Ok(repos) => repos,
            Err(e) => {
                error!(error = %e, "failed to load repositories for sweep");
                return;
            }
        };

        let mut passes = JoinSet::new();
        for mut repo in repos {
            if repo.indexing != interrupted_only {
                continue;
            }
            if cancel.is_cancelled() {
                break;
            }

            if !interrupted_only && !self.resume_from_checkpoint {
                repo.last_page = 1;
                repo.last_fetched_hash.clear();
            }

            let indexer = Arc::clone(&self.indexer);
            let pool = Arc::clone(&self.pool);
            let cancel = cancel.clone();

            passes.spawn(async move {
                let Ok(_permit) = pool.acquire_owned().await else {
                    return;
                };
                let coordinate = repo.coordinate();
                match indexer.run_pass(&repo, &cancel).await {
                    Ok(outcome) => {
                        info!(repo = %coordinate, ?outcome, "reconciliation pass finished");
                    }
                    Err(e) => {
                        error!(repo = %coordinate, error = %e, "reconciliation pass failed");
                    }
                }
            });
        }

        while passes.join_next().await.is_some() {}
    }
}
