//! Per-repository ingestion state machine.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::store::{
    AuthorStore, CommitStore, NewCommit, RepoStore, Repository, SaveOutcome,
};
use crate::upstream::{UpstreamClient, UpstreamError};

use super::error::Result;
use super::limiter::{Backoff, RateLimiter};

/// Page size requested from the upstream; its maximum, to minimize the
/// number of requests spent per repository.
pub const PER_PAGE: u32 = 100;

/// How many times a failing page is retried before the pass aborts and the
/// repository is left for the reconciler to resume.
pub const MAX_TRANSIENT_RETRIES: u32 = 5;

/// How a pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// The pass ran to the end of pagination.
    Completed {
        /// Pages fully processed and checkpointed.
        pages: u32,
        /// Commits newly persisted.
        inserted: u64,
    },
    /// Transient errors exhausted the retry budget; the repository keeps
    /// its checkpoint and `indexing` state for a later resume.
    Aborted,
    /// The root cancellation signal fired. The last written checkpoint is
    /// durable; work after it will be repeated safely on restart.
    Cancelled,
    /// Another worker already holds this repository's pass lock.
    Skipped,
}

/// Keyed locks guaranteeing at most one pass per repository at a time.
#[derive(Debug, Default)]
struct RepoLocks {
    inner: StdMutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl RepoLocks {
    fn for_repo(&self, id: i64) -> Arc<Mutex<()>> {
        let mut map = self.inner.lock().expect("repo lock map poisoned");
        Arc::clone(map.entry(id).or_default())
    }
}

/// The ingestion engine: advances pagination for one repository at a time,
/// persists commits idempotently, and checkpoints after every page.
pub struct Indexer {
    repos: Arc<dyn RepoStore>,
    commits: Arc<dyn CommitStore>,
    authors: Arc<dyn AuthorStore>,
    upstream: Arc<UpstreamClient>,
    limiter: Arc<RateLimiter>,
    locks: RepoLocks,
    per_page: u32,
    retry_base: Duration,
    retry_cap: Duration,
}

impl Indexer {
    /// Create an engine over the given ports.
    pub fn new(
        repos: Arc<dyn RepoStore>,
        commits: Arc<dyn CommitStore>,
        authors: Arc<dyn AuthorStore>,
        upstream: Arc<UpstreamClient>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            repos,
            commits,
            authors,
            upstream,
            limiter,
            locks: RepoLocks::default(),
            per_page: PER_PAGE,
            retry_base: Backoff::DEFAULT_BASE,
            retry_cap: Backoff::DEFAULT_CAP,
        }
    }

    /// Override the page size (tests exercise pagination with small pages).
    #[must_use]
    pub fn with_per_page(mut self, per_page: u32) -> Self {
        self.per_page = per_page;
        self
    }

    /// Override the transient-retry backoff window.
    #[must_use]
    pub fn with_retry_window(mut self, base: Duration, cap: Duration) -> Self {
        self.retry_base = base;
        self.retry_cap = cap;
        self
    }

    /// The shared rate-limit coordinator.
    #[must_use]
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Run one ingestion pass for a repository, starting from its stored
    /// checkpoint.
    ///
    /// Commits are persisted in the order the upstream returned them on
    /// each page; pages advance strictly. A checkpoint is written after
    /// each fully-processed page, so a crash re-runs at most one page,
    /// which is safe because commit inserts are idempotent on the hash.
    pub async fn run_pass(
        &self,
        repo: &Repository,
        cancel: &CancellationToken,
    ) -> Result<PassOutcome> {
        let lock = self.locks.for_repo(repo.id);
        let _guard = match lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!(repo = %repo.coordinate(), "pass already running, skipping");
                return Ok(PassOutcome::Skipped);
            }
        };

        let mut page = u32::try_from(repo.last_page.max(1)).unwrap_or(1);
        let mut last_hash = repo.last_fetched_hash.clone();
        let mut pages_done = 0u32;
        let mut inserted = 0u64;

        info!(repo = %repo.coordinate(), page, "starting ingestion pass");

        loop {
            let fetched = match self.fetch_page(repo, page, cancel).await? {
                Fetched::Page(page_data) => page_data,
                Fetched::Cancelled => return Ok(PassOutcome::Cancelled),
                Fetched::Aborted => return Ok(PassOutcome::Aborted),
            };

            for entry in &fetched.commits {
                if cancel.is_cancelled() {
                    return Ok(PassOutcome::Cancelled);
                }

                // The existence probe is an optimization; the Duplicate
                // outcome of save is what actually guarantees idempotence.
                if self.commits.get_by_hash(&entry.hash).await?.is_some() {
                    last_hash = entry.hash.clone();
                    continue;
                }

                let author = self
                    .authors
                    .get_or_create(&entry.author_name, &entry.author_email)
                    .await?;

                let outcome = self
                    .commits
                    .save(NewCommit {
                        repository_id: repo.id,
                        author_id: author.id,
                        hash: entry.hash.clone(),
                        message: entry.message.clone(),
                        date: entry.date,
                    })
                    .await?;

                match outcome {
                    SaveOutcome::Committed => {
                        inserted += 1;
                        last_hash = entry.hash.clone();
                    }
                    SaveOutcome::Duplicate => {
                        last_hash = entry.hash.clone();
                    }
                }
            }

            if fetched.commits.is_empty() && !fetched.has_more && page > 1 {
                // Steady state reached the end of a stale pagination line.
                // Rewind to page 1 so the next tick scans the newest-first
                // head again and discovers freshly pushed commits.
                self.repos.update_checkpoint(repo.id, 1, "", false).await?;
                info!(
                    repo = %repo.coordinate(),
                    page, "no commits at checkpointed page, rewound to page 1"
                );
                return Ok(PassOutcome::Completed {
                    pages: pages_done,
                    inserted,
                });
            }

            self.repos
                .update_checkpoint(repo.id, i64::from(page), &last_hash, fetched.has_more)
                .await?;
            pages_done += 1;

            if !fetched.has_more {
                info!(
                    repo = %repo.coordinate(),
                    pages = pages_done,
                    inserted,
                    "ingestion pass complete"
                );
                return Ok(PassOutcome::Completed {
                    pages: pages_done,
                    inserted,
                });
            }

            page += 1;
        }
    }

    /// Fetch one page, absorbing rate limits into the shared pause and
    /// retrying transient failures with capped exponential backoff.
    async fn fetch_page(
        &self,
        repo: &Repository,
        page: u32,
        cancel: &CancellationToken,
    ) -> Result<Fetched> {
        let mut backoff = Backoff::with(self.retry_base, self.retry_cap);

        loop {
            // Honor a pause another worker may have published. When the
            // limiter is clear, wait_until_clear is immediately ready too,
            // so the poll order must be biased for cancellation to win.
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(Fetched::Cancelled),
                _ = self.limiter.wait_until_clear() => {}
            }

            let result = self
                .upstream
                .fetch_commits_page(&repo.owner_name, &repo.name, repo.since, page, self.per_page)
                .await;

            match result {
                Ok(page_data) => return Ok(Fetched::Page(page_data)),
                Err(UpstreamError::RateLimited { reset_at }) => {
                    self.limiter.observe_reset(reset_at);
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(Fetched::Cancelled),
                        _ = self.limiter.wait_until_clear() => {}
                    }
                }
                Err(err) => {
                    if backoff.attempts() >= MAX_TRANSIENT_RETRIES {
                        error!(
                            repo = %repo.coordinate(),
                            page,
                            error = %err,
                            "retry budget exhausted, aborting pass"
                        );
                        return Ok(Fetched::Aborted);
                    }
                    let delay = backoff.next_delay();
                    warn!(
                        repo = %repo.coordinate(),
                        page,
                        error = %err,
                        retry_in_ms = delay.as_millis() as u64,
                        "page fetch failed, backing off"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(Fetched::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}

enum Fetched {
    Page(crate::upstream::CommitsPage),
    Cancelled,
    Aborted,
}
