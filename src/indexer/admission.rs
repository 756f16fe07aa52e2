//! Admission of new repositories into the tracked set.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info};

use crate::store::{NewRepository, RepoStore, Repository};
use crate::upstream::UpstreamClient;

use super::engine::Indexer;
use super::error::{Error, Result};

/// Split and validate an `owner/name` coordinate.
///
/// Exactly one slash with non-empty halves; anything else is a validation
/// error surfaced to the caller.
pub fn parse_coordinate(input: &str) -> Result<(String, String)> {
    let mut parts = input.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(owner), Some(name), None) if !owner.is_empty() && !name.is_empty() => {
            Ok((owner.to_string(), name.to_string()))
        }
        _ => Err(Error::validation(format!(
            "repository coordinate must have the shape owner/name, got {:?}",
            input
        ))),
    }
}

/// Registers repositories for tracking and spawns their initial backfill.
pub struct Admission {
    repos: Arc<dyn RepoStore>,
    upstream: Arc<UpstreamClient>,
    indexer: Arc<Indexer>,
    tracker: TaskTracker,
    cancel: CancellationToken,
    default_since: DateTime<Utc>,
}

impl Admission {
    /// Create an admission service bound to the supervisor's task tracker
    /// and cancellation signal.
    pub fn new(
        repos: Arc<dyn RepoStore>,
        upstream: Arc<UpstreamClient>,
        indexer: Arc<Indexer>,
        tracker: TaskTracker,
        cancel: CancellationToken,
        default_since: DateTime<Utc>,
    ) -> Self {
        Self {
            repos,
            upstream,
            indexer,
            tracker,
            cancel,
            default_since,
        }
    }

    /// Admit a repository and start its backfill in the background.
    ///
    /// Returns the persisted row immediately; ingestion progress is
    /// observable through the checkpoint columns. The read-then-write on
    /// the name is racy by itself; the unique index on `repositories.name`
    /// resolves racing admissions to one row and one `AlreadyExists`.
    pub async fn start_indexing(
        &self,
        coordinate: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Repository> {
        let (owner, name) = parse_coordinate(coordinate)?;

        if self.repos.get_by_name(&name).await?.is_some() {
            return Err(Error::AlreadyExists(coordinate.to_string()));
        }

        let meta = self.upstream.fetch_repo_metadata(&owner, &name).await?;

        let repo = match self
            .repos
            .create(NewRepository {
                owner_name: meta.owner,
                name: meta.name,
                description: meta.description,
                language: meta.language,
                url: meta.url,
                forks: meta.forks,
                stars: meta.stars,
                open_issues: meta.open_issues,
                watchers: meta.watchers,
                since: since.unwrap_or(self.default_since),
            })
            .await
        {
            Ok(repo) => repo,
            Err(crate::store::StorageError::AlreadyExists(_)) => {
                return Err(Error::AlreadyExists(coordinate.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        info!(repo = %repo.coordinate(), since = %repo.since, "repository admitted");
        self.spawn_backfill(repo.clone());

        Ok(repo)
    }

    /// Seed an empty store with the configured default repository.
    ///
    /// Returns the admitted repository, or `None` when the store already
    /// tracks something (including losing a seed race).
    pub async fn seed(&self, coordinate: &str) -> Result<Option<Repository>> {
        if !self.repos.get_all().await?.is_empty() {
            return Ok(None);
        }

        info!(repo = coordinate, "seeding empty store with default repository");
        match self.start_indexing(coordinate, None).await {
            Ok(repo) => Ok(Some(repo)),
            Err(Error::AlreadyExists(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn spawn_backfill(&self, repo: Repository) {
        let indexer = Arc::clone(&self.indexer);
        let cancel = self.cancel.clone();

        self.tracker.spawn(async move {
            let coordinate = repo.coordinate();
            match indexer.run_pass(&repo, &cancel).await {
                Ok(outcome) => info!(repo = %coordinate, ?outcome, "backfill finished"),
                Err(e) => error!(repo = %coordinate, error = %e, "backfill failed"),
            }
        });
    }
}
