//! Persisted domain entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A tracked repository with its ingestion checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Repository {
    /// Internal identity.
    pub id: i64,
    /// Repository owner (user or organization).
    pub owner_name: String,
    /// Repository name; unique across the system.
    pub name: String,
    /// Repository description.
    pub description: Option<String>,
    /// Primary programming language.
    pub language: Option<String>,
    /// Web URL of the repository.
    pub url: String,
    /// Fork count at last metadata fetch.
    pub forks: i64,
    /// Star count at last metadata fetch.
    pub stars: i64,
    /// Open issue count at last metadata fetch.
    pub open_issues: i64,
    /// Watcher count at last metadata fetch.
    pub watchers: i64,
    /// Effective start-of-history for ingestion.
    pub since: DateTime<Utc>,
    /// Checkpoint: next page to fetch, always >= 1.
    pub last_page: i64,
    /// Checkpoint: last successfully persisted commit hash on the current
    /// pagination line. Advisory; correctness never depends on it.
    pub last_fetched_hash: String,
    /// Whether the initial backfill is still in progress.
    pub indexing: bool,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Row update time.
    pub updated_at: DateTime<Utc>,
}

impl Repository {
    /// The `owner/name` coordinate of this repository.
    #[must_use]
    pub fn coordinate(&self) -> String {
        format!("{}/{}", self.owner_name, self.name)
    }
}

/// Fields needed to admit a new repository.
#[derive(Debug, Clone)]
pub struct NewRepository {
    /// Repository owner.
    pub owner_name: String,
    /// Repository name.
    pub name: String,
    /// Repository description.
    pub description: Option<String>,
    /// Primary programming language.
    pub language: Option<String>,
    /// Web URL.
    pub url: String,
    /// Fork count.
    pub forks: i64,
    /// Star count.
    pub stars: i64,
    /// Open issue count.
    pub open_issues: i64,
    /// Watcher count.
    pub watchers: i64,
    /// Start-of-history for ingestion.
    pub since: DateTime<Utc>,
}

/// A persisted commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Commit {
    /// Internal identity.
    pub id: i64,
    /// Commit hash; unique across the system.
    pub hash: String,
    /// Owning repository.
    pub repository_id: i64,
    /// Commit author.
    pub author_id: i64,
    /// Full commit message.
    pub message: String,
    /// Author date of the commit.
    pub date: DateTime<Utc>,
    /// Ingestion time.
    pub created_at: DateTime<Utc>,
}

/// Fields needed to persist a commit.
#[derive(Debug, Clone)]
pub struct NewCommit {
    /// Owning repository.
    pub repository_id: i64,
    /// Commit author.
    pub author_id: i64,
    /// Commit hash.
    pub hash: String,
    /// Full commit message.
    pub message: String,
    /// Author date.
    pub date: DateTime<Utc>,
}

/// A commit author, identified by the `(name, email)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Author {
    /// Internal identity.
    pub id: i64,
    /// Author name.
    pub name: String,
    /// Author email.
    pub email: String,
}

/// An author together with their commit count within one repository.
///
/// The count is a query-time projection; it is never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuthorWithCount {
    /// Internal identity.
    pub id: i64,
    /// Author name.
    pub name: String,
    /// Author email.
    pub email: String,
    /// Number of commits by this author in the queried repository.
    pub commit_count: i64,
}

/// Outcome of an idempotent commit insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The commit was newly persisted.
    Committed,
    /// A commit with the same hash already existed; nothing was written.
    Duplicate,
}

/// Sort direction for commit listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    /// Oldest first.
    Asc,
    /// Newest first.
    #[default]
    Desc,
}

/// Offset pagination for commit listings.
#[derive(Debug, Clone, Copy)]
pub struct CommitPageRequest {
    /// 1-based page number.
    pub page: u32,
    /// Page size.
    pub limit: u32,
    /// Ordering by author date.
    pub direction: SortDirection,
}

impl Default for CommitPageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            limit: 50,
            direction: SortDirection::Desc,
        }
    }
}

impl CommitPageRequest {
    /// Row offset implied by page and limit.
    #[must_use]
    pub fn offset(&self) -> u32 {
        self.page.saturating_sub(1) * self.limit
    }
}
