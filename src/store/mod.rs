//! Durable persistence ports and their SQLite implementation.
//!
//! Three narrow ports cover the ingestion engine's storage needs:
//!
//! - [`RepoStore`]: repository rows and their ingestion checkpoints
//! - [`CommitStore`]: idempotent commit inserts and listings
//! - [`AuthorStore`]: race-safe author identity and leaderboards
//!
//! The engine performs no multi-statement transactions; correctness relies
//! on per-row uniqueness constraints (`repositories.name`, `commits.hash`,
//! `authors.(name, email)`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub mod entities;
pub mod sqlite;

pub use entities::{
    Author, AuthorWithCount, Commit, CommitPageRequest, NewCommit, NewRepository, Repository,
    SaveOutcome, SortDirection,
};
pub use sqlite::SqliteStore;

/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Underlying database failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A natural-key uniqueness constraint rejected the write.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The referenced row does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

/// Repository rows and their ingestion checkpoints.
#[async_trait]
pub trait RepoStore: Send + Sync {
    /// Insert a new repository with `last_page = 1` and `indexing = true`.
    ///
    /// A uniqueness violation on the name maps to
    /// [`StorageError::AlreadyExists`]; this is the backstop for racing
    /// admissions of the same coordinate.
    async fn create(&self, repo: NewRepository) -> Result<Repository>;

    /// Look up a repository by its unique name.
    async fn get_by_name(&self, name: &str) -> Result<Option<Repository>>;

    /// All tracked repositories.
    async fn get_all(&self) -> Result<Vec<Repository>>;

    /// Persist the `(last_page, last_fetched_hash, indexing)` checkpoint.
    async fn update_checkpoint(
        &self,
        id: i64,
        last_page: i64,
        last_hash: &str,
        indexing: bool,
    ) -> Result<()>;

    /// Reset the start-of-history for a repository by name.
    async fn set_since(&self, name: &str, since: DateTime<Utc>) -> Result<()>;

    /// Force the indexing flag for every repository.
    async fn set_indexing_all(&self, indexing: bool) -> Result<()>;
}

/// Idempotent commit persistence and listings.
#[async_trait]
pub trait CommitStore: Send + Sync {
    /// Insert a commit. A hash collision is reported as
    /// [`SaveOutcome::Duplicate`], which is a success, not an error.
    async fn save(&self, commit: NewCommit) -> Result<SaveOutcome>;

    /// Look up a commit by its unique hash.
    async fn get_by_hash(&self, hash: &str) -> Result<Option<Commit>>;

    /// List commits for one repository with offset pagination, plus the
    /// total row count for that repository.
    async fn list_by_repo(
        &self,
        repository_id: i64,
        page: CommitPageRequest,
    ) -> Result<(Vec<Commit>, u64)>;
}

/// Author identity and per-repository leaderboards.
#[async_trait]
pub trait AuthorStore: Send + Sync {
    /// Fetch the author identified by `(name, email)`, creating the row if
    /// absent. Safe under concurrent calls for the same pair: at most one
    /// row is ever created and losers observe the winner's row.
    async fn get_or_create(&self, name: &str, email: &str) -> Result<Author>;

    /// Top authors by commit count within the named repository, ordered by
    /// `(commit_count DESC, id ASC)`, at most `limit` rows.
    async fn top_for_repo(&self, repo_name: &str, limit: u32) -> Result<Vec<AuthorWithCount>>;
}
