//! gitpulse - a continuous commit indexer for git-hosting repositories
//!
//! This crate provides:
//! - **upstream**: typed client for the hosting provider's HTTP API
//! - **store**: durable persistence ports with a SQLite implementation
//! - **indexer**: the resumable, rate-limit-aware ingestion engine
//! - **api**: read-side HTTP endpoints for repositories, commits, and
//!   author leaderboards
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use gitpulse::config::Config;
//! use gitpulse::indexer::Supervisor;
//! use gitpulse::store::SqliteStore;
//! use gitpulse::upstream::UpstreamClient;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let config = Config::default();
//!     let store = Arc::new(SqliteStore::in_memory().await.expect("store"));
//!     let upstream =
//!         Arc::new(UpstreamClient::with_token(config.upstream_token.clone()).expect("client"));
//!
//!     let supervisor = Supervisor::new(config, store, upstream);
//!     supervisor.run().await
//! }
//! ```

#![warn(missing_docs)]

pub mod api;
pub mod config;
pub mod error;
pub mod indexer;
pub mod store;
pub mod upstream;

// Re-export the types most callers reach for.
pub use config::Config;
pub use error::{Error, Result};
pub use indexer::{Admission, Indexer, PassOutcome, RateLimiter, Reconciler, Supervisor};
pub use store::{AuthorStore, CommitStore, RepoStore, SqliteStore};
pub use upstream::UpstreamClient;

/// Prelude for commonly used types.
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::indexer::prelude::*;
    pub use crate::store::{
        Author, AuthorStore, AuthorWithCount, Commit, CommitPageRequest, CommitStore, NewCommit,
        NewRepository, RepoStore, Repository, SaveOutcome, SortDirection, SqliteStore,
        StorageError,
    };
    pub use crate::upstream::{
        CommitEntry, CommitsPage, RepoMetadata, UpstreamClient, UpstreamError,
    };
}
