//! Read-side HTTP endpoints.
//!
//! The ingestion engine stays internal; this router only reads from the
//! stores, plus the one write entry point that admission exposes
//! (`POST /repositories`) and the administrative start-date reset.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;

use crate::indexer::Admission;
use crate::store::{AuthorStore, CommitStore, RepoStore};

pub mod handlers;

pub use handlers::{AppError, CommitsResponse, CreateRepositoryRequest, ResetStartDateRequest};

use handlers::{
    create_repository, get_repository, list_commits, list_repositories, reset_start_date,
    top_authors,
};

/// Shared state for the read API.
#[derive(Clone)]
pub struct AppState {
    pub(crate) repos: Arc<dyn RepoStore>,
    pub(crate) commits: Arc<dyn CommitStore>,
    pub(crate) authors: Arc<dyn AuthorStore>,
    pub(crate) admission: Arc<Admission>,
}

impl AppState {
    /// Bundle the storage ports and the admission entry point.
    pub fn new(
        repos: Arc<dyn RepoStore>,
        commits: Arc<dyn CommitStore>,
        authors: Arc<dyn AuthorStore>,
        admission: Arc<Admission>,
    ) -> Self {
        Self {
            repos,
            commits,
            authors,
            admission,
        }
    }
}

/// Build the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/repositories",
            get(list_repositories).post(create_repository),
        )
        .route("/repositories/:owner/:name", get(get_repository))
        // The single segment here carries the repository *name*; it shares
        // the `:owner` parameter slot with the route above because the
        // router requires one parameter name per position.
        .route("/repositories/:owner/reset", post(reset_start_date))
        .route("/commits/:owner/:name", get(list_commits))
        .route("/authors/top", get(top_authors))
        .with_state(state)
}

/// Serve the read API until the cancellation token fires.
pub async fn serve(
    state: AppState,
    addr: SocketAddr,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}
