//! Read-API request handlers and error mapping.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::indexer::Error as IndexerError;
use crate::store::{
    AuthorWithCount, Commit, CommitPageRequest, Repository, SortDirection, StorageError,
};
use crate::upstream::UpstreamError;

use super::AppState;

/// Handler result with the crate's HTTP error mapping.
pub type ApiResult<T> = std::result::Result<T, AppError>;

/// An error response: status code plus a JSON body `{"error": ...}`.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!(status = %self.status, message = %self.message, "request failed");
        }
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, err.to_string()),
            StorageError::AlreadyExists(_) => Self::new(StatusCode::CONFLICT, err.to_string()),
            StorageError::Database(_) => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
        }
    }
}

impl From<IndexerError> for AppError {
    fn from(err: IndexerError) -> Self {
        match err {
            IndexerError::Validation(_) => Self::new(StatusCode::BAD_REQUEST, err.to_string()),
            IndexerError::AlreadyExists(_) => Self::new(StatusCode::CONFLICT, err.to_string()),
            IndexerError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, err.to_string()),
            IndexerError::Storage(e) => e.into(),
            IndexerError::Upstream(e) => match e {
                UpstreamError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, e.to_string()),
                UpstreamError::RateLimited { .. } => {
                    Self::new(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
                }
                other => Self::new(StatusCode::BAD_GATEWAY, other.to_string()),
            },
        }
    }
}

/// Body of `POST /repositories`.
#[derive(Debug, Deserialize)]
pub struct CreateRepositoryRequest {
    /// Repository owner.
    pub owner: String,
    /// Repository name.
    pub name: String,
    /// Optional start-of-history, `YYYY-MM-DD`.
    pub since: Option<String>,
}

/// Body of `POST /repositories/{name}/reset`.
#[derive(Debug, Deserialize)]
pub struct ResetStartDateRequest {
    /// New start-of-history, RFC3339.
    pub since: String,
}

/// Query of `GET /commits/{owner}/{name}`.
#[derive(Debug, Default, Deserialize)]
pub struct CommitsQuery {
    /// 1-based page.
    pub page: Option<u32>,
    /// Page size.
    pub limit: Option<u32>,
    /// Sort key; only `date` is supported.
    pub sort: Option<String>,
    /// Sort direction.
    pub direction: Option<SortDirection>,
}

/// Query of `GET /authors/top`.
#[derive(Debug, Deserialize)]
pub struct TopAuthorsQuery {
    /// Repository coordinate, `owner/name`.
    pub repo: String,
    /// Number of authors to return; must be positive.
    pub n: Option<i64>,
}

/// Response of `GET /commits/{owner}/{name}`.
#[derive(Debug, Serialize)]
pub struct CommitsResponse {
    /// Commits for the requested page.
    pub commits: Vec<Commit>,
    /// Total commit count for the repository.
    pub total: u64,
    /// Echoed page number.
    pub page: u32,
    /// Echoed page size.
    pub limit: u32,
}

/// `GET /repositories`
pub async fn list_repositories(State(state): State<AppState>) -> ApiResult<Json<Vec<Repository>>> {
    let repos = state.repos.get_all().await?;
    Ok(Json(repos))
}

/// `GET /repositories/{owner}/{name}`
pub async fn get_repository(
    State(state): State<AppState>,
    Path((owner, name)): Path<(String, String)>,
) -> ApiResult<Json<Repository>> {
    let repo = state
        .repos
        .get_by_name(&name)
        .await?
        .filter(|r| r.owner_name == owner)
        .ok_or_else(|| AppError::not_found(format!("repository {}/{}", owner, name)))?;

    Ok(Json(repo))
}

/// `POST /repositories`
pub async fn create_repository(
    State(state): State<AppState>,
    Json(body): Json<CreateRepositoryRequest>,
) -> ApiResult<(StatusCode, Json<Repository>)> {
    let since = body.since.as_deref().map(parse_start_date).transpose()?;

    let coordinate = format!("{}/{}", body.owner, body.name);
    let repo = state.admission.start_indexing(&coordinate, since).await?;

    Ok((StatusCode::CREATED, Json(repo)))
}

/// `POST /repositories/{name}/reset`
///
/// Takes effect on the next reconciliation pass; previously stored commits
/// are preserved by insert idempotence, older ones get backfilled.
pub async fn reset_start_date(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<ResetStartDateRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let since = DateTime::parse_from_rfc3339(&body.since)
        .map_err(|_| AppError::bad_request("invalid date format, use RFC3339"))?
        .with_timezone(&Utc);

    state.repos.set_since(&name, since).await?;

    Ok(Json(json!({ "message": "start date reset successfully" })))
}

/// `GET /commits/{owner}/{name}`
pub async fn list_commits(
    State(state): State<AppState>,
    Path((owner, name)): Path<(String, String)>,
    Query(query): Query<CommitsQuery>,
) -> ApiResult<Json<CommitsResponse>> {
    if let Some(sort) = &query.sort {
        if sort != "date" {
            return Err(AppError::bad_request(format!(
                "unsupported sort key {:?}, only \"date\" is available",
                sort
            )));
        }
    }

    let repo = state
        .repos
        .get_by_name(&name)
        .await?
        .filter(|r| r.owner_name == owner)
        .ok_or_else(|| AppError::not_found(format!("repository {}/{}", owner, name)))?;

    let page_req = CommitPageRequest {
        page: query.page.unwrap_or(1).max(1),
        limit: query.limit.unwrap_or(50).clamp(1, 500),
        direction: query.direction.unwrap_or_default(),
    };

    let (commits, total) = state.commits.list_by_repo(repo.id, page_req).await?;

    Ok(Json(CommitsResponse {
        commits,
        total,
        page: page_req.page,
        limit: page_req.limit,
    }))
}

/// `GET /authors/top`
pub async fn top_authors(
    State(state): State<AppState>,
    Query(query): Query<TopAuthorsQuery>,
) -> ApiResult<Json<Vec<AuthorWithCount>>> {
    let n = query
        .n
        .filter(|n| *n > 0)
        .ok_or_else(|| AppError::bad_request("n must be a positive integer"))?;

    let (_, name) = crate::indexer::parse_coordinate(&query.repo)?;

    let authors = state.authors.top_for_repo(&name, n as u32).await?;
    Ok(Json(authors))
}

fn parse_start_date(input: &str) -> ApiResult<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .map_err(|_| AppError::bad_request("invalid date format for 'since', use YYYY-MM-DD"))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| AppError::bad_request("invalid date for 'since'"))?;
    Ok(midnight.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start_date() {
        let parsed = parse_start_date("2015-06-01").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2015-06-01T00:00:00+00:00");

        assert!(parse_start_date("2015-13-01").is_err());
        assert!(parse_start_date("June 1st").is_err());
        assert!(parse_start_date("2015-06-01T10:00:00Z").is_err());
    }

    #[test]
    fn test_storage_error_mapping() {
        let err: AppError = StorageError::NotFound("repository x".to_string()).into();
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        let err: AppError = StorageError::AlreadyExists("x".to_string()).into();
        assert_eq!(err.status, StatusCode::CONFLICT);
    }

    #[test]
    fn test_indexer_error_mapping() {
        let err: AppError = IndexerError::validation("bad").into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let err: AppError = IndexerError::AlreadyExists("x".to_string()).into();
        assert_eq!(err.status, StatusCode::CONFLICT);

        let err: AppError = IndexerError::Upstream(UpstreamError::NotFound("x".to_string())).into();
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        let err: AppError = IndexerError::Upstream(UpstreamError::RateLimited {
            reset_at: Utc::now(),
        })
        .into();
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);

        let err: AppError =
            IndexerError::Upstream(UpstreamError::Auth("bad token".to_string())).into();
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
    }
}
