//! Typed client for the hosting provider's HTTP API.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;

use super::error::{Result, UpstreamError};

/// Maximum page size the upstream accepts.
pub const MAX_PER_PAGE: u32 = 100;

const METADATA_TIMEOUT: Duration = Duration::from_secs(10);
const COMMITS_TIMEOUT: Duration = Duration::from_secs(30);

/// API response for a repository.
#[derive(Debug, Deserialize)]
struct ApiRepo {
    name: String,
    html_url: String,
    description: Option<String>,
    language: Option<String>,
    owner: ApiOwner,
    #[serde(default)]
    forks_count: i64,
    #[serde(default)]
    stargazers_count: i64,
    #[serde(default)]
    open_issues_count: i64,
    #[serde(default)]
    watchers_count: i64,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct ApiOwner {
    login: String,
}

/// API response for a single commit in a listing.
#[derive(Debug, Deserialize)]
struct ApiCommit {
    sha: String,
    commit: ApiCommitDetail,
}

#[derive(Debug, Deserialize)]
struct ApiCommitDetail {
    message: String,
    author: ApiCommitAuthor,
}

#[derive(Debug, Deserialize)]
struct ApiCommitAuthor {
    name: String,
    email: String,
    date: DateTime<Utc>,
}

/// Repository metadata as reported by the upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoMetadata {
    /// Repository owner (user or organization).
    pub owner: String,
    /// Repository name.
    pub name: String,
    /// Web URL of the repository.
    pub url: String,
    /// Repository description.
    pub description: Option<String>,
    /// Primary programming language.
    pub language: Option<String>,
    /// Fork count.
    pub forks: i64,
    /// Star count.
    pub stars: i64,
    /// Open issue count.
    pub open_issues: i64,
    /// Watcher count.
    pub watchers: i64,
    /// When the repository was created upstream.
    pub created_at: Option<DateTime<Utc>>,
    /// When the repository was last updated upstream.
    pub updated_at: Option<DateTime<Utc>>,
}

/// A single commit as returned by a page listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitEntry {
    /// Commit hash, unique per commit.
    pub hash: String,
    /// Full commit message.
    pub message: String,
    /// Author name.
    pub author_name: String,
    /// Author email.
    pub author_email: String,
    /// Author date of the commit.
    pub date: DateTime<Utc>,
}

/// One page of a commit listing.
#[derive(Debug, Clone, Default)]
pub struct CommitsPage {
    /// Commits in upstream order (newest first).
    pub commits: Vec<CommitEntry>,
    /// Whether another page may follow. True iff the page was full.
    pub has_more: bool,
}

/// Typed wrapper over the remote hosting API.
///
/// The client reports rate-limit state through [`UpstreamError::RateLimited`]
/// and never sleeps itself; pacing is coordinated by the ingestion engine so
/// that concurrent workers share one pause.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl UpstreamClient {
    /// Default API URL.
    pub const DEFAULT_BASE_URL: &'static str = "https://api.github.com";

    /// Create a new client with a custom base URL and an optional token.
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(10)
            .build()
            .map_err(UpstreamError::Transport)?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Create a new client against the default API URL.
    pub fn with_token(token: Option<String>) -> Result<Self> {
        Self::new(Self::DEFAULT_BASE_URL, token)
    }

    /// The configured base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        if let Some(token) = &self.token {
            if let Ok(value) = HeaderValue::from_str(&format!("token {}", token)) {
                headers.insert(AUTHORIZATION, value);
            }
        }
        headers
    }

    /// Fetch metadata for a repository by owner and name.
    pub async fn fetch_repo_metadata(&self, owner: &str, name: &str) -> Result<RepoMetadata> {
        let url = format!("{}/repos/{}/{}", self.base_url, owner, name);

        let response = self
            .client
            .get(&url)
            .headers(self.headers())
            .timeout(METADATA_TIMEOUT)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(UpstreamError::repo_not_found(owner, name));
        }
        let response = Self::check_response(response).await?;

        let repo: ApiRepo = response
            .json()
            .await
            .map_err(|e| UpstreamError::Decode(e.to_string()))?;

        Ok(RepoMetadata {
            owner: repo.owner.login,
            name: repo.name,
            url: repo.html_url,
            description: repo.description,
            language: repo.language,
            forks: repo.forks_count,
            stars: repo.stargazers_count,
            open_issues: repo.open_issues_count,
            watchers: repo.watchers_count,
            created_at: repo.created_at,
            updated_at: repo.updated_at,
        })
    }

    /// Fetch one page of the commit listing for a repository.
    ///
    /// `page` is 1-based; `per_page` must be within `1..=100`. Commits come
    /// back in upstream order (newest first) and are not re-sorted here.
    /// A page past the end of history yields an empty list with
    /// `has_more = false`.
    pub async fn fetch_commits_page(
        &self,
        owner: &str,
        name: &str,
        since: DateTime<Utc>,
        page: u32,
        per_page: u32,
    ) -> Result<CommitsPage> {
        if page < 1 {
            return Err(UpstreamError::InvalidRequest("page must be >= 1".to_string()));
        }
        if per_page < 1 || per_page > MAX_PER_PAGE {
            return Err(UpstreamError::InvalidRequest(format!(
                "per_page must be within 1..={}",
                MAX_PER_PAGE
            )));
        }

        let url = format!("{}/repos/{}/{}/commits", self.base_url, owner, name);

        let response = self
            .client
            .get(&url)
            .headers(self.headers())
            .query(&[
                ("since", since.to_rfc3339()),
                ("page", page.to_string()),
                ("per_page", per_page.to_string()),
            ])
            .timeout(COMMITS_TIMEOUT)
            .send()
            .await?;

        // A missing page is the natural end of pagination, not a failure.
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(CommitsPage::default());
        }
        let response = Self::check_response(response).await?;

        let raw: Vec<ApiCommit> = response
            .json()
            .await
            .map_err(|e| UpstreamError::Decode(e.to_string()))?;

        let has_more = raw.len() == per_page as usize;
        let commits = raw
            .into_iter()
            .map(|c| CommitEntry {
                hash: c.sha,
                message: c.commit.message,
                author_name: c.commit.author.name,
                author_email: c.commit.author.email,
                date: c.commit.author.date,
            })
            .collect();

        Ok(CommitsPage { commits, has_more })
    }

    /// Map a non-success response to the error taxonomy.
    ///
    /// A 403 or 429 that carries `X-RateLimit-Reset` (UNIX seconds) is a
    /// rate limit; a 403 without it is an authentication failure.
    async fn check_response(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
            if let Some(reset_at) = parse_rate_limit_reset(&response) {
                return Err(UpstreamError::RateLimited { reset_at });
            }
            if status == StatusCode::FORBIDDEN {
                return Err(UpstreamError::Auth("forbidden".to_string()));
            }
        }

        if status == StatusCode::UNAUTHORIZED {
            return Err(UpstreamError::Auth("bad credentials".to_string()));
        }

        let message = response.text().await.unwrap_or_default();
        Err(UpstreamError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

fn parse_rate_limit_reset(response: &Response) -> Option<DateTime<Utc>> {
    response
        .headers()
        .get("X-RateLimit-Reset")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<i64>().ok())
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
}
