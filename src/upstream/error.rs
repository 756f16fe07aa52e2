//! Error types for the upstream API client.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result type alias for upstream operations.
pub type Result<T> = std::result::Result<T, UpstreamError>;

/// Comprehensive error type for upstream API operations.
#[derive(Error, Debug)]
pub enum UpstreamError {
    /// HTTP request failed (connect error, timeout, broken transfer).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// Resource not found upstream.
    #[error("not found: {0}")]
    NotFound(String),

    /// Authentication failed or credentials rejected.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Request quota exhausted; the upstream declared when it replenishes.
    #[error("rate limited until {reset_at}")]
    RateLimited {
        /// The instant at which the quota resets.
        reset_at: DateTime<Utc>,
    },

    /// The API returned an unexpected error response.
    #[error("api error: {status} - {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error message from the response body.
        message: String,
    },

    /// The request parameters were out of bounds before any I/O happened.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl UpstreamError {
    /// Create a not-found error for a repository coordinate.
    #[must_use]
    pub fn repo_not_found(owner: &str, name: &str) -> Self {
        Self::NotFound(format!("repository {}/{}", owner, name))
    }

    /// Whether retrying the same request later can reasonably succeed.
    ///
    /// Rate limits are excluded: they carry their own reset schedule and
    /// are handled by the shared limiter, not by local retries.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = UpstreamError::NotFound("repository foo/bar".to_string());
        assert_eq!(err.to_string(), "not found: repository foo/bar");
    }

    #[test]
    fn test_api_error_display() {
        let err = UpstreamError::Api {
            status: 502,
            message: "bad gateway".to_string(),
        };
        assert_eq!(err.to_string(), "api error: 502 - bad gateway");
    }

    #[test]
    fn test_repo_not_found_helper() {
        let err = UpstreamError::repo_not_found("owner", "repo");
        assert_eq!(err.to_string(), "not found: repository owner/repo");
    }

    #[test]
    fn test_transient_classification() {
        assert!(
            UpstreamError::Api {
                status: 503,
                message: String::new()
            }
            .is_transient()
        );
        assert!(
            !UpstreamError::Api {
                status: 422,
                message: String::new()
            }
            .is_transient()
        );
        assert!(!UpstreamError::Auth("bad token".to_string()).is_transient());
        assert!(
            !UpstreamError::RateLimited {
                reset_at: Utc::now()
            }
            .is_transient()
        );
        assert!(!UpstreamError::NotFound("x".to_string()).is_transient());
    }
}
