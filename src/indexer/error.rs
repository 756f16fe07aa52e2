//! Error types for the ingestion engine.

use thiserror::Error;

use crate::store::StorageError;
use crate::upstream::UpstreamError;

/// Result type alias for ingestion operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error type for ingestion operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The upstream API rejected or failed a request.
    #[error("upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    /// A storage port failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The input was malformed.
    #[error("validation error: {0}")]
    Validation(String),

    /// The repository is already tracked.
    #[error("repository already tracked: {0}")]
    AlreadyExists(String),

    /// The repository is not tracked.
    #[error("repository not tracked: {0}")]
    NotFound(String),
}

impl Error {
    /// Create a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}
