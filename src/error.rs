//! Top-level error aggregation for the binary.

use thiserror::Error;

/// Result type alias for the binary's startup and run paths.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can take the service down.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration was invalid at startup.
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    /// Storage was unreachable or the schema could not be prepared.
    #[error(transparent)]
    Storage(#[from] crate::store::StorageError),

    /// The HTTP client could not be constructed.
    #[error(transparent)]
    Upstream(#[from] crate::upstream::UpstreamError),

    /// The read API could not bind or serve.
    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Process exit code: 1 for configuration problems, 2 for storage
    /// unavailable at startup.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Storage(_) => 2,
            _ => 1,
        }
    }
}
