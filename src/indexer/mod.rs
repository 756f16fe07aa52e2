//! The commit-ingestion engine.
//!
//! This module coordinates:
//! - admission of new repositories and their initial backfill
//! - the per-repository pagination state machine with durable checkpoints
//! - periodic reconciliation of already-tracked repositories
//! - shared rate-limit pacing across concurrent workers
//! - lifecycle supervision and graceful shutdown

pub mod admission;
pub mod engine;
pub mod error;
pub mod limiter;
pub mod reconciler;
pub mod supervisor;

pub use admission::{parse_coordinate, Admission};
pub use engine::{Indexer, PassOutcome, MAX_TRANSIENT_RETRIES, PER_PAGE};
pub use error::{Error, Result};
pub use limiter::{Backoff, RateLimiter};
pub use reconciler::Reconciler;
pub use supervisor::Supervisor;

/// Re-export commonly used types.
pub mod prelude {
    pub use super::admission::{parse_coordinate, Admission};
    pub use super::engine::{Indexer, PassOutcome};
    pub use super::error::{Error, Result};
    pub use super::limiter::{Backoff, RateLimiter};
    pub use super::reconciler::Reconciler;
    pub use super::supervisor::Supervisor;
}
