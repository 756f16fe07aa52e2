//! Shared rate-limit coordination and local retry backoff.

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Process-wide rate-limit coordinator.
///
/// Workers that observe an upstream rate limit publish the declared reset
/// instant here; every worker then sleeps until the same wake time instead
/// of each pausing independently. The state is a single `paused_until`
/// timestamp guarded by a mutex; critical sections never hold the lock
/// across an await.
#[derive(Debug, Default)]
pub struct RateLimiter {
    paused_until: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Create an unpaused limiter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an upstream-declared reset instant.
    ///
    /// The pause only ever extends: `paused_until` becomes the maximum of
    /// the current value and the new reset.
    pub fn observe_reset(&self, reset_at: DateTime<Utc>) {
        let wait = (reset_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let deadline = Instant::now() + wait;

        let mut paused = self.paused_until.lock().expect("limiter lock poisoned");
        let next = match *paused {
            Some(current) => current.max(deadline),
            None => deadline,
        };
        *paused = Some(next);

        warn!(reset_at = %reset_at, wait_secs = wait.as_secs(), "rate limit observed, pausing workers");
    }

    /// Whether a pause is currently in force.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        let paused = self.paused_until.lock().expect("limiter lock poisoned");
        matches!(*paused, Some(deadline) if Instant::now() < deadline)
    }

    /// Block until the shared pause (if any) has elapsed.
    ///
    /// Re-checks after waking because another worker may have extended the
    /// pause while this one slept.
    pub async fn wait_until_clear(&self) {
        loop {
            let deadline = {
                let mut paused = self.paused_until.lock().expect("limiter lock poisoned");
                match *paused {
                    Some(deadline) if Instant::now() < deadline => Some(deadline),
                    _ => {
                        *paused = None;
                        None
                    }
                }
            };

            match deadline {
                Some(deadline) => {
                    debug!("waiting for shared rate-limit pause to clear");
                    tokio::time::sleep_until(deadline).await;
                }
                None => return,
            }
        }
    }
}

/// Capped exponential backoff with jitter, local to one call site.
///
/// Used for transient errors only; rate limits go through the shared
/// [`RateLimiter`] instead.
#[derive(Debug)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    attempt: u32,
}

impl Backoff {
    /// Default base delay.
    pub const DEFAULT_BASE: Duration = Duration::from_secs(1);
    /// Default delay cap.
    pub const DEFAULT_CAP: Duration = Duration::from_secs(60);

    /// Create a backoff with the default base (1s) and cap (60s).
    #[must_use]
    pub fn new() -> Self {
        Self::with(Self::DEFAULT_BASE, Self::DEFAULT_CAP)
    }

    /// Create a backoff with a custom base and cap.
    #[must_use]
    pub fn with(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            attempt: 0,
        }
    }

    /// Number of delays handed out so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Next delay: `base * 2^attempt`, capped, with +/-20% jitter.
    pub fn next_delay(&mut self) -> Duration {
        let exp = self
            .base
            .saturating_mul(2u32.saturating_pow(self.attempt))
            .min(self.cap);
        self.attempt += 1;

        let jitter = rand::thread_rng().gen_range(0.8..=1.2);
        exp.mul_f64(jitter)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}
