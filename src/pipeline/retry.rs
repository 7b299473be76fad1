//! Retry decisions with doubling backoff for source lookups.
//!
//! The [`RetryPolicy`] caps the number of calls per source and computes the
//! pause before the next call. A server-provided delay (Retry-After) always
//! takes precedence over the computed backoff.
//!
//! # Example
//!
//! ```
//! use scopus_resolver_core::pipeline::{RetryDecision, RetryPolicy};
//! use scopus_resolver_core::source::SourceError;
//!
//! let policy = RetryPolicy::default().without_jitter();
//! let error = SourceError::transient("scopus", "HTTP 503");
//!
//! match policy.should_retry(&error, 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         println!("Retrying in {delay:?} (attempt {attempt})");
//!     }
//!     RetryDecision::DoNotRetry { reason } => {
//!         println!("Not retrying: {reason}");
//!     }
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::source::SourceError;

/// Default maximum calls per source for one item.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base delay for backoff (5 seconds).
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(5);

/// Default maximum delay cap (32 seconds).
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);

/// Default backoff multiplier (doubles each attempt).
const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;

/// Default maximum jitter added to computed delays (500ms).
const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(500);

/// Decision on whether to call a source again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Call again after the delay.
    Retry {
        /// How long to wait before the next call.
        delay: Duration,
        /// Which attempt number the next call will be (1-indexed).
        attempt: u32,
    },

    /// Stop calling this source.
    DoNotRetry {
        /// Human-readable reason.
        reason: String,
    },
}

/// Attempt cap and backoff configuration.
///
/// # Default Values
///
/// - `max_attempts`: 3
/// - `base_delay`: 5 seconds
/// - `max_delay`: 32 seconds
/// - `backoff_multiplier`: 2.0
/// - `max_jitter`: 500ms
///
/// # Delay Calculation
///
/// ```text
/// delay = min(base_delay * multiplier^(attempt - 1), max_delay) + jitter
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f32,
    max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_jitter: DEFAULT_MAX_JITTER,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with custom settings (`max_attempts` is at least 1).
    #[must_use]
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f32,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            backoff_multiplier,
            ..Self::default()
        }
    }

    /// Creates a policy with a custom attempt cap, using defaults otherwise.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Returns the same policy with jitter removed (deterministic delays).
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.max_jitter = Duration::ZERO;
        self
    }

    /// Returns the maximum number of calls per source.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Determines whether to call the source again after a failure.
    ///
    /// `attempt` is the 1-indexed call that just failed.
    #[must_use]
    pub fn should_retry(&self, error: &SourceError, attempt: u32) -> RetryDecision {
        if !error.is_retryable() {
            return RetryDecision::DoNotRetry {
                reason: format!("not retryable: {error}"),
            };
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = match error {
            SourceError::RateLimited {
                retry_after: Some(server_delay),
                ..
            } => *server_delay,
            _ => self.backoff_delay(attempt),
        };

        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Computes the backoff after the given failed attempt (1-indexed).
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let exponent = f64::from(attempt.saturating_sub(1));
        let delay_ms = base_ms * f64::from(self.backoff_multiplier).powf(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        Duration::from_millis(capped_ms as u64) + self.jitter()
    }

    #[allow(clippy::cast_possible_truncation)]
    fn jitter(&self) -> Duration {
        if self.max_jitter.is_zero() {
            return Duration::ZERO;
        }
        let mut rng = rand::thread_rng();
        Duration::from_millis(rng.gen_range(0..=self.max_jitter.as_millis() as u64))
    }
}
