//! Shared request pacing across all workers.
//!
//! One [`Pacer`] is created per run and shared via `Arc`. Every outbound call
//! first awaits [`Pacer::acquire`], which enforces a minimum spacing between
//! any two calls regardless of which worker or source issues them. A server
//! rate-limit signal pushes the next allowed call further out for everyone.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use scopus_resolver_core::pipeline::Pacer;
//!
//! # async fn example() {
//! let pacer = Arc::new(Pacer::new(Duration::from_secs(1)));
//!
//! // First call proceeds immediately
//! pacer.acquire().await;
//!
//! // Second call waits until one second after the first
//! pacer.acquire().await;
//! # }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// Warning threshold for cumulative pacing delay (30 seconds).
const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);

/// Global pacing gate for outbound source calls.
///
/// `Pacer` is `Send + Sync`. The inner mutex is held across the pacing sleep,
/// so concurrent callers are released one interval apart.
#[derive(Debug)]
pub struct Pacer {
    interval: Duration,
    state: Mutex<PacerState>,
    cumulative_delay_ms: AtomicU64,
}

#[derive(Debug, Default)]
struct PacerState {
    /// `None` until the first call (first call is immediate).
    last_request: Option<Instant>,
    /// Server-mandated pause end, if one is active.
    blocked_until: Option<Instant>,
}

impl Pacer {
    /// Creates a pacer enforcing `interval` between consecutive calls.
    #[must_use]
    #[instrument(skip_all, fields(interval_ms = interval.as_millis()))]
    pub fn new(interval: Duration) -> Self {
        debug!("creating pacer");
        Self {
            interval,
            state: Mutex::new(PacerState::default()),
            cumulative_delay_ms: AtomicU64::new(0),
        }
    }

    /// Creates a pacer with no minimum spacing.
    ///
    /// Server-mandated pauses recorded via [`Pacer::record_rate_limit`] are
    /// still honored.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Returns whether minimum spacing is disabled.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.interval.is_zero()
    }

    /// Returns the configured minimum spacing.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Waits until the next call is allowed, then claims the slot.
    pub async fn acquire(&self) {
        let mut state = self.state.lock().await;

        let mut ready_at = state.last_request.map(|last| last + self.interval);
        if let Some(blocked) = state.blocked_until {
            ready_at = Some(ready_at.map_or(blocked, |r| r.max(blocked)));
        }

        if let Some(ready_at) = ready_at {
            let now = Instant::now();
            if ready_at > now {
                let delay = ready_at - now;
                let cumulative = self.add_cumulative_delay(delay);
                debug!(
                    delay_ms = delay.as_millis(),
                    cumulative_ms = cumulative.as_millis(),
                    "pacing outbound call"
                );
                tokio::time::sleep_until(ready_at).await;
            }
        }

        state.blocked_until = None;
        state.last_request = Some(Instant::now());
    }

    /// Records a server-mandated pause (from Retry-After).
    ///
    /// No call from any worker is released before `delay` has elapsed.
    /// Overlapping pauses keep the later end.
    #[instrument(skip(self), fields(delay_ms = delay.as_millis()))]
    pub async fn record_rate_limit(&self, delay: Duration) {
        let until = Instant::now() + delay;
        let mut state = self.state.lock().await;
        state.blocked_until = Some(state.blocked_until.map_or(until, |b| b.max(until)));
        debug!("recorded server rate limit");
    }

    #[allow(clippy::cast_possible_truncation)]
    fn add_cumulative_delay(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as u64;
        let total = self.cumulative_delay_ms.fetch_add(delay_ms, Ordering::SeqCst) + delay_ms;
        let total = Duration::from_millis(total);
        if total >= CUMULATIVE_DELAY_WARNING_THRESHOLD
            && total.saturating_sub(Duration::from_millis(delay_ms)) < CUMULATIVE_DELAY_WARNING_THRESHOLD
        {
            warn!(
                cumulative_delay_secs = total.as_secs(),
                "pacing has delayed calls for over 30s; consider a smaller batch or a higher rate limit"
            );
        }
        total
    }
}
