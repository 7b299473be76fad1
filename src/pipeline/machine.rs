//! Per-item resolve state machine.
//!
//! The machine decides what to do next for one item: query a source, pause,
//! finish, or abort the run. It never sleeps or performs IO; the resolver
//! drives it by executing each [`Step`] and feeding the result back.
//!
//! ```text
//! Pending -> QueryingPrimary -> BackoffPrimary* -> QueryingFallback -> BackoffFallback* -> Finished
//!                 \___________________________________/
//!                     (hit with identifier: Finished)
//! ```

use std::time::Duration;

use tracing::debug;

use super::result::{Outcome, SourceUsed};
use super::retry::{RetryDecision, RetryPolicy};
use crate::input::SearchMode;
use crate::source::{SourceError, SourceHit, SourceKind};

/// Where an item is in its resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveState {
    /// Not started.
    Pending,
    /// Waiting on a primary call.
    QueryingPrimary {
        /// 1-indexed call number against the primary.
        attempt: u32,
    },
    /// Pausing before the next primary call.
    BackoffPrimary {
        /// The call number that follows the pause.
        attempt: u32,
        /// Pause length.
        delay: Duration,
    },
    /// Waiting on a fallback call.
    QueryingFallback {
        /// 1-indexed call number against the fallback.
        attempt: u32,
    },
    /// Pausing before the next fallback call.
    BackoffFallback {
        /// The call number that follows the pause.
        attempt: u32,
        /// Pause length.
        delay: Duration,
    },
    /// Terminal.
    Finished,
}

/// Final data for an item, before it is stamped with its identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Terminal classification.
    pub outcome: Outcome,
    /// Source that produced the data.
    pub source_used: SourceUsed,
    /// Title reported by a source.
    pub title: Option<String>,
    /// Scopus identifier.
    pub resolved_id: Option<String>,
    /// DOI reported by a source.
    pub doi: Option<String>,
    /// Last failure message for `Error` outcomes.
    pub error: Option<String>,
}

impl Resolution {
    fn found(kind: SourceKind, hit: SourceHit) -> Self {
        Self {
            outcome: Outcome::Found,
            source_used: kind.into(),
            title: hit.title,
            resolved_id: hit.resolved_id,
            doi: hit.doi,
            error: None,
        }
    }

    fn not_found(partial: Option<SourceHit>) -> Self {
        let partial = partial.unwrap_or_default();
        Self {
            outcome: Outcome::NotFound,
            source_used: SourceUsed::None,
            title: partial.title,
            resolved_id: None,
            doi: partial.doi,
            error: None,
        }
    }

    fn error(message: String, partial: Option<SourceHit>) -> Self {
        Self {
            outcome: Outcome::Error,
            error: Some(message),
            ..Self::not_found(partial)
        }
    }
}

/// What the driver must do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Call the given source once.
    Query(SourceKind),
    /// Wait, then call [`ResolveMachine::on_slept`].
    Sleep(Duration),
    /// The item is done.
    Finish(Resolution),
    /// The run must stop (credentials rejected by the primary).
    Abort(SourceError),
}

/// Pure transition function for one item.
#[derive(Debug, Clone)]
pub struct ResolveMachine {
    mode: SearchMode,
    policy: RetryPolicy,
    state: ResolveState,
    attempts: u32,
    /// Primary answer that lacked an identifier.
    primary_partial: Option<SourceHit>,
    /// Last primary failure when its retries ran out.
    primary_exhausted: Option<String>,
}

impl ResolveMachine {
    /// Creates a machine in `Pending`.
    #[must_use]
    pub fn new(mode: SearchMode, policy: RetryPolicy) -> Self {
        Self {
            mode,
            policy,
            state: ResolveState::Pending,
            attempts: 0,
            primary_partial: None,
            primary_exhausted: None,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ResolveState {
        self.state
    }

    /// Network calls answered so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Begins resolution with the first primary call.
    pub fn start(&mut self) -> Step {
        if self.state != ResolveState::Pending {
            return self.invalid("start");
        }
        self.state = ResolveState::QueryingPrimary { attempt: 1 };
        Step::Query(SourceKind::Primary)
    }

    /// Feeds back the answer to the last `Query` step.
    pub fn on_response(&mut self, response: Result<SourceHit, SourceError>) -> Step {
        match self.state {
            ResolveState::QueryingPrimary { attempt } => {
                self.attempts += 1;
                self.on_primary(attempt, response)
            }
            ResolveState::QueryingFallback { attempt } => {
                self.attempts += 1;
                self.on_fallback(attempt, response)
            }
            _ => self.invalid("on_response"),
        }
    }

    /// Signals that the last `Sleep` step has elapsed.
    pub fn on_slept(&mut self) -> Step {
        match self.state {
            ResolveState::BackoffPrimary { attempt, .. } => {
                self.state = ResolveState::QueryingPrimary { attempt };
                Step::Query(SourceKind::Primary)
            }
            ResolveState::BackoffFallback { attempt, .. } => {
                self.state = ResolveState::QueryingFallback { attempt };
                Step::Query(SourceKind::Fallback)
            }
            _ => self.invalid("on_slept"),
        }
    }

    fn on_primary(&mut self, attempt: u32, response: Result<SourceHit, SourceError>) -> Step {
        match response {
            Ok(hit) if hit.has_id() => self.finish(Resolution::found(SourceKind::Primary, hit)),
            Ok(hit) => {
                debug!("primary answered without an identifier");
                self.primary_partial = Some(hit);
                self.to_fallback()
            }
            Err(SourceError::NotFound { .. }) => self.to_fallback(),
            Err(error @ SourceError::Unauthorized { .. }) => {
                self.state = ResolveState::Finished;
                Step::Abort(error)
            }
            Err(error) => match self.policy.should_retry(&error, attempt) {
                RetryDecision::Retry { delay, attempt } => {
                    self.state = ResolveState::BackoffPrimary { attempt, delay };
                    Step::Sleep(delay)
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(%reason, "primary exhausted, trying fallback");
                    self.primary_exhausted = Some(error.to_string());
                    self.to_fallback()
                }
            },
        }
    }

    fn on_fallback(&mut self, attempt: u32, response: Result<SourceHit, SourceError>) -> Step {
        match response {
            Ok(hit) if self.is_usable_fallback(&hit) => {
                let mut resolution = Resolution::found(SourceKind::Fallback, hit);
                resolution.resolved_id = None;
                if resolution.doi.is_none() {
                    resolution.doi = self.primary_partial.as_ref().and_then(|p| p.doi.clone());
                }
                self.finish(resolution)
            }
            Ok(_) | Err(SourceError::NotFound { .. }) => self.finish_without_match(),
            Err(error @ SourceError::Unauthorized { .. }) => {
                let partial = self.primary_partial.take();
                self.finish(Resolution::error(error.to_string(), partial))
            }
            Err(error) => match self.policy.should_retry(&error, attempt) {
                RetryDecision::Retry { delay, attempt } => {
                    self.state = ResolveState::BackoffFallback { attempt, delay };
                    Step::Sleep(delay)
                }
                RetryDecision::DoNotRetry { .. } => {
                    let partial = self.primary_partial.take();
                    self.finish(Resolution::error(error.to_string(), partial))
                }
            },
        }
    }

    /// Fallback data counts only when it is what the mode asks for.
    fn is_usable_fallback(&self, hit: &SourceHit) -> bool {
        let has_title = hit.title.as_deref().is_some_and(|t| !t.trim().is_empty());
        match self.mode {
            SearchMode::Doi => has_title,
            SearchMode::Title => has_title && hit.doi.as_deref().is_some_and(|d| !d.is_empty()),
        }
    }

    fn finish_without_match(&mut self) -> Step {
        let partial = self.primary_partial.take();
        match self.primary_exhausted.take() {
            Some(message) => self.finish(Resolution::error(message, partial)),
            None => self.finish(Resolution::not_found(partial)),
        }
    }

    fn to_fallback(&mut self) -> Step {
        self.state = ResolveState::QueryingFallback { attempt: 1 };
        Step::Query(SourceKind::Fallback)
    }

    fn finish(&mut self, resolution: Resolution) -> Step {
        self.state = ResolveState::Finished;
        Step::Finish(resolution)
    }

    fn invalid(&mut self, event: &str) -> Step {
        let message = format!("unexpected {event} in state {:?}", self.state);
        self.state = ResolveState::Finished;
        Step::Finish(Resolution::error(message, None))
    }
}
