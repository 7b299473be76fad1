//! Drives one item through cache, primary, and fallback.

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::machine::{Resolution, ResolveMachine, Step};
use super::pacer::Pacer;
use super::result::{ResolutionResult, SourceUsed};
use super::retry::RetryPolicy;
use crate::cache::{CacheEntry, ResultCache};
use crate::input::{DedupItem, SearchMode};
use crate::source::{SourceClient, SourceError, SourceHit, SourceKind};

/// Reasons an item stops without a result.
#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    /// The primary rejected the credentials; the run must stop.
    #[error("{0}")]
    Unauthorized(SourceError),

    /// Cancellation was requested.
    #[error("resolution cancelled")]
    Cancelled,
}

/// Per-item orchestration shared by every worker.
pub struct Resolver {
    primary: Arc<dyn SourceClient>,
    fallback: Arc<dyn SourceClient>,
    cache: Option<Arc<ResultCache>>,
    pacer: Arc<Pacer>,
    policy: RetryPolicy,
    mode: SearchMode,
}

impl Resolver {
    /// Creates a resolver without a cache.
    #[must_use]
    pub fn new(
        primary: Arc<dyn SourceClient>,
        fallback: Arc<dyn SourceClient>,
        pacer: Arc<Pacer>,
        policy: RetryPolicy,
        mode: SearchMode,
    ) -> Self {
        Self {
            primary,
            fallback,
            cache: None,
            pacer,
            policy,
            mode,
        }
    }

    /// Consults and fills `cache` (pass `None` to bypass caching).
    #[must_use]
    pub fn with_cache(mut self, cache: Option<Arc<ResultCache>>) -> Self {
        self.cache = cache;
        self
    }

    /// Resolves one item.
    ///
    /// Cancellation is observed before every call and every pause, and
    /// interrupts an in-flight call or pause.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::Unauthorized`] when the primary rejects the
    /// credentials and [`ResolveError::Cancelled`] when `cancel` fires.
    #[instrument(skip(self, item, cancel), fields(index = item.item.index, mode = %self.mode))]
    pub async fn resolve(
        &self,
        item: &DedupItem,
        cancel: &CancellationToken,
    ) -> Result<ResolutionResult, ResolveError> {
        if let Some(entry) = self.cache.as_ref().and_then(|c| c.get(&item.key)) {
            debug!(key = %item.key, "cache hit");
            return Ok(ResolutionResult::from_cache(item, entry));
        }

        let query = item.item.query();
        let mut machine = ResolveMachine::new(self.mode, self.policy.clone());
        let mut step = machine.start();

        loop {
            step = match step {
                Step::Query(kind) => {
                    let response = self.call(kind, query, cancel).await?;
                    machine.on_response(response)
                }
                Step::Sleep(delay) => {
                    if cancel.is_cancelled() {
                        return Err(ResolveError::Cancelled);
                    }
                    debug!(delay_ms = delay.as_millis(), "backing off");
                    tokio::select! {
                        () = cancel.cancelled() => return Err(ResolveError::Cancelled),
                        () = tokio::time::sleep(delay) => {}
                    }
                    machine.on_slept()
                }
                Step::Finish(resolution) => {
                    let result = build_result(item, resolution, machine.attempts());
                    self.remember(&result);
                    info!(
                        outcome = %result.outcome,
                        attempts = result.attempts,
                        "item resolved"
                    );
                    return Ok(result);
                }
                Step::Abort(error) => {
                    warn!(%error, "primary rejected credentials; aborting run");
                    return Err(ResolveError::Unauthorized(error));
                }
            };
        }
    }

    async fn call(
        &self,
        kind: SourceKind,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Result<SourceHit, SourceError>, ResolveError> {
        if cancel.is_cancelled() {
            return Err(ResolveError::Cancelled);
        }
        tokio::select! {
            () = cancel.cancelled() => return Err(ResolveError::Cancelled),
            () = self.pacer.acquire() => {}
        }

        let client = match kind {
            SourceKind::Primary => &self.primary,
            SourceKind::Fallback => &self.fallback,
        };
        debug!(source = client.name(), "querying source");

        let response = tokio::select! {
            () = cancel.cancelled() => return Err(ResolveError::Cancelled),
            response = client.lookup(query, self.mode) => response,
        };

        if let Err(SourceError::RateLimited {
            retry_after: Some(delay),
            ..
        }) = &response
        {
            self.pacer.record_rate_limit(*delay).await;
        }
        Ok(response)
    }

    /// Caches results that carry an identifier. Write failures are logged
    /// and never fail the item.
    fn remember(&self, result: &ResolutionResult) {
        let Some(cache) = &self.cache else {
            return;
        };
        if !result.has_resolved_id() {
            return;
        }
        let source = match result.source_used {
            SourceUsed::Fallback => SourceKind::Fallback,
            _ => SourceKind::Primary,
        };
        let entry = CacheEntry::new(
            result.canonical_key.clone(),
            result.title.clone(),
            result.resolved_id.clone(),
            result.doi.clone(),
            source,
        );
        if let Err(error) = cache.put(entry) {
            warn!(%error, "failed to persist cache entry");
        }
    }
}

fn build_result(item: &DedupItem, resolution: Resolution, attempts: u32) -> ResolutionResult {
    ResolutionResult {
        item_index: item.item.index,
        canonical_key: item.key.clone(),
        query: item.item.query().to_string(),
        title: resolution.title,
        resolved_id: resolution.resolved_id,
        doi: resolution.doi,
        outcome: resolution.outcome,
        source_used: resolution.source_used,
        attempts,
        duplicate_of: None,
        error: resolution.error,
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("primary", &self.primary.name())
            .field("fallback", &self.fallback.name())
            .field("cache", &self.cache.is_some())
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}
