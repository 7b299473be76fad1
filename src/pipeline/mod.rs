//! Resolution pipeline: validation, scheduling, retries, and checkpointing.
//!
//! [`Pipeline::run`] wires the stages together:
//!
//! 1. Validate and deduplicate raw lines ([`crate::input::prepare_items`])
//! 2. Load the checkpoint when resuming and skip released items
//! 3. Resolve the rest with the [`Scheduler`], which drives the [`Resolver`]
//! 4. Record each released result in the [`Aggregator`] and the
//!    [`CheckpointManager`]
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use scopus_resolver_core::input::SearchMode;
//! use scopus_resolver_core::pipeline::{Pipeline, PipelineConfig};
//! use scopus_resolver_core::source::{HttpTimeouts, OpenAlexClient, ScopusClient};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let primary = Arc::new(ScopusClient::new("api-key", HttpTimeouts::default())?);
//! let fallback = Arc::new(OpenAlexClient::new(HttpTimeouts::default())?);
//! let config = PipelineConfig::new(SearchMode::Doi, "checkpoint.json");
//! let pipeline = Pipeline::new(config, primary, fallback);
//!
//! let lines = vec!["10.1016/j.softx.2019.100263".to_string()];
//! let report = pipeline.run(&lines, &CancellationToken::new()).await?;
//! println!("found {} of {}", report.stats.found, report.stats.total);
//! # Ok(())
//! # }
//! ```

mod aggregator;
mod checkpoint;
mod machine;
mod pacer;
mod resolver;
mod result;
mod retry;
mod scheduler;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::cache::ResultCache;
use crate::input::{DedupItem, SearchMode, prepare_items};
use crate::source::{SourceClient, SourceError};

pub use aggregator::{Aggregator, RunReport, RunStats};
pub use checkpoint::{
    CheckpointError, CheckpointManager, CheckpointState, DEFAULT_CHECKPOINT_INTERVAL,
    load_for_resume,
};
pub use machine::{Resolution, ResolveMachine, ResolveState, Step};
pub use pacer::Pacer;
pub use resolver::{ResolveError, Resolver};
pub use result::{Outcome, ResolutionResult, SourceUsed};
pub use retry::{DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, RetryDecision, RetryPolicy};
pub use scheduler::{DEFAULT_WORKERS, ScheduleOutcome, Scheduler, SchedulerError};

/// Default minimum spacing between outbound calls.
pub const DEFAULT_PACING: Duration = Duration::from_secs(1);

/// Run-level failures. Per-item failures never surface here.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Worker count rejected.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// Checkpoint could not be used for resume.
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// The primary rejected the credentials. The report holds everything
    /// released before the stop, and the checkpoint was flushed.
    #[error("{error}")]
    Unauthorized {
        /// The rejection.
        error: SourceError,
        /// Partial results.
        report: Box<RunReport>,
    },
}

/// Settings for one run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Interpretation of input lines.
    pub mode: SearchMode,
    /// Concurrent resolutions (1..=32).
    pub workers: usize,
    /// Drop duplicates instead of reusing the first occurrence's outcome.
    pub skip_duplicates: bool,
    /// Continue from the checkpoint file.
    pub resume: bool,
    /// Process at most this many items after the resume point.
    pub limit: Option<usize>,
    /// Attempt cap and backoff.
    pub retry: RetryPolicy,
    /// Minimum spacing between outbound calls.
    pub pacing: Duration,
    /// Checkpoint file location.
    pub checkpoint_path: PathBuf,
    /// Released items between checkpoint writes.
    pub checkpoint_interval: usize,
}

impl PipelineConfig {
    /// Creates a configuration with default tuning.
    #[must_use]
    pub fn new(mode: SearchMode, checkpoint_path: impl Into<PathBuf>) -> Self {
        Self {
            mode,
            workers: DEFAULT_WORKERS,
            skip_duplicates: false,
            resume: false,
            limit: None,
            retry: RetryPolicy::default(),
            pacing: DEFAULT_PACING,
            checkpoint_path: checkpoint_path.into(),
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
        }
    }
}

/// A configured pipeline ready to run.
pub struct Pipeline {
    config: PipelineConfig,
    primary: Arc<dyn SourceClient>,
    fallback: Arc<dyn SourceClient>,
    cache: Option<Arc<ResultCache>>,
}

impl Pipeline {
    /// Creates a pipeline without a cache.
    #[must_use]
    pub fn new(
        config: PipelineConfig,
        primary: Arc<dyn SourceClient>,
        fallback: Arc<dyn SourceClient>,
    ) -> Self {
        Self {
            config,
            primary,
            fallback,
            cache: None,
        }
    }

    /// Uses `cache` for lookups and successful results (`None` bypasses it).
    #[must_use]
    pub fn with_cache(mut self, cache: Option<Arc<ResultCache>>) -> Self {
        self.cache = cache;
        self
    }

    /// The run configuration.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Resolves `lines` and returns the ordered results.
    ///
    /// The checkpoint is flushed once more before returning, whether the run
    /// completed, was cancelled, or was aborted.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::Scheduler`] for an unsupported worker count
    /// - [`PipelineError::Checkpoint`] when resuming from a checkpoint that
    ///   does not match this input or cannot be read
    /// - [`PipelineError::Unauthorized`] when the primary rejects the
    ///   credentials (carries the partial report)
    #[instrument(skip_all, fields(mode = %self.config.mode, lines = lines.len()))]
    pub async fn run(
        &self,
        lines: &[String],
        cancel: &CancellationToken,
    ) -> Result<RunReport, PipelineError> {
        let config = &self.config;
        let scheduler = Scheduler::new(config.workers)?;
        let (items, input_report) = prepare_items(lines, config.mode, config.skip_duplicates);

        let mut checkpoint = self.open_checkpoint(lines.len())?;
        let seeded = checkpoint.results().to_vec();
        let pending = select_pending(items, checkpoint.last_processed_index(), config.limit);

        let mut aggregator = Aggregator::new();
        aggregator.seed(seeded.iter().cloned());

        let pacer = Arc::new(if config.pacing.is_zero() {
            Pacer::disabled()
        } else {
            Pacer::new(config.pacing)
        });
        let resolver = Arc::new(
            Resolver::new(
                Arc::clone(&self.primary),
                Arc::clone(&self.fallback),
                pacer,
                config.retry.clone(),
                config.mode,
            )
            .with_cache(self.cache.clone()),
        );

        let outcome = scheduler
            .run(resolver, pending, &seeded, cancel, |result| {
                aggregator.record(result.clone());
                if let Err(error) = checkpoint.record(result) {
                    warn!(%error, "checkpoint write failed; continuing");
                }
            })
            .await;

        checkpoint.flush_best_effort();

        let report = aggregator.finish(input_report, !outcome.is_complete());
        let stats = report.stats;
        info!(
            total = stats.total,
            found = stats.found,
            partial = stats.partial,
            not_found = stats.not_found,
            errors = stats.errors,
            api_requests = stats.api_requests,
            cache_hits = stats.cache_hits,
            interrupted = report.interrupted,
            "run finished"
        );

        match outcome.fatal {
            Some(error) => Err(PipelineError::Unauthorized {
                error,
                report: Box::new(report),
            }),
            None => Ok(report),
        }
    }

    fn open_checkpoint(&self, total_items: usize) -> Result<CheckpointManager, CheckpointError> {
        let config = &self.config;
        let path = config.checkpoint_path.clone();
        let manager = if config.resume {
            match load_for_resume(&path, config.mode, total_items)? {
                Some(state) => CheckpointManager::resumed(path, state),
                None => CheckpointManager::new(path, config.mode, total_items),
            }
        } else {
            CheckpointManager::new(path, config.mode, total_items)
        };
        Ok(manager.with_interval(config.checkpoint_interval))
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("primary", &self.primary.name())
            .field("fallback", &self.fallback.name())
            .field("cache", &self.cache.is_some())
            .finish()
    }
}

/// Items after the resume point, capped at `limit`.
fn select_pending(items: Vec<DedupItem>, after: usize, limit: Option<usize>) -> Vec<DedupItem> {
    let mut pending: Vec<DedupItem> = items
        .into_iter()
        .filter(|item| item.item.index > after)
        .collect();
    if let Some(limit) = limit {
        pending.truncate(limit);
    }
    pending
}
