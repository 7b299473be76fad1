//! Bounded worker pool with in-order release.
//!
//! The scheduler dispatches items to the [`Resolver`] with at most `workers`
//! in flight, guarded by a semaphore. Completions arrive in any order and are
//! buffered; results are released strictly by position, so the caller sees
//! the same sequence regardless of timing.
//!
//! Duplicates are never dispatched. Each is released right after its first
//! occurrence, reusing that outcome.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::resolver::{ResolveError, Resolver};
use super::result::ResolutionResult;
use crate::input::DedupItem;
use crate::source::SourceError;

/// Minimum allowed worker count.
const MIN_WORKERS: usize = 1;

/// Maximum allowed worker count.
const MAX_WORKERS: usize = 32;

/// Default worker count.
pub const DEFAULT_WORKERS: usize = 3;

/// Scheduler construction errors.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Worker count outside the supported range.
    #[error("invalid worker count {value}: must be between {MIN_WORKERS} and {MAX_WORKERS}")]
    InvalidWorkers {
        /// The rejected value.
        value: usize,
    },
}

/// How a scheduling pass ended.
#[derive(Debug, Clone, Default)]
pub struct ScheduleOutcome {
    /// Results released in this pass.
    pub released: usize,
    /// Items planned for this pass (work plus duplicates).
    pub planned: usize,
    /// Cancellation was requested.
    pub cancelled: bool,
    /// Credentials were rejected; the pass stopped.
    pub fatal: Option<SourceError>,
}

impl ScheduleOutcome {
    /// True when every planned item was released.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.released == self.planned && self.fatal.is_none() && !self.cancelled
    }
}

enum Slot {
    Work(DedupItem),
    Duplicate { item: DedupItem, first: usize },
}

/// Reorders completions into position order.
struct ReleaseBuffer {
    slots: Vec<Slot>,
    next: usize,
    pending: BTreeMap<usize, ResolutionResult>,
    by_index: HashMap<usize, ResolutionResult>,
}

impl ReleaseBuffer {
    fn drain(&mut self, on_release: &mut impl FnMut(ResolutionResult)) -> usize {
        let mut released = 0;
        while let Some(slot) = self.slots.get(self.next) {
            let result = match slot {
                Slot::Work(_) => match self.pending.remove(&self.next) {
                    Some(result) => result,
                    None => break,
                },
                Slot::Duplicate { item, first } => match self.by_index.get(first) {
                    Some(original) => ResolutionResult::for_duplicate(item, original),
                    None => break,
                },
            };
            self.by_index.insert(result.item_index, result.clone());
            on_release(result);
            self.next += 1;
            released += 1;
        }
        released
    }
}

/// Fixed-width pool driving the resolver.
#[derive(Debug, Clone, Copy)]
pub struct Scheduler {
    workers: usize,
}

impl Scheduler {
    /// Creates a scheduler with `workers` concurrent resolutions.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidWorkers`] outside `1..=32`.
    pub fn new(workers: usize) -> Result<Self, SchedulerError> {
        if !(MIN_WORKERS..=MAX_WORKERS).contains(&workers) {
            return Err(SchedulerError::InvalidWorkers { value: workers });
        }
        Ok(Self { workers })
    }

    /// Returns the configured width.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Resolves `items` and hands each result to `on_release` in order.
    ///
    /// `seeded` holds results from an earlier pass; duplicates of those items
    /// reuse them. Everything released forms a contiguous prefix of `items`.
    ///
    /// On cancellation the pass stops at once and buffered out-of-order
    /// results are dropped. When the primary rejects the credentials no new
    /// work is dispatched, but items ahead of the rejected one still run to
    /// completion and are released; only positions after it are dropped.
    #[instrument(skip_all, fields(workers = self.workers, items = items.len()))]
    pub async fn run(
        &self,
        resolver: Arc<Resolver>,
        items: Vec<DedupItem>,
        seeded: &[ResolutionResult],
        cancel: &CancellationToken,
        mut on_release: impl FnMut(ResolutionResult),
    ) -> ScheduleOutcome {
        let mut buffer = plan(items, seeded);
        let planned = buffer.slots.len();
        let work: Vec<(usize, DedupItem)> = buffer
            .slots
            .iter()
            .enumerate()
            .filter_map(|(pos, slot)| match slot {
                Slot::Work(item) => Some((pos, item.clone())),
                Slot::Duplicate { .. } => None,
            })
            .collect();

        info!(planned, dispatched = work.len(), "starting resolution");

        // `stop` reaches in-flight resolutions; `halt` only ends dispatching
        let stop = cancel.child_token();
        let halt = stop.child_token();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let dispatcher = tokio::spawn(dispatch(
            work,
            Arc::new(Semaphore::new(self.workers)),
            resolver,
            stop.clone(),
            halt.clone(),
            tx,
        ));

        let mut outcome = ScheduleOutcome {
            planned,
            ..ScheduleOutcome::default()
        };
        // Leading duplicates of seeded items are ready immediately
        outcome.released += buffer.drain(&mut on_release);

        // Position of the earliest item whose credentials were rejected
        let mut cutoff: Option<usize> = None;
        loop {
            if cutoff.is_some_and(|c| buffer.next >= c) {
                break;
            }
            let message = tokio::select! {
                biased;
                () = stop.cancelled() => break,
                message = rx.recv() => message,
            };
            let Some((pos, response)) = message else {
                break;
            };
            let before_cutoff = cutoff.is_none_or(|c| pos < c);
            match response {
                Ok(result) if before_cutoff => {
                    buffer.pending.insert(pos, result);
                    outcome.released += buffer.drain(&mut on_release);
                }
                Ok(_) | Err(ResolveError::Cancelled) => {}
                Err(ResolveError::Unauthorized(error)) if before_cutoff => {
                    if cutoff.is_none() {
                        warn!(%error, "credentials rejected; finishing earlier items");
                    }
                    cutoff = Some(pos);
                    buffer.pending.retain(|&p, _| p < pos);
                    outcome.fatal = Some(error);
                    halt.cancel();
                }
                Err(ResolveError::Unauthorized(_)) => {}
            }
        }

        outcome.cancelled = cancel.is_cancelled();
        stop.cancel();
        dispatcher.abort();

        if outcome.is_complete() {
            info!(released = outcome.released, "resolution complete");
        } else {
            info!(
                released = outcome.released,
                planned,
                dropped = buffer.pending.len(),
                "resolution stopped early"
            );
        }
        outcome
    }
}

fn plan(items: Vec<DedupItem>, seeded: &[ResolutionResult]) -> ReleaseBuffer {
    let mut known: HashSet<usize> = seeded.iter().map(|r| r.item_index).collect();
    let mut slots = Vec::with_capacity(items.len());
    for item in items {
        match item.duplicate_of {
            Some(first) if known.contains(&first) => slots.push(Slot::Duplicate { item, first }),
            _ => {
                known.insert(item.item.index);
                slots.push(Slot::Work(item));
            }
        }
    }
    ReleaseBuffer {
        slots,
        next: 0,
        pending: BTreeMap::new(),
        by_index: seeded.iter().map(|r| (r.item_index, r.clone())).collect(),
    }
}

type Completion = (usize, Result<ResolutionResult, ResolveError>);

async fn dispatch(
    work: Vec<(usize, DedupItem)>,
    semaphore: Arc<Semaphore>,
    resolver: Arc<Resolver>,
    stop: CancellationToken,
    halt: CancellationToken,
    tx: mpsc::UnboundedSender<Completion>,
) {
    for (pos, item) in work {
        if halt.is_cancelled() {
            break;
        }
        let permit = tokio::select! {
            () = halt.cancelled() => break,
            permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        debug!(index = item.item.index, "dispatching item");

        let resolver = Arc::clone(&resolver);
        let stop = stop.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let response = resolver.resolve(&item, &stop).await;
            // Receiver gone means the run already stopped
            let _ = tx.send((pos, response));
        });
    }
}
