//! Ordered result collection and run statistics.

use serde::Serialize;

use super::result::{Outcome, ResolutionResult, SourceUsed};
use crate::input::InputReport;

/// Counters for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    /// Results held (seeded plus released).
    pub total: usize,
    /// Results classified `found`.
    pub found: usize,
    /// Found results without a Scopus identifier (fallback only).
    pub partial: usize,
    /// Results classified `not_found`.
    pub not_found: usize,
    /// Results classified `error`.
    pub errors: usize,
    /// Network calls made by this run; results carried over from a
    /// checkpoint do not count.
    pub api_requests: u64,
    /// Items this run served from the cache.
    pub cache_hits: usize,
}

impl RunStats {
    /// Counts the outcome of any held result.
    fn count(&mut self, result: &ResolutionResult) {
        self.total += 1;
        match result.outcome {
            Outcome::Found => {
                self.found += 1;
                if !result.has_resolved_id() {
                    self.partial += 1;
                }
            }
            Outcome::NotFound => self.not_found += 1,
            Outcome::Error => self.errors += 1,
        }
    }

    /// Counts a result produced by this run, including the work behind it.
    fn add(&mut self, result: &ResolutionResult) {
        self.count(result);
        self.api_requests += u64::from(result.attempts);
        if result.source_used == SourceUsed::Cache && !result.is_duplicate() {
            self.cache_hits += 1;
        }
    }

    /// Share of results with a Scopus identifier, in percent.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.found - self.partial) as f64 / self.total as f64 * 100.0
    }
}

/// Finished output of a run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Results in line order.
    pub results: Vec<ResolutionResult>,
    /// Counters.
    pub stats: RunStats,
    /// Validation and duplicate findings.
    pub input_report: InputReport,
    /// True when the run stopped before every item was released.
    pub interrupted: bool,
}

/// Accumulates released results in order.
#[derive(Debug, Default)]
pub struct Aggregator {
    results: Vec<ResolutionResult>,
    stats: RunStats,
}

impl Aggregator {
    /// Creates an empty aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds results carried over from a checkpoint.
    ///
    /// Their outcomes count toward the totals; their requests were made by
    /// an earlier run.
    pub fn seed(&mut self, results: impl IntoIterator<Item = ResolutionResult>) {
        for result in results {
            self.stats.count(&result);
            self.results.push(result);
        }
    }

    /// Adds a released result.
    pub fn record(&mut self, result: ResolutionResult) {
        self.stats.add(&result);
        self.results.push(result);
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> RunStats {
        self.stats
    }

    /// Results collected so far.
    #[must_use]
    pub fn results(&self) -> &[ResolutionResult] {
        &self.results
    }

    /// Consumes the aggregator into a report.
    #[must_use]
    pub fn finish(self, input_report: InputReport, interrupted: bool) -> RunReport {
        RunReport {
            results: self.results,
            stats: self.stats,
            input_report,
            interrupted,
        }
    }
}
