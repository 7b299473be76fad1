//! Input handling: search mode, raw line items, validation and deduplication.
//!
//! Raw lines are turned into [`InputItem`]s (1-based line numbers), checked by
//! the validator, then canonicalized and grouped by the deduplicator. The
//! result is the ordered work list handed to the scheduler plus an
//! [`InputReport`] describing everything that was rejected or folded.
//!
//! # Example
//!
//! ```
//! use scopus_resolver_core::input::{SearchMode, prepare_items};
//!
//! let lines = vec![
//!     "10.1016/j.cell.2020.01.001".to_string(),
//!     "not a doi".to_string(),
//!     "10.1016/J.CELL.2020.01.001".to_string(),
//! ];
//! let (items, report) = prepare_items(&lines, SearchMode::Doi, false);
//! assert_eq!(items.len(), 2);
//! assert_eq!(report.invalid.len(), 1);
//! assert_eq!(report.duplicates[0].first_seen, 1);
//! ```

mod dedup;
mod error;
mod validate;

pub use dedup::{CanonicalKey, DedupItem, DuplicateLine, deduplicate};
pub use error::ValidationError;
pub use validate::{
    InvalidLine, MIN_TITLE_LENGTH, ValidationBatch, ValidationOutcome, validate_batch,
    validate_line,
};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// What the input lines contain and therefore how sources are queried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// One DOI per line.
    Doi,
    /// One article title per line.
    Title,
}

impl SearchMode {
    /// Returns the stable lowercase label used in persisted state.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Doi => "doi",
            Self::Title => "title",
        }
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "doi" => Ok(Self::Doi),
            "title" => Ok(Self::Title),
            other => Err(format!("unknown search mode '{other}' (expected doi or title)")),
        }
    }
}

/// One raw input line with its permanent identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputItem {
    /// 1-based line number in the original input.
    pub index: usize,
    /// The line exactly as read.
    pub raw: String,
}

impl InputItem {
    /// Creates an item for the given 1-based line number.
    #[must_use]
    pub fn new(index: usize, raw: impl Into<String>) -> Self {
        Self {
            index,
            raw: raw.into(),
        }
    }

    /// Numbers raw lines starting at 1.
    #[must_use]
    pub fn from_lines(lines: &[String]) -> Vec<Self> {
        lines
            .iter()
            .enumerate()
            .map(|(i, line)| Self::new(i + 1, line.clone()))
            .collect()
    }

    /// The value sent to lookup services (surrounding whitespace removed).
    #[must_use]
    pub fn query(&self) -> &str {
        self.raw.trim()
    }
}

/// Summary of validation and deduplication for the reporting collaborator.
#[derive(Debug, Clone, Default)]
pub struct InputReport {
    /// Number of raw lines read.
    pub total: usize,
    /// Number of lines that passed validation.
    pub valid: usize,
    /// Lines rejected by the validator.
    pub invalid: Vec<InvalidLine>,
    /// Lines whose canonical key repeats an earlier line.
    pub duplicates: Vec<DuplicateLine>,
    /// Whether duplicates were removed before scheduling.
    pub duplicates_skipped: bool,
}

impl InputReport {
    /// Number of distinct canonical keys among valid lines.
    #[must_use]
    pub fn unique(&self) -> usize {
        self.valid - self.duplicates.len()
    }

    /// True when anything was rejected or folded.
    #[must_use]
    pub fn has_issues(&self) -> bool {
        !self.invalid.is_empty() || !self.duplicates.is_empty()
    }
}

/// Validates and deduplicates raw lines into the ordered work list.
///
/// Returned items are ordered by line number. With `skip_duplicates` the
/// non-first members of each key group are dropped; otherwise they are kept
/// and carry `duplicate_of`.
#[tracing::instrument(skip(lines), fields(lines = lines.len()))]
#[must_use]
pub fn prepare_items(
    lines: &[String],
    mode: SearchMode,
    skip_duplicates: bool,
) -> (Vec<DedupItem>, InputReport) {
    let items = InputItem::from_lines(lines);
    let batch = validate_batch(items, mode);
    let valid = batch.valid.len();
    let (deduped, duplicates) = deduplicate(batch.valid, skip_duplicates);

    info!(
        total = lines.len(),
        valid,
        invalid = batch.invalid.len(),
        duplicates = duplicates.len(),
        "validated input"
    );
    for line in &batch.invalid {
        debug!(line = line.index, reason = %line.reason, "rejected input line");
    }

    let report = InputReport {
        total: lines.len(),
        valid,
        invalid: batch.invalid,
        duplicates,
        duplicates_skipped: skip_duplicates,
    };
    (deduped, report)
}
