//! Per-line format checks for DOI and title input.

use std::sync::LazyLock;

use regex::Regex;
use tracing::trace;

use super::error::ValidationError;
use super::{InputItem, SearchMode};

/// Minimum trimmed length of a title worth searching for.
pub const MIN_TITLE_LENGTH: usize = 10;

/// Whole-line DOI pattern: `10.` + 4-9 digit registrant + `/` + suffix.
#[allow(clippy::expect_used)]
static DOI_LINE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^10\.\d{4,9}/[-._;()/:A-Z0-9]+$").expect("DOI line regex is valid") // Static pattern, safe to panic
});

/// Verdict for one input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
    /// Line number of the item.
    pub item_index: usize,
    /// Whether the line may be processed.
    pub valid: bool,
    /// Rejection reason for invalid lines.
    pub reason: Option<String>,
}

/// A rejected line, kept for the validation report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidLine {
    /// Line number.
    pub index: usize,
    /// The line as read.
    pub raw: String,
    /// Why it was rejected.
    pub reason: ValidationError,
}

/// Validation results partitioned into valid items and rejected lines.
#[derive(Debug, Clone, Default)]
pub struct ValidationBatch {
    /// One outcome per input item, in input order.
    pub outcomes: Vec<ValidationOutcome>,
    /// Items that passed, in input order.
    pub valid: Vec<InputItem>,
    /// Items that failed, in input order.
    pub invalid: Vec<InvalidLine>,
}

/// Checks a single line against the rules for `mode`.
///
/// # Errors
///
/// Returns the [`ValidationError`] describing why the line is unusable.
pub fn validate_line(raw: &str, mode: SearchMode) -> Result<(), ValidationError> {
    let value = raw.trim();
    match mode {
        SearchMode::Doi => {
            if value.is_empty() {
                return Err(ValidationError::Empty { kind: "DOI" });
            }
            if !DOI_LINE_PATTERN.is_match(value) {
                return Err(ValidationError::invalid_doi(value));
            }
        }
        SearchMode::Title => {
            if value.is_empty() {
                return Err(ValidationError::Empty { kind: "title" });
            }
            if value.chars().count() < MIN_TITLE_LENGTH {
                return Err(ValidationError::title_too_short(value, MIN_TITLE_LENGTH));
            }
        }
    }
    Ok(())
}

/// Validates every item, preserving input order in each partition.
#[must_use]
pub fn validate_batch(items: Vec<InputItem>, mode: SearchMode) -> ValidationBatch {
    let mut batch = ValidationBatch::default();
    for item in items {
        match validate_line(&item.raw, mode) {
            Ok(()) => {
                batch.outcomes.push(ValidationOutcome {
                    item_index: item.index,
                    valid: true,
                    reason: None,
                });
                batch.valid.push(item);
            }
            Err(reason) => {
                trace!(line = item.index, %reason, "line failed validation");
                batch.outcomes.push(ValidationOutcome {
                    item_index: item.index,
                    valid: false,
                    reason: Some(reason.to_string()),
                });
                batch.invalid.push(InvalidLine {
                    index: item.index,
                    raw: item.raw,
                    reason,
                });
            }
        }
    }
    batch
}
