//! Per-item resolution records.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cache::CacheEntry;
use crate::input::{CanonicalKey, DedupItem};
use crate::source::SourceKind;

/// Terminal classification of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// A source returned usable data.
    Found,
    /// Both sources answered without usable data.
    NotFound,
    /// Retries exhausted or an unexpected failure.
    Error,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Found => "found",
            Self::NotFound => "not_found",
            Self::Error => "error",
        })
    }
}

/// Where the data in a result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceUsed {
    /// Served from the response cache.
    Cache,
    /// Primary service.
    Primary,
    /// Fallback service.
    Fallback,
    /// No source produced data.
    None,
}

impl From<SourceKind> for SourceUsed {
    fn from(kind: SourceKind) -> Self {
        match kind {
            SourceKind::Primary => Self::Primary,
            SourceKind::Fallback => Self::Fallback,
        }
    }
}

/// Outcome of one item, as released by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionResult {
    /// 1-based input line number.
    pub item_index: usize,
    /// Canonical form of the query.
    pub canonical_key: CanonicalKey,
    /// Trimmed input line.
    pub query: String,
    /// Title reported by a source.
    pub title: Option<String>,
    /// Scopus identifier.
    pub resolved_id: Option<String>,
    /// DOI reported by a source.
    pub doi: Option<String>,
    /// Terminal classification.
    pub outcome: Outcome,
    /// Where the data came from.
    pub source_used: SourceUsed,
    /// Network calls made for this item.
    pub attempts: u32,
    /// Line number of the first occurrence when this item is a duplicate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duplicate_of: Option<usize>,
    /// Last failure message for `error` outcomes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResolutionResult {
    /// Builds a result served from the cache.
    #[must_use]
    pub fn from_cache(item: &DedupItem, entry: CacheEntry) -> Self {
        Self {
            item_index: item.item.index,
            canonical_key: item.key.clone(),
            query: item.item.query().to_string(),
            title: entry.title,
            resolved_id: entry.resolved_id,
            doi: entry.doi,
            outcome: Outcome::Found,
            source_used: SourceUsed::Cache,
            attempts: 0,
            duplicate_of: None,
            error: None,
        }
    }

    /// Builds the result of a duplicate from its first occurrence's result.
    ///
    /// Data and classification are copied; no calls are attributed to it.
    #[must_use]
    pub fn for_duplicate(item: &DedupItem, original: &ResolutionResult) -> Self {
        Self {
            item_index: item.item.index,
            canonical_key: item.key.clone(),
            query: item.item.query().to_string(),
            attempts: 0,
            duplicate_of: Some(original.item_index),
            ..original.clone()
        }
    }

    /// True when the result carries a Scopus identifier.
    #[must_use]
    pub fn has_resolved_id(&self) -> bool {
        self.resolved_id.as_deref().is_some_and(|id| !id.is_empty())
    }

    /// True for results reusing another item's outcome.
    #[must_use]
    pub fn is_duplicate(&self) -> bool {
        self.duplicate_of.is_some()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::input::{InputItem, deduplicate};

    fn items(lines: &[&str]) -> Vec<DedupItem> {
        let lines: Vec<String> = lines.iter().map(|s| (*s).to_string()).collect();
        deduplicate(InputItem::from_lines(&lines), false).0
    }

    #[test]
    fn test_from_cache_marks_source_and_zero_attempts() {
        let items = items(&["10.1000/ABC"]);
        let entry = CacheEntry::new(
            items[0].key.clone(),
            Some("T".to_string()),
            Some("2-s2.0-1".to_string()),
            None,
            SourceKind::Primary,
        );
        let result = ResolutionResult::from_cache(&items[0], entry);
        assert_eq!(result.source_used, SourceUsed::Cache);
        assert_eq!(result.outcome, Outcome::Found);
        assert_eq!(result.attempts, 0);
        assert_eq!(result.item_index, 1);
        assert_eq!(result.query, "10.1000/ABC");
    }

    #[test]
    fn test_for_duplicate_copies_outcome() {
        let items = items(&["10.1000/abc", "10.1000/ABC"]);
        let original = ResolutionResult {
            item_index: 1,
            canonical_key: items[0].key.clone(),
            query: "10.1000/abc".to_string(),
            title: Some("T".to_string()),
            resolved_id: Some("2-s2.0-1".to_string()),
            doi: None,
            outcome: Outcome::Found,
            source_used: SourceUsed::Primary,
            attempts: 2,
            duplicate_of: None,
            error: None,
        };

        let dup = ResolutionResult::for_duplicate(&items[1], &original);
        assert_eq!(dup.item_index, 2);
        assert_eq!(dup.duplicate_of, Some(1));
        assert_eq!(dup.attempts, 0);
        assert_eq!(dup.resolved_id, original.resolved_id);
        assert_eq!(dup.source_used, SourceUsed::Primary);
        assert_eq!(dup.query, "10.1000/ABC");
        assert!(dup.is_duplicate());
    }

    #[test]
    fn test_outcome_serde_snake_case() {
        assert_eq!(serde_json::to_string(&Outcome::NotFound).unwrap(), "\"not_found\"");
        assert_eq!(serde_json::to_string(&SourceUsed::Cache).unwrap(), "\"cache\"");
        assert_eq!(Outcome::Error.to_string(), "error");
    }
}
