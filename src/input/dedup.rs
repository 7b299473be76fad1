//! Canonical keys and duplicate detection.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::InputItem;

/// Normalized, case-insensitive form of an item's content.
///
/// Used both to detect duplicates and as the cache key. Derivation is pure:
/// the same raw text always yields the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalKey(String);

impl CanonicalKey {
    /// Lower-cases the input and collapses all whitespace runs to one space.
    #[must_use]
    pub fn from_raw(raw: &str) -> Self {
        let normalized = raw
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        Self(normalized)
    }

    /// Returns the key text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A validated item ready for scheduling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupItem {
    /// The underlying input line.
    pub item: InputItem,
    /// Its canonical key.
    pub key: CanonicalKey,
    /// Line number of the first item with the same key, when this is a repeat.
    pub duplicate_of: Option<usize>,
}

impl DedupItem {
    /// True when this item reuses another item's outcome.
    #[must_use]
    pub fn is_duplicate(&self) -> bool {
        self.duplicate_of.is_some()
    }
}

/// A repeated line, kept for the duplicate report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateLine {
    /// Line number of the repeat.
    pub index: usize,
    /// The repeated line as read.
    pub raw: String,
    /// Line number of the first occurrence.
    pub first_seen: usize,
}

/// Groups valid items by canonical key.
///
/// The first item of each group is kept as-is. Later items are reported as
/// duplicates and either kept with `duplicate_of` set or, with `skip`,
/// dropped from the returned list.
#[must_use]
pub fn deduplicate(items: Vec<InputItem>, skip: bool) -> (Vec<DedupItem>, Vec<DuplicateLine>) {
    let mut first_seen: HashMap<CanonicalKey, usize> = HashMap::new();
    let mut kept = Vec::with_capacity(items.len());
    let mut duplicates = Vec::new();

    for item in items {
        let key = CanonicalKey::from_raw(&item.raw);
        if let Some(&first) = first_seen.get(&key) {
            duplicates.push(DuplicateLine {
                index: item.index,
                raw: item.raw.clone(),
                first_seen: first,
            });
            if !skip {
                kept.push(DedupItem {
                    item,
                    key,
                    duplicate_of: Some(first),
                });
            }
        } else {
            first_seen.insert(key.clone(), item.index);
            kept.push(DedupItem {
                item,
                key,
                duplicate_of: None,
            });
        }
    }

    (kept, duplicates)
}
