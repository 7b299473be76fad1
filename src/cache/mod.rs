//! Persisted response cache keyed by [`CanonicalKey`].
//!
//! The cache is loaded once at construction and written through to disk after
//! every successful `put`, so a crash never loses an earlier success. Reads go
//! through a [`DashMap`] and may run concurrently from every worker; writes are
//! serialized by a single writer lock held across the insert and the flush.
//!
//! A missing or unreadable cache file yields an empty cache. Resolution must
//! never be blocked by cache problems, so load failures are logged and ignored.
//!
//! # Example
//!
//! ```no_run
//! use scopus_resolver_core::cache::{CacheEntry, ResultCache};
//! use scopus_resolver_core::input::CanonicalKey;
//! use scopus_resolver_core::source::SourceKind;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cache = ResultCache::open(".scopus_cache.json");
//! let key = CanonicalKey::from_raw("10.1016/j.softx.2019.100263");
//! if cache.get(&key).is_none() {
//!     let entry = CacheEntry::new(key.clone(), Some("Title".into()), Some("2-s2.0-1".into()), None, SourceKind::Primary);
//!     cache.put(entry)?;
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::input::CanonicalKey;
use crate::source::SourceKind;
use crate::storage::write_json_atomic;

/// A cached successful resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Canonical key the entry is stored under.
    pub key: CanonicalKey,
    /// Title reported by the source.
    pub title: Option<String>,
    /// Resolved identifier (Scopus EID).
    pub resolved_id: Option<String>,
    /// DOI reported by the source (title searches).
    #[serde(default)]
    pub doi: Option<String>,
    /// Source that produced the entry.
    pub source: SourceKind,
    /// When the entry was written.
    pub cached_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Creates an entry stamped with the current time.
    #[must_use]
    pub fn new(
        key: CanonicalKey,
        title: Option<String>,
        resolved_id: Option<String>,
        doi: Option<String>,
        source: SourceKind,
    ) -> Self {
        Self {
            key,
            title,
            resolved_id,
            doi,
            source,
            cached_at: Utc::now(),
        }
    }
}

/// Cache size information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of entries held.
    pub count: usize,
    /// Size of the backing file in bytes (0 when absent or in-memory).
    pub file_size: u64,
    /// Backing file path, if any.
    pub path: Option<PathBuf>,
}

/// Errors writing the cache.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Backing file could not be written.
    #[error("failed to write cache file {path}: {source}\n  Suggestion: check permissions or run with --no-cache")]
    Write {
        /// Cache file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

/// Write-through key/value cache of successful resolutions.
#[derive(Debug)]
pub struct ResultCache {
    path: Option<PathBuf>,
    entries: DashMap<CanonicalKey, CacheEntry>,
    writer: Mutex<()>,
}

impl ResultCache {
    /// Opens the cache backed by `path`, loading any existing entries.
    ///
    /// Missing files give an empty cache. Corrupted files are logged and
    /// treated as empty; the file is left alone until the next write.
    #[must_use]
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let entries = DashMap::new();
        for (key, entry) in load_entries(&path) {
            entries.insert(key, entry);
        }
        info!(entries = entries.len(), "cache loaded");
        Self {
            path: Some(path),
            entries,
            writer: Mutex::new(()),
        }
    }

    /// Creates a cache with no backing file.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: DashMap::new(),
            writer: Mutex::new(()),
        }
    }

    /// Looks up an entry by canonical key.
    #[must_use]
    pub fn get(&self, key: &CanonicalKey) -> Option<CacheEntry> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Stores an entry and flushes the whole cache to disk.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Write`] if the backing file cannot be replaced.
    /// The in-memory entry is kept either way.
    pub fn put(&self, entry: CacheEntry) -> Result<(), CacheError> {
        let _guard = self.writer.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        debug!(key = %entry.key, "caching resolution");
        self.entries.insert(entry.key.clone(), entry);
        self.flush_locked()
    }

    /// Removes every entry and rewrites the backing file.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Write`] if the backing file cannot be replaced.
    pub fn clear(&self) -> Result<(), CacheError> {
        let _guard = self.writer.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        self.entries.clear();
        info!("cache cleared");
        self.flush_locked()
    }

    /// Returns entry count and backing file size.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let file_size = self
            .path
            .as_deref()
            .and_then(|p| std::fs::metadata(p).ok())
            .map_or(0, |m| m.len());
        CacheStats {
            count: self.entries.len(),
            file_size,
            path: self.path.clone(),
        }
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn flush_locked(&self) -> Result<(), CacheError> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        let snapshot: BTreeMap<CanonicalKey, CacheEntry> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        write_json_atomic(path, &snapshot).map_err(|source| CacheError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn load_entries(path: &Path) -> BTreeMap<CanonicalKey, CacheEntry> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return BTreeMap::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not read cache; starting empty");
            return BTreeMap::new();
        }
    };
    match serde_json::from_str(&raw) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cache file is corrupted; starting empty");
            BTreeMap::new()
        }
    }
}
