//! Periodic progress snapshots and resume.
//!
//! The manager owns the released results of the current run. Every
//! `interval` releases it replaces the checkpoint file atomically, so an
//! interrupted run can pick up after the last released item.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::result::ResolutionResult;
use crate::input::SearchMode;
use crate::storage::write_json_atomic;

/// Default number of released items between checkpoint writes.
pub const DEFAULT_CHECKPOINT_INTERVAL: usize = 10;

/// Persisted progress of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointState {
    /// Mode of the run that wrote the checkpoint.
    pub mode: SearchMode,
    /// Raw line count of the input the run was started with.
    pub total_items: usize,
    /// Highest released line number (0 when nothing was released).
    pub last_processed_index: usize,
    /// Released results in line order.
    pub results: Vec<ResolutionResult>,
    /// When the snapshot was written.
    pub saved_at: DateTime<Utc>,
}

/// Checkpoint failures.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// The checkpoint belongs to a different run.
    #[error(
        "checkpoint {path} does not match this run: {reason}\n  Suggestion: run without --resume, or remove the checkpoint file"
    )]
    Mismatch {
        /// Checkpoint path.
        path: PathBuf,
        /// Which field differs.
        reason: String,
    },

    /// The checkpoint exists but cannot be read or parsed.
    #[error("cannot read checkpoint {path}: {reason}\n  Suggestion: remove the checkpoint file to start fresh")]
    Unreadable {
        /// Checkpoint path.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },

    /// The checkpoint could not be written.
    #[error("failed to write checkpoint {path}: {source}")]
    Write {
        /// Checkpoint path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

/// Loads a checkpoint for resuming a run.
///
/// Returns `Ok(None)` when no checkpoint exists. The file is never modified.
///
/// # Errors
///
/// Returns [`CheckpointError::Mismatch`] when mode or input size differ and
/// [`CheckpointError::Unreadable`] when the file cannot be parsed.
#[instrument(skip_all, fields(path = %path.display(), %mode, total_items))]
pub fn load_for_resume(
    path: &Path,
    mode: SearchMode,
    total_items: usize,
) -> Result<Option<CheckpointState>, CheckpointError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("no checkpoint found; starting fresh");
            return Ok(None);
        }
        Err(e) => {
            return Err(CheckpointError::Unreadable {
                path: path.to_path_buf(),
                reason: e.to_string(),
            });
        }
    };

    let state: CheckpointState =
        serde_json::from_str(&raw).map_err(|e| CheckpointError::Unreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    if state.mode != mode {
        return Err(CheckpointError::Mismatch {
            path: path.to_path_buf(),
            reason: format!("mode is {} but this run uses {mode}", state.mode),
        });
    }
    if state.total_items != total_items {
        return Err(CheckpointError::Mismatch {
            path: path.to_path_buf(),
            reason: format!(
                "input had {} lines but now has {total_items}",
                state.total_items
            ),
        });
    }

    info!(
        last_processed_index = state.last_processed_index,
        results = state.results.len(),
        "resuming from checkpoint"
    );
    Ok(Some(state))
}

/// Owner of the in-progress checkpoint state.
#[derive(Debug)]
pub struct CheckpointManager {
    path: PathBuf,
    interval: usize,
    mode: SearchMode,
    total_items: usize,
    last_processed_index: usize,
    results: Vec<ResolutionResult>,
    since_save: usize,
}

impl CheckpointManager {
    /// Creates a manager for a fresh run.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, mode: SearchMode, total_items: usize) -> Self {
        Self {
            path: path.into(),
            interval: DEFAULT_CHECKPOINT_INTERVAL,
            mode,
            total_items,
            last_processed_index: 0,
            results: Vec::new(),
            since_save: 0,
        }
    }

    /// Continues from a loaded checkpoint.
    #[must_use]
    pub fn resumed(path: impl Into<PathBuf>, state: CheckpointState) -> Self {
        Self {
            path: path.into(),
            interval: DEFAULT_CHECKPOINT_INTERVAL,
            mode: state.mode,
            total_items: state.total_items,
            last_processed_index: state.last_processed_index,
            results: state.results,
            since_save: 0,
        }
    }

    /// Sets the write interval (at least 1).
    #[must_use]
    pub fn with_interval(mut self, interval: usize) -> Self {
        self.interval = interval.max(1);
        self
    }

    /// Highest released line number so far.
    #[must_use]
    pub fn last_processed_index(&self) -> usize {
        self.last_processed_index
    }

    /// Results held so far (seeded plus released).
    #[must_use]
    pub fn results(&self) -> &[ResolutionResult] {
        &self.results
    }

    /// Records a released result, writing a snapshot every `interval` items.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Write`] when a due snapshot cannot be written.
    /// The result is recorded either way.
    pub fn record(&mut self, result: ResolutionResult) -> Result<(), CheckpointError> {
        self.last_processed_index = self.last_processed_index.max(result.item_index);
        self.results.push(result);
        self.since_save += 1;
        if self.since_save >= self.interval {
            self.flush()?;
        }
        Ok(())
    }

    /// Writes a snapshot now.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Write`] when the file cannot be replaced.
    pub fn flush(&mut self) -> Result<(), CheckpointError> {
        let state = self.snapshot();
        write_json_atomic(&self.path, &state).map_err(|source| CheckpointError::Write {
            path: self.path.clone(),
            source,
        })?;
        self.since_save = 0;
        debug!(
            path = %self.path.display(),
            last_processed_index = self.last_processed_index,
            "checkpoint written"
        );
        Ok(())
    }

    /// Best-effort final write; failures are logged.
    pub fn flush_best_effort(&mut self) {
        if let Err(error) = self.flush() {
            warn!(%error, "final checkpoint write failed");
        }
    }

    fn snapshot(&self) -> CheckpointState {
        CheckpointState {
            mode: self.mode,
            total_items: self.total_items,
            last_processed_index: self.last_processed_index,
            results: self.results.clone(),
            saved_at: Utc::now(),
        }
    }
}
