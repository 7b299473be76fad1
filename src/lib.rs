//! Scopus Resolver Core Library
//!
//! Batch resolution of DOIs and article titles to Scopus identifiers, with an
//! OpenAlex fallback for works Scopus cannot match.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`input`] - Line validation and canonical-key deduplication
//! - [`cache`] - Persisted write-through cache of successful resolutions
//! - [`source`] - Scopus and OpenAlex lookup clients behind one trait
//! - [`pipeline`] - Pacing, retries, worker scheduling, checkpoints, and stats

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod input;
pub mod pipeline;
pub mod source;
pub(crate) mod storage;
#[cfg(test)]
pub mod test_support;
pub(crate) mod user_agent;

// Re-export commonly used types
pub use cache::{CacheEntry, CacheError, CacheStats, ResultCache};
pub use input::{CanonicalKey, DedupItem, InputItem, InputReport, SearchMode, prepare_items};
pub use pipeline::{
    Outcome, Pipeline, PipelineConfig, PipelineError, ResolutionResult, RetryPolicy, RunReport,
    RunStats, SourceUsed,
};
pub use source::{
    HttpTimeouts, OpenAlexClient, ScopusClient, SourceClient, SourceError, SourceHit, SourceKind,
};
