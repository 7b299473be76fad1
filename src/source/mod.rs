//! Source adapters for bibliographic lookups.
//!
//! A source client turns one query (a DOI or a title) into either a
//! [`SourceHit`] or a classified [`SourceError`]. Two implementations ship:
//!
//! - [`ScopusClient`] - the primary service, returns Scopus identifiers (EIDs)
//! - [`OpenAlexClient`] - the fallback service, returns titles and DOIs only
//!
//! Clients are stateless with respect to pacing and retries; the pipeline owns
//! both so that every worker shares one request budget.

mod error;
mod http_client;
mod openalex;
mod scopus;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::input::SearchMode;

pub use error::{SourceError, classify_status, parse_retry_after};
pub use http_client::{
    ClientBuildError, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_READ_TIMEOUT_SECS, HttpTimeouts,
};
pub use openalex::OpenAlexClient;
pub use scopus::ScopusClient;

/// Which service produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// The primary (identifier-bearing) service.
    Primary,
    /// The fallback (metadata-only) service.
    Fallback,
}

impl SourceKind {
    /// Returns the lowercase name used in logs and output files.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Fallback => "fallback",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A successful answer from a source.
///
/// A hit may still be incomplete: the primary can return a record without an
/// identifier, and the fallback can return a record without a title.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceHit {
    /// Work title, if reported.
    pub title: Option<String>,
    /// Scopus identifier, primary service only.
    pub resolved_id: Option<String>,
    /// DOI of the matched work, if reported.
    pub doi: Option<String>,
    /// HTTP status of the response.
    pub http_status: u16,
}

impl SourceHit {
    /// True when the hit carries a Scopus identifier.
    #[must_use]
    pub fn has_id(&self) -> bool {
        self.resolved_id.as_deref().is_some_and(|id| !id.is_empty())
    }
}

/// A lookup service the pipeline can query.
///
/// Implementations must be `Send + Sync`; one instance is shared by every
/// worker.
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Short name for logs (e.g. "scopus").
    fn name(&self) -> &str;

    /// Whether this client serves as primary or fallback.
    fn kind(&self) -> SourceKind;

    /// Performs one lookup. Implementations do not retry or pace.
    ///
    /// # Errors
    ///
    /// Returns a classified [`SourceError`] for every non-hit outcome.
    async fn lookup(&self, query: &str, mode: SearchMode) -> Result<SourceHit, SourceError>;
}

/// Reads the Retry-After header as a string, if present.
pub(crate) fn retry_after_header(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
