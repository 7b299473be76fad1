//! Scopus Search API client (primary source).
//!
//! Queries `GET {base}/content/search/scopus?query=DOI(..)|TITLE(..)&count=1`
//! with the API key in the `X-ELS-APIKey` header and reads the first entry of
//! `search-results.entry`.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use super::http_client::{ClientBuildError, HttpTimeouts, build_source_http_client};
use super::{SourceClient, SourceError, SourceHit, SourceKind, classify_status, retry_after_header};
use crate::input::SearchMode;

const DEFAULT_BASE_URL: &str = "https://api.elsevier.com";
const SEARCH_PATH: &str = "/content/search/scopus";
const SOURCE_NAME: &str = "scopus";

// ==================== Response Types ====================

#[derive(Debug, Deserialize)]
pub(crate) struct ScopusResponse {
    #[serde(rename = "search-results")]
    pub search_results: Option<ScopusSearchResults>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ScopusSearchResults {
    #[serde(default)]
    pub entry: Vec<ScopusEntry>,
}

/// One search result. An empty result set comes back as a single entry
/// carrying only an `error` field.
#[derive(Debug, Deserialize)]
pub(crate) struct ScopusEntry {
    #[serde(rename = "dc:title")]
    pub title: Option<String>,
    pub eid: Option<String>,
    #[serde(rename = "prism:doi")]
    pub doi: Option<String>,
    pub error: Option<String>,
}

/// Converts a parsed response body into a hit, or `NotFound` when the result
/// set is empty.
pub(crate) fn hit_from_response(body: ScopusResponse, http_status: u16) -> Result<SourceHit, SourceError> {
    let Some(entry) = body.search_results.and_then(|r| r.entry.into_iter().next()) else {
        return Err(SourceError::not_found(SOURCE_NAME));
    };
    if let Some(error) = entry.error {
        debug!(%error, "Scopus returned an empty result set");
        return Err(SourceError::not_found(SOURCE_NAME));
    }
    Ok(SourceHit {
        title: entry.title.filter(|t| !t.trim().is_empty()),
        resolved_id: entry.eid.filter(|id| !id.trim().is_empty()),
        doi: entry.doi,
        http_status,
    })
}

/// Builds the Scopus query expression for a lookup.
pub(crate) fn query_expression(query: &str, mode: SearchMode) -> String {
    match mode {
        SearchMode::Doi => format!("DOI({query})"),
        SearchMode::Title => format!("TITLE({query})"),
    }
}

// ==================== ScopusClient ====================

/// Looks up Scopus identifiers via the Elsevier Scopus Search API.
pub struct ScopusClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl ScopusClient {
    /// Creates a client against the production API.
    ///
    /// # Errors
    ///
    /// Returns [`ClientBuildError`] if the HTTP client cannot be built.
    pub fn new(api_key: impl Into<String>, timeouts: HttpTimeouts) -> Result<Self, ClientBuildError> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL, timeouts)
    }

    /// Creates a client with a custom base URL (for testing with wiremock).
    ///
    /// # Errors
    ///
    /// Returns [`ClientBuildError`] if the HTTP client cannot be built.
    pub fn with_base_url(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeouts: HttpTimeouts,
    ) -> Result<Self, ClientBuildError> {
        Ok(Self {
            client: build_source_http_client(SOURCE_NAME, timeouts)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }
}

impl std::fmt::Debug for ScopusClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopusClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SourceClient for ScopusClient {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Primary
    }

    #[tracing::instrument(skip(self), fields(source = SOURCE_NAME))]
    async fn lookup(&self, query: &str, mode: SearchMode) -> Result<SourceHit, SourceError> {
        let expression = query_expression(query, mode);
        let url = format!(
            "{}{}?query={}&count=1",
            self.base_url,
            SEARCH_PATH,
            urlencoding::encode(&expression)
        );

        let response = self
            .client
            .get(&url)
            .header("X-ELS-APIKey", &self.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Scopus request failed");
                SourceError::from_transport(SOURCE_NAME, &e)
            })?;

        if let Some(remaining) = response.headers().get("x-ratelimit-remaining") {
            debug!(quota_remaining = ?remaining, "Scopus quota");
        }

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let retry_after = retry_after_header(&response);
            let error = classify_status(SOURCE_NAME, status, retry_after.as_deref());
            debug!(status, %error, "Scopus returned an error status");
            return Err(error);
        }

        let body: ScopusResponse = response.json().await.map_err(|e| {
            warn!(error = %e, "failed to parse Scopus response");
            SourceError::Transient {
                source_name: SOURCE_NAME.to_string(),
                reason: format!("malformed response body: {e}"),
                status: Some(status),
            }
        })?;

        hit_from_response(body, status)
    }
}
