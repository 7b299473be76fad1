//! OpenAlex works API client (fallback source).
//!
//! DOI mode fetches `GET {base}/works/doi:{doi}` and reports the title. Title
//! mode searches `GET {base}/works?search=..&per-page=1` and reports the first
//! result's title and DOI. OpenAlex never yields Scopus identifiers.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use super::http_client::{ClientBuildError, HttpTimeouts, build_source_http_client};
use super::{SourceClient, SourceError, SourceHit, SourceKind, classify_status, retry_after_header};
use crate::input::SearchMode;

const DEFAULT_BASE_URL: &str = "https://api.openalex.org";
const SOURCE_NAME: &str = "openalex";
const DOI_URL_PREFIX: &str = "https://doi.org/";

// ==================== Response Types ====================

#[derive(Debug, Default, Deserialize)]
pub(crate) struct OpenAlexWork {
    pub title: Option<String>,
    pub display_name: Option<String>,
    pub doi: Option<String>,
    pub ids: Option<OpenAlexIds>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct OpenAlexIds {
    pub doi: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OpenAlexSearch {
    #[serde(default)]
    pub results: Vec<OpenAlexWork>,
}

impl OpenAlexWork {
    fn best_title(&self) -> Option<String> {
        self.title
            .as_deref()
            .or(self.display_name.as_deref())
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    }

    fn bare_doi(&self) -> Option<String> {
        self.ids
            .as_ref()
            .and_then(|ids| ids.doi.as_deref())
            .or(self.doi.as_deref())
            .map(strip_doi_prefix)
            .filter(|d| !d.is_empty())
    }
}

/// Strips a `https://doi.org/` prefix, case-insensitively.
pub(crate) fn strip_doi_prefix(value: &str) -> String {
    let trimmed = value.trim();
    match trimmed.get(..DOI_URL_PREFIX.len()) {
        Some(head) if head.eq_ignore_ascii_case(DOI_URL_PREFIX) => {
            trimmed[DOI_URL_PREFIX.len()..].to_string()
        }
        _ => trimmed.to_string(),
    }
}

// ==================== OpenAlexClient ====================

/// Looks up titles and DOIs via the OpenAlex works API.
///
/// An optional contact email is sent as `mailto` to join the OpenAlex polite
/// pool.
pub struct OpenAlexClient {
    client: Client,
    base_url: String,
    mailto: Option<String>,
}

impl OpenAlexClient {
    /// Creates a client against the production API.
    ///
    /// # Errors
    ///
    /// Returns [`ClientBuildError`] if the HTTP client cannot be built.
    pub fn new(timeouts: HttpTimeouts) -> Result<Self, ClientBuildError> {
        Self::with_base_url(DEFAULT_BASE_URL, timeouts)
    }

    /// Creates a client with a custom base URL (for testing with wiremock).
    ///
    /// # Errors
    ///
    /// Returns [`ClientBuildError`] if the HTTP client cannot be built.
    pub fn with_base_url(
        base_url: impl Into<String>,
        timeouts: HttpTimeouts,
    ) -> Result<Self, ClientBuildError> {
        Ok(Self {
            client: build_source_http_client(SOURCE_NAME, timeouts)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            mailto: None,
        })
    }

    /// Sets the polite-pool contact email. Blank values are ignored.
    #[must_use]
    pub fn with_mailto(mut self, mailto: Option<String>) -> Self {
        self.mailto = mailto.filter(|m| !m.trim().is_empty());
        self
    }

    fn request_url(&self, query: &str, mode: SearchMode) -> String {
        let mut url = match mode {
            SearchMode::Doi => format!("{}/works/doi:{}", self.base_url, query),
            SearchMode::Title => format!(
                "{}/works?search={}&per-page=1",
                self.base_url,
                urlencoding::encode(query)
            ),
        };
        if let Some(mailto) = &self.mailto {
            url.push(if mode == SearchMode::Doi { '?' } else { '&' });
            url.push_str("mailto=");
            url.push_str(&urlencoding::encode(mailto));
        }
        url
    }
}

impl std::fmt::Debug for OpenAlexClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAlexClient")
            .field("base_url", &self.base_url)
            .field("mailto", &self.mailto)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SourceClient for OpenAlexClient {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Fallback
    }

    #[tracing::instrument(skip(self), fields(source = SOURCE_NAME))]
    async fn lookup(&self, query: &str, mode: SearchMode) -> Result<SourceHit, SourceError> {
        let url = self.request_url(query, mode);
        debug!(api_url = %url, "Calling OpenAlex API");

        let response = self.client.get(&url).send().await.map_err(|e| {
            warn!(error = %e, "OpenAlex request failed");
            SourceError::from_transport(SOURCE_NAME, &e)
        })?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let retry_after = retry_after_header(&response);
            return Err(classify_status(SOURCE_NAME, status, retry_after.as_deref()));
        }

        let malformed = |e: reqwest::Error| {
            warn!(error = %e, "failed to parse OpenAlex response");
            SourceError::Transient {
                source_name: SOURCE_NAME.to_string(),
                reason: format!("malformed response body: {e}"),
                status: Some(status),
            }
        };

        match mode {
            SearchMode::Doi => {
                let work: OpenAlexWork = response.json().await.map_err(malformed)?;
                Ok(SourceHit {
                    title: work.best_title(),
                    resolved_id: None,
                    doi: work.bare_doi(),
                    http_status: status,
                })
            }
            SearchMode::Title => {
                let search: OpenAlexSearch = response.json().await.map_err(malformed)?;
                let Some(work) = search.results.into_iter().next() else {
                    return Err(SourceError::not_found(SOURCE_NAME));
                };
                Ok(SourceHit {
                    title: work.best_title(),
                    resolved_id: None,
                    doi: work.bare_doi(),
                    http_status: status,
                })
            }
        }
    }
}
