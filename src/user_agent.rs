//! Shared User-Agent string for source HTTP clients.

/// Project URL for User-Agent identification (good citizenship; RFC 9308).
const PROJECT_UA_URL: &str = "https://github.com/fierce/scopus-resolver";

/// Default User-Agent for lookup requests (single shared format; no per-source name).
#[must_use]
pub(crate) fn default_source_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("scopus-resolver/{version} (research-tool; +{PROJECT_UA_URL})")
}
