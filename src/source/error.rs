//! Classified lookup conditions returned by source clients.
//!
//! Every failed lookup maps to exactly one [`SourceError`] variant so the
//! resolver can decide between aborting, retrying, and falling back without
//! inspecting HTTP details.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

/// Maximum Retry-After value (1 hour) to prevent excessive delays.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// A classified failure from a single source lookup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// Credentials were rejected (HTTP 401/403).
    #[error(
        "{source_name} rejected the request as unauthorized (HTTP {status})\n  Suggestion: check the API key and its entitlements"
    )]
    Unauthorized {
        /// Name of the source.
        source_name: String,
        /// HTTP status returned.
        status: u16,
    },

    /// Server rate limiting (HTTP 429).
    #[error("{source_name} rate limit exceeded (HTTP 429)")]
    RateLimited {
        /// Name of the source.
        source_name: String,
        /// Delay requested by the server, if any.
        retry_after: Option<Duration>,
    },

    /// The service answered but has no match.
    #[error("no match in {source_name}")]
    NotFound {
        /// Name of the source.
        source_name: String,
    },

    /// Network failure, timeout, server error, or unreadable response.
    #[error("{source_name} request failed: {reason}")]
    Transient {
        /// Name of the source.
        source_name: String,
        /// Human-readable failure description.
        reason: String,
        /// HTTP status when the failure came from a response.
        status: Option<u16>,
    },
}

impl SourceError {
    /// Creates a `NotFound` error.
    #[must_use]
    pub fn not_found(source_name: &str) -> Self {
        Self::NotFound {
            source_name: source_name.to_string(),
        }
    }

    /// Creates a `Transient` error without an HTTP status.
    #[must_use]
    pub fn transient(source_name: &str, reason: impl Into<String>) -> Self {
        Self::Transient {
            source_name: source_name.to_string(),
            reason: reason.into(),
            status: None,
        }
    }

    /// Creates a `RateLimited` error.
    #[must_use]
    pub fn rate_limited(source_name: &str, retry_after: Option<Duration>) -> Self {
        Self::RateLimited {
            source_name: source_name.to_string(),
            retry_after,
        }
    }

    /// Creates an `Unauthorized` error.
    #[must_use]
    pub fn unauthorized(source_name: &str, status: u16) -> Self {
        Self::Unauthorized {
            source_name: source_name.to_string(),
            status,
        }
    }

    /// True for conditions worth retrying after a pause.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Transient { .. })
    }

    /// Maps a reqwest transport error (no response received).
    #[must_use]
    pub fn from_transport(source_name: &str, error: &reqwest::Error) -> Self {
        let reason = if error.is_timeout() {
            "request timed out".to_string()
        } else if error.is_connect() {
            format!("cannot connect: {error}")
        } else {
            error.to_string()
        };
        Self::transient(source_name, reason)
    }
}

/// Classifies a non-success HTTP status into a lookup condition.
///
/// | Status | Condition |
/// |--------|-----------|
/// | 401, 403 | Unauthorized |
/// | 404 | NotFound |
/// | 408 | Transient |
/// | 429 | RateLimited (with parsed Retry-After) |
/// | other 4xx | NotFound (query the service cannot answer) |
/// | 5xx and anything else | Transient |
#[allow(clippy::match_same_arms)]
#[must_use]
pub fn classify_status(source_name: &str, status: u16, retry_after: Option<&str>) -> SourceError {
    match status {
        401 | 403 => SourceError::unauthorized(source_name, status),
        404 => SourceError::not_found(source_name),
        408 => SourceError::Transient {
            source_name: source_name.to_string(),
            reason: "request timeout".to_string(),
            status: Some(status),
        },
        429 => SourceError::rate_limited(source_name, retry_after.and_then(parse_retry_after)),
        s if (400..500).contains(&s) => {
            debug!(source = source_name, status = s, "client error treated as no match");
            SourceError::not_found(source_name)
        }
        s => SourceError::Transient {
            source_name: source_name.to_string(),
            reason: format!("{source_name} returned HTTP {s}"),
            status: Some(s),
        },
    }
}

/// Parses a Retry-After header value into a Duration.
///
/// Supports integer seconds and RFC 7231 HTTP-dates. Returns `None` if the
/// value cannot be parsed. Caps excessive values at 1 hour.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use scopus_resolver_core::source::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("invalid"), None);
/// ```
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        }
        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);
        if duration > MAX_RETRY_AFTER {
            warn!(
                seconds,
                max_seconds = MAX_RETRY_AFTER.as_secs(),
                "Retry-After exceeds maximum, capping at 1 hour"
            );
            return Some(MAX_RETRY_AFTER);
        }
        return Some(duration);
    }

    let Ok(datetime) = httpdate::parse_http_date(header_value) else {
        debug!(header_value, "unparseable Retry-After value");
        return None;
    };
    match datetime.duration_since(std::time::SystemTime::now()) {
        Ok(duration) => Some(duration.min(MAX_RETRY_AFTER)),
        // Date already passed
        Err(_) => Some(Duration::ZERO),
    }
}
