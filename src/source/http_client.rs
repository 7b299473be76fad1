//! Shared HTTP client construction policy for source adapters.
//!
//! Keeps timeout, user-agent, and compression defaults consistent between the
//! primary and fallback clients.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use reqwest::{Client, ClientBuilder};
use thiserror::Error;
use tracing::warn;

use crate::user_agent;

/// Default connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default whole-request timeout in seconds.
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 30;

/// Timeouts applied to source HTTP clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    /// Connection establishment timeout in seconds.
    pub connect_secs: u64,
    /// Whole-request timeout in seconds.
    pub read_secs: u64,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            connect_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            read_secs: DEFAULT_READ_TIMEOUT_SECS,
        }
    }
}

/// HTTP client construction failed.
#[derive(Debug, Error)]
#[error("failed to build HTTP client for {source_name}: {reason}")]
pub struct ClientBuildError {
    /// Source the client was for.
    pub source_name: String,
    /// What went wrong.
    pub reason: String,
}

/// Builds a source HTTP client using shared project policy.
///
/// Some sandboxed environments panic while reading system proxy settings; in
/// that case the builder is retried with system proxy lookup disabled.
///
/// # Errors
///
/// Returns [`ClientBuildError`] when client construction fails.
pub(crate) fn build_source_http_client(
    source_name: &str,
    timeouts: HttpTimeouts,
) -> Result<Client, ClientBuildError> {
    let fail = |reason: String| ClientBuildError {
        source_name: source_name.to_string(),
        reason,
    };

    match try_build(timeouts, false) {
        Ok(Ok(client)) => Ok(client),
        Ok(Err(error)) => Err(fail(error.to_string())),
        Err(()) => {
            warn!(
                source = source_name,
                "HTTP client hit system proxy panic; building without proxy lookup"
            );
            match try_build(timeouts, true) {
                Ok(Ok(client)) => Ok(client),
                Ok(Err(error)) => Err(fail(error.to_string())),
                Err(()) => Err(fail("client construction panicked".to_string())),
            }
        }
    }
}

fn try_build(timeouts: HttpTimeouts, no_proxy: bool) -> Result<reqwest::Result<Client>, ()> {
    catch_unwind(AssertUnwindSafe(move || {
        let mut builder = base_builder(timeouts);
        if no_proxy {
            builder = builder.no_proxy();
        }
        builder.build()
    }))
    .map_err(|_| ())
}

fn base_builder(timeouts: HttpTimeouts) -> ClientBuilder {
    Client::builder()
        .connect_timeout(Duration::from_secs(timeouts.connect_secs))
        .timeout(Duration::from_secs(timeouts.read_secs))
        .user_agent(user_agent::default_source_user_agent())
        .gzip(true)
}
