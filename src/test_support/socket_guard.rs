//! Mock-server startup that tolerates sandboxes without loopback sockets.
//!
//! Shared by the library's unit tests and, through a `#[path]` include, by
//! the integration tests under `tests/`.

use std::net::TcpListener;

use wiremock::MockServer;

/// Set to `1`, `true` or `yes` to turn a skipped socket test into a failure.
const REQUIRE_SOCKET_TESTS_ENV: &str = "SCOPUS_RESOLVER_REQUIRE_SOCKET_TESTS";

fn socket_tests_required() -> bool {
    std::env::var(REQUIRE_SOCKET_TESTS_ENV).is_ok_and(|value| {
        matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes"
        )
    })
}

fn loopback_available() -> bool {
    TcpListener::bind("127.0.0.1:0").is_ok()
}

/// Starts a wiremock server, or returns `None` when loopback binding is
/// denied and skipping is allowed.
///
/// # Panics
///
/// Panics when binding is denied while `SCOPUS_RESOLVER_REQUIRE_SOCKET_TESTS`
/// is set.
pub async fn start_mock_server_or_skip() -> Option<MockServer> {
    if loopback_available() {
        return Some(MockServer::start().await);
    }

    assert!(
        !socket_tests_required(),
        "loopback bind denied and {REQUIRE_SOCKET_TESTS_ENV} forbids skipping"
    );
    eprintln!("loopback bind denied; skipping mock-server test");
    None
}
