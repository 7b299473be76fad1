//! Shared helpers for integration tests.

pub mod mock_source;

#[allow(dead_code)]
#[path = "../../src/test_support/socket_guard.rs"]
pub mod socket_guard;
