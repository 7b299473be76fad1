//! Shared helpers for unit tests inside the library.

pub mod socket_guard;
