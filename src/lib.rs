//! Scribe Gateway library crate.
//!
//! Re-exports the credential broker, configuration and HTTP surface for the
//! binary and the integration tests in `tests/`.

pub mod api;
pub mod broker;
pub mod config;
pub mod errors;
pub mod jobs;
pub mod proxy;
