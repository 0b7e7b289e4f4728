//! `bulkapi-daemon` crate (library surface).
//!
//! The primary entrypoint for end users is the `bulkapi-daemon` binary (CLI + HTTP serving +
//! background refresh). This library module exists to support embedding and integration
//! testing without depending on internal binary layout.

pub mod config;
pub mod http;

pub use bulkapi_core as core;
pub use config::Config;
