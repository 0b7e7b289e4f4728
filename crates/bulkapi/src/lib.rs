//! Public facade crate for `bulkapi`.
//!
//! This crate intentionally contains no IO or site-specific logic.
//! It re-exports the backend-agnostic types/traits from `bulkapi-core`.

pub use bulkapi_core::*;
