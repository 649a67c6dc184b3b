//! Foundational low-level utilities shared across Murmur crates.
//!
//! Provides the wall-clock stamp and process-local identifier minting used
//! by action envelopes, dialog state, and send scheduling.

pub mod ids;

pub use ids::{current_unix_timestamp_ms, mint_id};
