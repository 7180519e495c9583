//! Shared types for attention implementations and cache stores.

pub mod errors;

pub use errors::AttentionError;
