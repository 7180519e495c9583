//! Rotary positional embeddings for the inference core.

pub mod rope;

pub use rope::{apply_rotary, RopeConfig, RotaryTable};
