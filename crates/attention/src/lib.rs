//! KV-cache management and attention primitives for the inference core.
//!
//! The crate owns the two cache variants used across autoregressive
//! generation: a [`PrefillCache`] written once by the full-prompt forward
//! pass, and a [`GenerateCache`] shared by a batch of concurrently decoded
//! sequences with an explicit per-row write position. The scaled-dot-product
//! kernel in [`kernel`] consumes the full cached keys/values together with an
//! additive mask; the mask builders in [`masks`] hide unwritten cache slots so
//! that no slicing of the capacity dimension is ever required.
//!
//! All tensors follow the `[batch, heads, seq_len, head_dim]` layout.
//! Reductions inside the kernel accumulate in `f32` regardless of the storage
//! dtype (bf16, f16, or f32), and outputs mirror the input dtype.

pub mod core;
pub mod kernel;
pub mod kv_cache;
pub mod masks;

pub use core::AttentionError;
pub use kernel::attend;
pub use kv_cache::{GenerateCache, KvCache, PrefillCache};
