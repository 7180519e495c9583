//! Decoder-only model stack driving the KV-cache core.
//!
//! The stack composes one attention sublayer and one gated feed-forward per
//! block, threads absolute position information uniformly to all blocks, and
//! holds exactly one cache store per block. Prefill and decode run through
//! the same forward path; the cache variant and mask decide the phase.

pub mod block;
pub mod model;
pub mod self_attention;
pub mod weights;

pub use self_attention::AttentionLayer;
pub use block::TransformerBlock;
pub use model::Transformer;
pub use weights::WeightMap;
