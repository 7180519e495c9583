//! Inference building blocks for transformer stacks.
//!
//! Hidden states follow the `(batch, seq, hidden)` convention. Matmuls and
//! reductions promote to [`PrecisionPolicy::compute`] when parameters are
//! stored in half precision, and outputs are cast back to the storage dtype.

pub mod checks;
pub mod dtypes;
pub mod linear;
pub mod mlp;
pub mod norm;

pub use dtypes::PrecisionPolicy;
pub use linear::Linear;
pub use mlp::{FeedForward, FeedForwardConfig};
pub use norm::RmsNorm;
