//! Mask builders for the two generation phases.
//!
//! Masks are additive bias tensors with dtype [`MASK_DTYPE`]: `0.0` where
//! attention is allowed and `f32::NEG_INFINITY` where forbidden. They are
//! added to the attention scores before normalisation, never applied
//! multiplicatively. The decode mask over a full-capacity cache is
//! mathematically the row of the prefill triangle at the new token, which is
//! what lets the generate cache expose unwritten slots without slicing.

pub mod decode;
pub mod prefill;

use candle_core::DType;

/// Dtype shared by all additive masks.
pub const MASK_DTYPE: DType = DType::F32;

pub use decode::build_decode_mask;
pub use prefill::build_prefill_mask;
