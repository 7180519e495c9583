//! Scaled-dot-product attention kernel.
//!
//! The kernel consumes the full cached keys/values returned by a store's
//! `update` call. It prioritises numerical fidelity: the matmul/softmax chain
//! always runs in `f32` and the output is cast back to the input dtype, so a
//! cached decode step reproduces the non-cached computation within
//! floating-point tolerance.

use candle_core::{DType, Tensor};
use candle_nn::ops::softmax_last_dim;

use crate::core::AttentionError;
use crate::masks::MASK_DTYPE;

/// Compute attention over `[batch, heads, seq_len, head_dim]` tensors with an
/// optional additive mask.
///
/// `q` carries the current step's queries while `k`/`v` span the full cache;
/// `k_len >= q_len` whenever a cached prefix exists. The mask must be shaped
/// `[batch | 1, heads | 1, q_len, k_len]` with dtype [`MASK_DTYPE`] and is
/// added to the scores before the softmax.
pub fn attend(
    q: &Tensor,
    k: &Tensor,
    v: &Tensor,
    mask: Option<&Tensor>,
) -> Result<Tensor, AttentionError> {
    let device = q.device();
    if !device.same_device(k.device()) || !device.same_device(v.device()) {
        return Err(AttentionError::ShapeMismatch {
            context: "q, k, v must reside on the same device".to_string(),
        });
    }

    let dtype = q.dtype();
    if dtype != k.dtype() || dtype != v.dtype() {
        return Err(AttentionError::ShapeMismatch {
            context: "q, k, v must share the same dtype".to_string(),
        });
    }
    if !matches!(dtype, DType::F32 | DType::F16 | DType::BF16) {
        return Err(AttentionError::UnsupportedDType {
            requested: format!("{dtype:?}"),
        });
    }
    if !q.is_contiguous() || !k.is_contiguous() || !v.is_contiguous() {
        return Err(AttentionError::ShapeMismatch {
            context: "q, k, v must be contiguous in memory".to_string(),
        });
    }

    let (batch, heads, q_len, head_dim) = q.dims4().map_err(|_| AttentionError::ShapeMismatch {
        context: format!(
            "q must have shape [batch, heads, seq_len, head_dim], got {:?}",
            q.dims()
        ),
    })?;
    let (kb, kh, k_len, kd) = k.dims4().map_err(|_| AttentionError::ShapeMismatch {
        context: format!(
            "k must have shape [batch, heads, seq_len, head_dim], got {:?}",
            k.dims()
        ),
    })?;
    if kb != batch || kh != heads || kd != head_dim {
        return Err(AttentionError::ShapeMismatch {
            context: format!(
                "k shape mismatch: expected [{batch}, {heads}, ?, {head_dim}] got {:?}",
                k.dims()
            ),
        });
    }
    if v.dims() != k.dims() {
        return Err(AttentionError::ShapeMismatch {
            context: format!(
                "v shape {:?} must match k shape {:?}",
                v.dims(),
                k.dims()
            ),
        });
    }

    let q_work = q.to_dtype(DType::F32)?;
    let k_work = k.to_dtype(DType::F32)?;
    let v_work = v.to_dtype(DType::F32)?;

    let merged = batch * heads;
    let q_view = q_work.reshape((merged, q_len, head_dim))?;
    let k_view = k_work.reshape((merged, k_len, head_dim))?;
    let scale = 1.0 / (head_dim as f64).sqrt();
    let scores = q_view.matmul(&k_view.transpose(1, 2)?)?.affine(scale, 0.0)?;
    let mut scores = scores.reshape((batch, heads, q_len, k_len))?;

    if let Some(mask) = mask {
        if !device.same_device(mask.device()) {
            return Err(AttentionError::ShapeMismatch {
                context: "mask must reside on the same device as q".to_string(),
            });
        }
        if mask.dtype() != MASK_DTYPE {
            return Err(AttentionError::UnsupportedDType {
                requested: format!("mask expects dtype {MASK_DTYPE:?}, got {:?}", mask.dtype()),
            });
        }
        let (mb, mh, mq, mk) = mask.dims4().map_err(|_| AttentionError::ShapeMismatch {
            context: format!(
                "mask must have shape [batch|1, heads|1, q_len, k_len], got {:?}",
                mask.dims()
            ),
        })?;
        if (mb != 1 && mb != batch) || (mh != 1 && mh != heads) || mq != q_len || mk != k_len {
            return Err(AttentionError::ShapeMismatch {
                context: format!(
                    "mask shape mismatch: expected [{batch}|1, {heads}|1, {q_len}, {k_len}] got [{mb}, {mh}, {mq}, {mk}]"
                ),
            });
        }
        scores = scores.broadcast_add(mask)?;
    }

    let probs = softmax_last_dim(&scores.reshape((merged, q_len, k_len))?)?;
    let output = probs.matmul(&v_work.reshape((merged, k_len, head_dim))?)?;
    let output = output.reshape((batch, heads, q_len, head_dim))?;
    Ok(output.to_dtype(dtype)?)
}
