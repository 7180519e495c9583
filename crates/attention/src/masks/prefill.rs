//! Causal mask for a full-prompt prefill pass.

use candle_core::{bail, Device, Result, Tensor};

/// Build the prefill mask for a sequence of `seq_len` new tokens following
/// `start_pos` already-cached positions.
///
/// The result is shaped `[1, 1, seq_len, start_pos + seq_len]` (broadcast
/// over batch and heads): row `i` is zero for key index `j <= start_pos + i`
/// and negative infinity otherwise, so no token attends to a future token.
pub fn build_prefill_mask(device: &Device, seq_len: usize, start_pos: usize) -> Result<Tensor> {
    if seq_len == 0 {
        bail!("prefill mask requires a non-zero sequence length");
    }
    let k_len = start_pos + seq_len;
    let mut data = vec![0f32; seq_len * k_len];
    for i in 0..seq_len {
        let row_start = i * k_len;
        for j in (start_pos + i + 1)..k_len {
            data[row_start + j] = f32::NEG_INFINITY;
        }
    }
    Tensor::from_vec(data, (1, 1, seq_len, k_len), device)
}
