//! Windowed mask for single-token decode steps over a full-capacity cache.

use candle_core::{bail, Device, Result, Tensor};

/// Build the decode mask for one new token per batch row against a cache of
/// `cache_len` total slots.
///
/// `positions[b]` is the absolute position of row `b`'s new token. The result
/// is shaped `[batch, 1, 1, cache_len]`: zero for cache index
/// `x <= positions[b]` and negative infinity beyond, hiding every slot that
/// has not been written yet. This exactly reproduces the causal constraint of
/// a non-cached implementation recomputing full self-attention.
pub fn build_decode_mask(device: &Device, positions: &[usize], cache_len: usize) -> Result<Tensor> {
    if positions.is_empty() {
        bail!("decode mask requires at least one sequence position");
    }
    if cache_len == 0 {
        bail!("decode mask requires a non-zero cache length");
    }
    let batch = positions.len();
    let mut data = vec![0f32; batch * cache_len];
    for (b, &pos) in positions.iter().enumerate() {
        if pos >= cache_len {
            bail!("decode position {pos} out of range for cache length {cache_len}");
        }
        let row_start = b * cache_len;
        for x in (pos + 1)..cache_len {
            data[row_start + x] = f32::NEG_INFINITY;
        }
    }
    Tensor::from_vec(data, (batch, 1, 1, cache_len), device)
}
