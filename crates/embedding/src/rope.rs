//! Precomputed rotary-embedding coefficients and their application.
//!
//! The table holds `f32` sine/cosine tensors shaped
//! `[max_positions, head_dim / 2]`, derived deterministically from the head
//! dimension and a maximum position count. Coefficients are indexed by
//! absolute position, never by cache-relative position, so a token rotated
//! during prefill and the same token rotated during a later decode step see
//! identical coefficients.

use candle_core::{bail, DType, Device, Result, Tensor};

/// Geometry of the rotary embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct RopeConfig {
    /// Per-head dimensionality of the rotated representations; must be even.
    pub head_dim: usize,
    /// Base angle parameter θ controlling the frequency spectrum.
    pub theta: f32,
    /// Number of absolute positions the table covers.
    pub max_positions: usize,
}

impl RopeConfig {
    pub fn new(head_dim: usize, max_positions: usize) -> Self {
        Self {
            head_dim,
            theta: 10_000.0,
            max_positions,
        }
    }
}

/// Precomputed complex-rotation coefficients, one row per absolute position.
#[derive(Debug, Clone)]
pub struct RotaryTable {
    config: RopeConfig,
    sin: Tensor,
    cos: Tensor,
}

impl RotaryTable {
    /// Build the sine/cosine tables once; the environment owns the result.
    pub fn new(config: RopeConfig, device: &Device) -> Result<Self> {
        if config.head_dim < 2 || config.head_dim % 2 != 0 {
            bail!(
                "rotary table requires an even head_dim >= 2, got {}",
                config.head_dim
            );
        }
        if config.max_positions == 0 {
            bail!("rotary table requires max_positions > 0");
        }

        let half_dim = config.head_dim / 2;
        let base = config.theta as f64;
        let mut inv_freqs = Vec::with_capacity(half_dim);
        for idx in 0..half_dim {
            let exponent = (2 * idx) as f64 / config.head_dim as f64;
            inv_freqs.push(base.powf(-exponent));
        }

        let mut sin_data = Vec::with_capacity(config.max_positions * half_dim);
        let mut cos_data = Vec::with_capacity(config.max_positions * half_dim);
        for pos in 0..config.max_positions {
            let pos_f = pos as f64;
            for &inv_freq in &inv_freqs {
                let angle = pos_f * inv_freq;
                sin_data.push(angle.sin() as f32);
                cos_data.push(angle.cos() as f32);
            }
        }

        let sin = Tensor::from_vec(sin_data, (config.max_positions, half_dim), device)?;
        let cos = Tensor::from_vec(cos_data, (config.max_positions, half_dim), device)?;
        log::info!(
            "rotary table built: positions={} half_dim={half_dim} theta={}",
            config.max_positions,
            config.theta
        );
        Ok(Self { config, sin, cos })
    }

    pub fn config(&self) -> &RopeConfig {
        &self.config
    }

    pub fn max_positions(&self) -> usize {
        self.config.max_positions
    }

    /// Coefficients for a contiguous span of positions (prefill), shaped
    /// `[1, len, half_dim]` for broadcast across the batch.
    pub fn slice(&self, start: usize, len: usize) -> Result<(Tensor, Tensor)> {
        if len == 0 {
            bail!("rotary slice requires a non-zero length");
        }
        if start + len > self.config.max_positions {
            bail!(
                "rotary slice [{start}, {}) exceeds table of {} positions",
                start + len,
                self.config.max_positions
            );
        }
        let half = self.config.head_dim / 2;
        let sin = self.sin.narrow(0, start, len)?.reshape((1, len, half))?;
        let cos = self.cos.narrow(0, start, len)?.reshape((1, len, half))?;
        Ok((sin, cos))
    }

    /// Per-row coefficients for batched decode, shaped
    /// `[batch, 1, half_dim]`; each sequence may sit at a different absolute
    /// position.
    pub fn gather(&self, positions: &[usize]) -> Result<(Tensor, Tensor)> {
        if positions.is_empty() {
            bail!("rotary gather requires at least one position");
        }
        for &pos in positions {
            if pos >= self.config.max_positions {
                bail!(
                    "rotary position {pos} out of range for table of {} positions",
                    self.config.max_positions
                );
            }
        }
        let ids: Vec<u32> = positions.iter().map(|&p| p as u32).collect();
        let ids = Tensor::from_vec(ids, positions.len(), self.sin.device())?;
        let half = self.config.head_dim / 2;
        let batch = positions.len();
        let sin = self.sin.index_select(&ids, 0)?.reshape((batch, 1, half))?;
        let cos = self.cos.index_select(&ids, 0)?.reshape((batch, 1, half))?;
        Ok((sin, cos))
    }
}

/// Apply the rotary rotation to query/key tensors shaped
/// `[batch, heads, seq_len, head_dim]`.
///
/// `sin`/`cos` come from [`RotaryTable::slice`] or [`RotaryTable::gather`]
/// and are shaped `[batch | 1, seq_len, head_dim / 2]`; they broadcast over
/// the head axis and, when their batch dim is 1, over the batch axis.
/// Adjacent dimension pairs `(2i, 2i + 1)` are rotated as 2D points; the
/// rotation is computed in `f32` and cast back to the input dtype.
pub fn apply_rotary(
    q: &Tensor,
    k: &Tensor,
    sin: &Tensor,
    cos: &Tensor,
) -> Result<(Tensor, Tensor)> {
    let (batch, heads, seq_len, head_dim) = q.dims4()?;
    if k.dims() != q.dims() {
        bail!(
            "q/k shape mismatch: q={:?} k={:?}",
            q.dims(),
            k.dims()
        );
    }
    if head_dim % 2 != 0 {
        bail!("head_dim {head_dim} must be even for pairwise rotation");
    }
    let half_dim = head_dim / 2;

    let (sb, ss, sd) = sin.dims3()?;
    if cos.dims() != sin.dims() {
        bail!(
            "sin/cos shape mismatch: sin={:?} cos={:?}",
            sin.dims(),
            cos.dims()
        );
    }
    if ss != seq_len || sd != half_dim || (sb != 1 && sb != batch) {
        bail!(
            "rotary coefficients shaped {:?} incompatible with q {:?}",
            sin.dims(),
            q.dims()
        );
    }

    let sin_b = sin
        .reshape((sb, 1, seq_len, half_dim))?
        .broadcast_as((batch, heads, seq_len, half_dim))?;
    let cos_b = cos
        .reshape((sb, 1, seq_len, half_dim))?
        .broadcast_as((batch, heads, seq_len, half_dim))?;

    let apply_one = |tensor: &Tensor| -> Result<Tensor> {
        let dtype = tensor.dtype();
        let pairs = tensor
            .to_dtype(DType::F32)?
            .reshape((batch, heads, seq_len, half_dim, 2))?;
        let chunks = pairs.chunk(2, 4)?;
        let even = chunks[0].squeeze(4)?;
        let odd = chunks[1].squeeze(4)?;

        let rotated_even = even.mul(&cos_b)?.sub(&odd.mul(&sin_b)?)?;
        let rotated_odd = odd.mul(&cos_b)?.add(&even.mul(&sin_b)?)?;

        Tensor::cat(&[&rotated_even.unsqueeze(4)?, &rotated_odd.unsqueeze(4)?], 4)?
            .reshape((batch, heads, seq_len, head_dim))?
            .to_dtype(dtype)
    };

    Ok((apply_one(q)?, apply_one(k)?))
}
