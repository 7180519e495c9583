//! Gated feed-forward block (SwiGLU) for the decoder layers.
//!
//! The block expands `(batch, seq, hidden)` to the intermediate width through
//! a gate and an up projection, combines them as `silu(gate) * up`, and
//! contracts back to the hidden size.

use candle_core::{DType, Device, Result, Tensor};

use crate::{dtypes::PrecisionPolicy, linear::Linear};

/// Dimensions of the feed-forward network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedForwardConfig {
    pub hidden_size: usize,
    pub intermediate_size: usize,
}

/// Gated SwiGLU feed-forward: `w2(silu(w1 x) * w3 x)`.
#[derive(Debug, Clone)]
pub struct FeedForward {
    config: FeedForwardConfig,
    w1: Linear,
    w2: Linear,
    w3: Linear,
}

impl FeedForward {
    /// Assembles the block from pre-validated projections: `w1`/`w3` expand
    /// to the intermediate width, `w2` contracts back.
    pub fn new(config: FeedForwardConfig, w1: Linear, w2: Linear, w3: Linear) -> Result<Self> {
        for (label, proj, in_dim, out_dim) in [
            ("w1", &w1, config.hidden_size, config.intermediate_size),
            ("w2", &w2, config.intermediate_size, config.hidden_size),
            ("w3", &w3, config.hidden_size, config.intermediate_size),
        ] {
            if proj.input_dim() != in_dim || proj.output_dim() != out_dim {
                candle_core::bail!(
                    "feed-forward {label} expects [{out_dim}, {in_dim}], got [{}, {}]",
                    proj.output_dim(),
                    proj.input_dim()
                );
            }
        }
        Ok(Self { config, w1, w2, w3 })
    }

    /// Random init used by tests.
    pub fn random(config: FeedForwardConfig, dtype: DType, device: &Device) -> Result<Self> {
        let w1 = Linear::random(config.hidden_size, config.intermediate_size, dtype, device)?;
        let w2 = Linear::random(config.intermediate_size, config.hidden_size, dtype, device)?;
        let w3 = Linear::random(config.hidden_size, config.intermediate_size, dtype, device)?;
        Self::new(config, w1, w2, w3)
    }

    pub fn config(&self) -> &FeedForwardConfig {
        &self.config
    }

    pub fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        let gate = self.w1.forward(hidden, policy)?;
        let up = self.w3.forward(hidden, policy)?;
        let activated = policy.cast_to_compute(&gate)?.silu()?;
        let gated = activated.mul(&policy.cast_to_compute(&up)?)?;
        self.w2.forward(&policy.cast_to_storage(&gated)?, policy)
    }
}
