//! RMS normalisation as used by the served decoder blocks.

use candle_core::{DType, Result, Tensor, D};

use crate::{checks, dtypes::PrecisionPolicy};

/// RMSNorm with a learnable scale, statistics computed in `f32`.
#[derive(Debug, Clone)]
pub struct RmsNorm {
    weight: Tensor,
    epsilon: f64,
    hidden_size: usize,
}

impl RmsNorm {
    pub fn new(weight: Tensor, epsilon: f64) -> Result<Self> {
        checks::expect_dtype_in(
            "rmsnorm.weight",
            &weight,
            &[DType::F16, DType::BF16, DType::F32],
        )?;
        let hidden_size = weight.dims1()?;
        Ok(Self {
            weight,
            epsilon,
            hidden_size,
        })
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    /// Normalises along the last axis, preserving the `(batch, seq, hidden)`
    /// layout and the storage dtype.
    pub fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        checks::expect_batch_seq_hidden("rmsnorm.input", hidden, self.hidden_size)?;
        let x = hidden.to_dtype(DType::F32)?;
        let mean_square = x.sqr()?.mean_keepdim(D::Minus1)?;
        let denom = mean_square.affine(1.0, self.epsilon)?.sqrt()?;
        let normed = x.broadcast_div(&denom)?;
        let scaled = normed.broadcast_mul(&self.weight.to_dtype(DType::F32)?)?;
        policy.cast_to_storage(&scaled)
    }
}
