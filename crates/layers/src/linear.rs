//! Bias-free dense projections.
//!
//! Inputs are shaped `(batch, seq, in_dim)` and outputs `(batch, seq,
//! out_dim)`. Weights are stored `[out_dim, in_dim]` and cast to
//! [`PrecisionPolicy::compute`] for the matmul, with the result restored to
//! the storage dtype. The served model family carries no projection biases.

use candle_core::{DType, Device, Result, Tensor};

use crate::{checks, dtypes::PrecisionPolicy};

/// Dense projection backed by a `[out_dim, in_dim]` weight tensor.
#[derive(Debug, Clone)]
pub struct Linear {
    weight: Tensor,
    input_dim: usize,
    output_dim: usize,
}

impl Linear {
    /// Wraps a pre-existing weight tensor, validating its layout.
    pub fn new(weight: Tensor) -> Result<Self> {
        checks::expect_dtype_in(
            "linear.weight",
            &weight,
            &[DType::F16, DType::BF16, DType::F32],
        )?;
        checks::expect_contiguous("linear.weight", &weight)?;
        let (output_dim, input_dim) = weight.dims2()?;
        Ok(Self {
            weight,
            input_dim,
            output_dim,
        })
    }

    /// Xavier-uniform random weights; the bootstrap path used by tests.
    pub fn random(
        input_dim: usize,
        output_dim: usize,
        dtype: DType,
        device: &Device,
    ) -> Result<Self> {
        let bound = (6.0f64 / (input_dim + output_dim) as f64).sqrt() as f32;
        let weight = Tensor::rand(-bound, bound, (output_dim, input_dim), device)?;
        Self::new(weight.to_dtype(dtype)?)
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn output_dim(&self) -> usize {
        self.output_dim
    }

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    /// Applies the projection, promoting to the compute dtype when needed.
    pub fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        checks::expect_batch_seq_hidden("linear.input", hidden, self.input_dim)?;
        let x = policy.cast_to_compute(hidden)?;
        let weight = policy.cast_to_compute(&self.weight)?;
        let projected = x.broadcast_matmul(&weight.t()?)?;
        policy.cast_to_storage(&projected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn projects_batch_seq_hidden() -> Result<()> {
        let device = Device::Cpu;
        let linear = Linear::random(4, 6, DType::F32, &device)?;
        let policy = PrecisionPolicy::from_parameter_dtype(DType::F32);
        let x = Tensor::rand(0.0f32, 1.0, (2, 3, 4), &device)?;
        let y = linear.forward(&x, &policy)?;
        assert_eq!(y.dims(), &[2, 3, 6]);
        Ok(())
    }

    #[test]
    fn rejects_mismatched_input_width() {
        let device = Device::Cpu;
        let linear = Linear::random(4, 6, DType::F32, &device).unwrap();
        let policy = PrecisionPolicy::from_parameter_dtype(DType::F32);
        let x = Tensor::zeros((1, 2, 5), DType::F32, &device).unwrap();
        assert!(linear.forward(&x, &policy).is_err());
    }

    #[test]
    fn half_precision_round_trips_through_f32() -> Result<()> {
        let device = Device::Cpu;
        let linear = Linear::random(4, 4, DType::BF16, &device)?;
        let policy = PrecisionPolicy::from_parameter_dtype(DType::BF16);
        let x = Tensor::rand(0.0f32, 1.0, (1, 2, 4), &device)?.to_dtype(DType::BF16)?;
        let y = linear.forward(&x, &policy)?;
        assert_eq!(y.dtype(), DType::BF16);
        Ok(())
    }
}
