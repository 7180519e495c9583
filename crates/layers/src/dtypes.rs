//! Precision policy shared by the layer implementations.
//!
//! Weights may reside in `bf16`/`f16` for memory efficiency while the
//! compute-heavy paths promote to `f32`, mirroring the attention kernel's
//! reduction behaviour.

use candle_core::{DType, Result, Tensor};

/// Describes how tensors are cast between storage and compute phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrecisionPolicy {
    storage: DType,
    compute: DType,
}

impl PrecisionPolicy {
    /// Builds a policy from the parameter storage dtype: half-precision
    /// storage computes in `f32`, full precision stays put.
    pub fn from_parameter_dtype(storage: DType) -> Self {
        let compute = match storage {
            DType::F16 | DType::BF16 => DType::F32,
            other => other,
        };
        Self { storage, compute }
    }

    /// Dtype used to store parameters and outputs.
    pub fn storage(&self) -> DType {
        self.storage
    }

    /// Dtype used for matmuls and reductions.
    pub fn compute(&self) -> DType {
        self.compute
    }

    pub fn is_mixed_precision(&self) -> bool {
        self.storage != self.compute
    }

    /// Promote a tensor to the compute dtype if needed.
    pub fn cast_to_compute(&self, tensor: &Tensor) -> Result<Tensor> {
        if tensor.dtype() == self.compute {
            Ok(tensor.clone())
        } else {
            tensor.to_dtype(self.compute)
        }
    }

    /// Cast a tensor back to the storage dtype if needed.
    pub fn cast_to_storage(&self, tensor: &Tensor) -> Result<Tensor> {
        if tensor.dtype() == self.storage {
            Ok(tensor.clone())
        } else {
            tensor.to_dtype(self.storage)
        }
    }
}
