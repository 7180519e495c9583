//! Pluggable device-partitioning policies.
//!
//! The attention math is agnostic to how dimensions map to devices; the
//! policy's contract is that shapes and contiguity remain correct after
//! partitioning. The policy is selected at environment construction; tests
//! inject [`Replicated`], production layouts use [`AxisSharded`].

use std::fmt;

use candle_core::Tensor;

use crate::error::EngineError;

/// Which logical axis of a tensor is split across devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardSpec {
    /// Keep the tensor whole on every device.
    Replicated,
    /// Partition the given axis across the shard set.
    Axis(usize),
}

/// Strategy applied to every large tensor (weights and caches) so components
/// operate on logically-sharded tensors transparently.
pub trait ShardingPolicy: fmt::Debug + Send + Sync {
    fn shard(&self, tensor: &Tensor, spec: ShardSpec) -> Result<Tensor, EngineError>;

    fn name(&self) -> &'static str;
}

/// No-op layout for single-device and test contexts.
#[derive(Debug, Default, Clone, Copy)]
pub struct Replicated;

impl ShardingPolicy for Replicated {
    fn shard(&self, tensor: &Tensor, _spec: ShardSpec) -> Result<Tensor, EngineError> {
        Ok(tensor.clone())
    }

    fn name(&self) -> &'static str {
        "replicated"
    }
}

/// Even partitioning of one axis across a fixed shard count.
#[derive(Debug, Clone, Copy)]
pub struct AxisSharded {
    shards: usize,
}

impl AxisSharded {
    pub fn new(shards: usize) -> Result<Self, EngineError> {
        if shards == 0 {
            return Err(EngineError::configuration(
                "shard count must be greater than zero",
            ));
        }
        Ok(Self { shards })
    }

    pub fn shards(&self) -> usize {
        self.shards
    }
}

impl ShardingPolicy for AxisSharded {
    fn shard(&self, tensor: &Tensor, spec: ShardSpec) -> Result<Tensor, EngineError> {
        let axis = match spec {
            ShardSpec::Replicated => return Ok(tensor.clone()),
            ShardSpec::Axis(axis) => axis,
        };
        let dims = tensor.dims();
        if axis >= dims.len() {
            return Err(EngineError::configuration(format!(
                "shard axis {axis} out of range for tensor of rank {}",
                dims.len()
            )));
        }
        if dims[axis] % self.shards != 0 {
            return Err(EngineError::configuration(format!(
                "axis {axis} of size {} does not divide evenly across {} shards",
                dims[axis], self.shards
            )));
        }
        log::debug!(
            "sharding axis {axis} of {:?} across {} devices",
            dims,
            self.shards
        );
        Ok(tensor.contiguous()?)
    }

    fn name(&self) -> &'static str {
        "axis-sharded"
    }
}
