//! Multi-head attention sublayer wired to the cache stores.
//!
//! The sublayer projects hidden states to per-head queries/keys/values,
//! rotates queries and keys by the caller-supplied rotary coefficients,
//! merges keys/values into the cache, and runs the scaled-dot-product kernel
//! over the full post-update cache content. Prefill and decode share this
//! exact code path; only the cache variant and mask differ.

use candle_core::Tensor;

use attention::{attend, KvCache};
use embedding::rope::apply_rotary;
use engine::{EngineEnv, EngineError, ShardSpec};
use layers::{Linear, PrecisionPolicy};

use crate::weights::WeightMap;

/// One attention sublayer: four projections plus the head geometry.
#[derive(Debug)]
pub struct AttentionLayer {
    wq: Linear,
    wk: Linear,
    wv: Linear,
    wo: Linear,
    n_heads: usize,
    head_dim: usize,
    policy: PrecisionPolicy,
}

impl AttentionLayer {
    /// Consumes this layer's projection weights from the map, applying the
    /// environment's sharding layout: column-parallel q/k/v, row-parallel
    /// output.
    pub fn new(
        env: &EngineEnv,
        layer_index: usize,
        weights: &mut WeightMap,
    ) -> Result<Self, EngineError> {
        let dim = env.config().dim;
        let take_proj =
            |weights: &mut WeightMap, name: &str, spec: ShardSpec| -> Result<Linear, EngineError> {
                let full_name = format!("layers.{layer_index}.attention.{name}.weight");
                let weight = weights.take(&full_name, &[dim, dim])?;
                let weight = env.apply_sharding(&weight, spec)?;
                Ok(Linear::new(weight)?)
            };
        Ok(Self {
            wq: take_proj(weights, "wq", ShardSpec::Axis(0))?,
            wk: take_proj(weights, "wk", ShardSpec::Axis(0))?,
            wv: take_proj(weights, "wv", ShardSpec::Axis(0))?,
            wo: take_proj(weights, "wo", ShardSpec::Axis(1))?,
            n_heads: env.config().n_heads,
            head_dim: env.head_dim(),
            policy: PrecisionPolicy::from_parameter_dtype(env.dtype()),
        })
    }

    /// Attends `hidden` over the cache after merging this call's keys/values.
    ///
    /// `sin`/`cos` carry the absolute-position rotary coefficients for the
    /// tokens in `hidden`; `mask` is the additive bias shaped for the
    /// post-update cache length.
    pub fn forward(
        &self,
        hidden: &Tensor,
        sin: &Tensor,
        cos: &Tensor,
        mask: &Tensor,
        cache: &mut KvCache,
    ) -> Result<Tensor, EngineError> {
        let (batch, seq_len, _) = hidden.dims3()?;

        let split_heads = |t: &Tensor| -> Result<Tensor, candle_core::Error> {
            t.reshape((batch, seq_len, self.n_heads, self.head_dim))?
                .transpose(1, 2)?
                .contiguous()
        };
        let q = split_heads(&self.wq.forward(hidden, &self.policy)?)?;
        let k = split_heads(&self.wk.forward(hidden, &self.policy)?)?;
        let v = split_heads(&self.wv.forward(hidden, &self.policy)?)?;

        let (q, k) = apply_rotary(&q, &k, sin, cos)?;
        let (keys, values) = cache.update(&k, &v)?;
        let context = attend(&q, &keys, &values, Some(mask))?;

        let merged = context
            .transpose(1, 2)?
            .contiguous()?
            .reshape((batch, seq_len, self.n_heads * self.head_dim))?;
        self.wo.forward(&merged, &self.policy).map_err(Into::into)
    }
}
