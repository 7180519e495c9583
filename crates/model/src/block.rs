//! Pre-norm decoder block: attention and gated feed-forward with residuals.

use candle_core::Tensor;

use attention::KvCache;
use engine::{EngineEnv, EngineError, ShardSpec};
use layers::{FeedForward, FeedForwardConfig, Linear, PrecisionPolicy, RmsNorm};

use crate::self_attention::AttentionLayer;
use crate::weights::WeightMap;

pub(crate) const RMS_NORM_EPS: f64 = 1e-5;

/// One decoder layer: `h = x + attn(norm(x)); out = h + ffn(norm(h))`.
#[derive(Debug)]
pub struct TransformerBlock {
    attention: AttentionLayer,
    feed_forward: FeedForward,
    attention_norm: RmsNorm,
    ffn_norm: RmsNorm,
}

impl TransformerBlock {
    pub fn new(
        env: &EngineEnv,
        layer_index: usize,
        weights: &mut WeightMap,
    ) -> Result<Self, EngineError> {
        let config = env.config();
        let dim = config.dim;
        let intermediate = config.intermediate_size;

        let attention = AttentionLayer::new(env, layer_index, weights)?;

        let take_ffn = |weights: &mut WeightMap,
                        name: &str,
                        shape: &[usize],
                        spec: ShardSpec|
         -> Result<Linear, EngineError> {
            let full_name = format!("layers.{layer_index}.feed_forward.{name}.weight");
            let weight = weights.take(&full_name, shape)?;
            let weight = env.apply_sharding(&weight, spec)?;
            Ok(Linear::new(weight)?)
        };
        let w1 = take_ffn(weights, "w1", &[intermediate, dim], ShardSpec::Axis(0))?;
        let w2 = take_ffn(weights, "w2", &[dim, intermediate], ShardSpec::Axis(1))?;
        let w3 = take_ffn(weights, "w3", &[intermediate, dim], ShardSpec::Axis(0))?;
        let feed_forward = FeedForward::new(
            FeedForwardConfig {
                hidden_size: dim,
                intermediate_size: intermediate,
            },
            w1,
            w2,
            w3,
        )?;

        let attention_norm = RmsNorm::new(
            weights.take(&format!("layers.{layer_index}.attention_norm.weight"), &[dim])?,
            RMS_NORM_EPS,
        )?;
        let ffn_norm = RmsNorm::new(
            weights.take(&format!("layers.{layer_index}.ffn_norm.weight"), &[dim])?,
            RMS_NORM_EPS,
        )?;

        Ok(Self {
            attention,
            feed_forward,
            attention_norm,
            ffn_norm,
        })
    }

    pub fn forward(
        &self,
        hidden: &Tensor,
        sin: &Tensor,
        cos: &Tensor,
        mask: &Tensor,
        cache: &mut KvCache,
        policy: &PrecisionPolicy,
    ) -> Result<Tensor, EngineError> {
        let normed = self.attention_norm.forward(hidden, policy)?;
        let attended = self.attention.forward(&normed, sin, cos, mask, cache)?;
        let h = (hidden + attended)?;

        let normed = self.ffn_norm.forward(&h, policy)?;
        let expanded = self.feed_forward.forward(&normed, policy)?;
        Ok((h + expanded)?)
    }
}
