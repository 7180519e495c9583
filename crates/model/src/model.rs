//! The full decoder stack: embedding, blocks, final norm, output head.

use std::sync::Arc;

use candle_core::{DType, Tensor};

use attention::KvCache;
use engine::{EngineEnv, EngineError, ShardSpec};
use layers::{Linear, PrecisionPolicy, RmsNorm};

use crate::block::{TransformerBlock, RMS_NORM_EPS};
use crate::weights::WeightMap;

/// Decoder-only transformer driven by externally owned cache stores.
///
/// The model itself is stateless across calls: every forward receives the
/// per-layer caches for the sequence (or batch) it is serving, so one model
/// instance serves any number of concurrent slots.
#[derive(Debug)]
pub struct Transformer {
    env: Arc<EngineEnv>,
    tok_embeddings: Tensor,
    blocks: Vec<TransformerBlock>,
    norm: RmsNorm,
    output: Linear,
    policy: PrecisionPolicy,
}

impl Transformer {
    /// Assembles the stack, consuming the weight map completely; leftover or
    /// missing parameters are configuration errors.
    pub fn new(env: Arc<EngineEnv>, mut weights: WeightMap) -> Result<Self, EngineError> {
        let config = env.config();
        let dim = config.dim;

        let tok_embeddings = weights.take("tok_embeddings.weight", &[config.vocab_size, dim])?;
        let blocks = (0..config.n_layers)
            .map(|layer| TransformerBlock::new(&env, layer, &mut weights))
            .collect::<Result<Vec<_>, _>>()?;
        let norm = RmsNorm::new(weights.take("norm.weight", &[dim])?, RMS_NORM_EPS)?;
        let output_weight = weights.take("output.weight", &[config.vocab_size, dim])?;
        let output_weight = env.apply_sharding(&output_weight, ShardSpec::Axis(0))?;
        let output = Linear::new(output_weight)?;
        weights.finish()?;

        log::info!(
            "transformer assembled: layers={} dim={} vocab={}",
            config.n_layers,
            dim,
            config.vocab_size
        );
        let policy = PrecisionPolicy::from_parameter_dtype(env.dtype());
        Ok(Self {
            env,
            tok_embeddings,
            blocks,
            norm,
            output,
            policy,
        })
    }

    pub fn env(&self) -> &EngineEnv {
        &self.env
    }

    /// Runs one forward pass and returns logits shaped
    /// `(batch, seq, vocab_size)`.
    ///
    /// Prefill passes the whole prompt with a single start position; decode
    /// passes one token per batch row with that row's absolute position. The
    /// shape of `positions` selects between the two: a single entry paired
    /// with a multi-token input is a contiguous span, one entry per batch row
    /// with single-token inputs is a decode step. Prefill spans longer than
    /// the configured `max_input_sequence_length` are rejected.
    pub fn forward(
        &self,
        tokens: &Tensor,
        positions: &[usize],
        caches: &mut [KvCache],
        mask: &Tensor,
    ) -> Result<Tensor, EngineError> {
        if caches.len() != self.blocks.len() {
            return Err(EngineError::configuration(format!(
                "expected {} cache stores, got {}",
                self.blocks.len(),
                caches.len()
            )));
        }
        let (batch, seq_len) = tokens.dims2()?;

        let (sin, cos) = if positions.len() == 1 {
            let max_input = self.env.config().max_input_sequence_length;
            if seq_len > max_input {
                return Err(EngineError::configuration(format!(
                    "prefill of {seq_len} tokens exceeds max_input_sequence_length {max_input}"
                )));
            }
            self.env.rotary().slice(positions[0], seq_len)?
        } else if seq_len == 1 && positions.len() == batch {
            self.env.rotary().gather(positions)?
        } else {
            return Err(EngineError::configuration(format!(
                "positions of length {} incompatible with token shape {:?}",
                positions.len(),
                tokens.dims()
            )));
        };

        let mut hidden = self.embed(tokens)?;
        for (block, cache) in self.blocks.iter().zip(caches.iter_mut()) {
            hidden = block.forward(&hidden, &sin, &cos, mask, cache, &self.policy)?;
        }
        let hidden = self.norm.forward(&hidden, &self.policy)?;
        self.output
            .forward(&hidden, &self.policy)
            .map_err(Into::into)
    }

    /// Token-id lookup into the embedding table.
    fn embed(&self, tokens: &Tensor) -> Result<Tensor, EngineError> {
        let (batch, seq_len) = tokens.dims2()?;
        let ids = match tokens.dtype() {
            DType::U32 => tokens.flatten_all()?,
            DType::I64 | DType::U8 => tokens.flatten_all()?.to_dtype(DType::U32)?,
            other => {
                return Err(EngineError::configuration(format!(
                    "token ids must be integral, got {other:?}"
                )))
            }
        };
        let rows = self.tok_embeddings.index_select(&ids, 0)?;
        Ok(rows.reshape((batch, seq_len, self.env.config().dim))?)
    }
}
