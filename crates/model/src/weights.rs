//! Name-to-tensor parameter map supplied by the external weight loader.
//!
//! The loader (checkpoint conversion, safetensors, etc.) is an external
//! collaborator; this module only defines the expected names and shapes and
//! makes any mismatch a fatal configuration error surfaced before serving
//! begins.
//!
//! Expected parameter names for an `n_layers` stack:
//! `tok_embeddings.weight`, `norm.weight`, `output.weight`, and per layer
//! `layers.{i}.attention.w{q,k,v,o}.weight`,
//! `layers.{i}.feed_forward.w{1,2,3}.weight`,
//! `layers.{i}.attention_norm.weight`, `layers.{i}.ffn_norm.weight`.

use std::collections::HashMap;

use candle_core::{DType, Tensor};
use engine::{EngineEnv, EngineError};

/// Mutable view over the loader-supplied parameters; every tensor is taken
/// exactly once during model assembly.
#[derive(Debug, Default)]
pub struct WeightMap {
    tensors: HashMap<String, Tensor>,
}

impl WeightMap {
    pub fn new(tensors: HashMap<String, Tensor>) -> Self {
        Self { tensors }
    }

    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor) {
        self.tensors.insert(name.into(), tensor);
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Remove and return the named tensor, verifying its shape.
    pub fn take(&mut self, name: &str, expected: &[usize]) -> Result<Tensor, EngineError> {
        let tensor = self.tensors.remove(name).ok_or_else(|| {
            EngineError::configuration(format!("missing model parameter {name:?}"))
        })?;
        if tensor.dims() != expected {
            return Err(EngineError::configuration(format!(
                "parameter {name:?} has shape {:?}, expected {expected:?}",
                tensor.dims()
            )));
        }
        Ok(tensor)
    }

    /// Fails if any supplied parameter was never consumed; a name mismatch
    /// between checkpoint and model is fatal either way round.
    pub fn finish(self) -> Result<(), EngineError> {
        if self.tensors.is_empty() {
            return Ok(());
        }
        let mut leftover: Vec<&String> = self.tensors.keys().collect();
        leftover.sort();
        Err(EngineError::configuration(format!(
            "unexpected model parameters: {leftover:?}"
        )))
    }
}

/// Random parameter set with the full expected name/shape layout.
///
/// Serving always loads real checkpoints; this is the bootstrap path for
/// tests and numerical experiments.
pub fn random_weights(env: &EngineEnv) -> Result<WeightMap, EngineError> {
    let config = env.config();
    let device = env.device();
    let dtype = env.dtype();
    let dim = config.dim;

    let mut map = WeightMap::default();
    let add = |map: &mut WeightMap, name: String, dims: &[usize]| -> Result<(), EngineError> {
        let tensor = Tensor::rand(-0.1f32, 0.1, dims, device)?.to_dtype(dtype)?;
        map.insert(name, tensor);
        Ok(())
    };

    add(&mut map, "tok_embeddings.weight".into(), &[config.vocab_size, dim])?;
    for layer in 0..config.n_layers {
        for proj in ["wq", "wk", "wv", "wo"] {
            add(
                &mut map,
                format!("layers.{layer}.attention.{proj}.weight"),
                &[dim, dim],
            )?;
        }
        add(
            &mut map,
            format!("layers.{layer}.feed_forward.w1.weight"),
            &[config.intermediate_size, dim],
        )?;
        add(
            &mut map,
            format!("layers.{layer}.feed_forward.w2.weight"),
            &[dim, config.intermediate_size],
        )?;
        add(
            &mut map,
            format!("layers.{layer}.feed_forward.w3.weight"),
            &[config.intermediate_size, dim],
        )?;
        let ones = Tensor::ones(dim, DType::F32, device)?.to_dtype(dtype)?;
        map.insert(format!("layers.{layer}.attention_norm.weight"), ones.clone());
        map.insert(format!("layers.{layer}.ffn_norm.weight"), ones);
    }
    let ones = Tensor::ones(dim, DType::F32, device)?.to_dtype(dtype)?;
    map.insert("norm.weight", ones);
    add(&mut map, "output.weight".into(), &[config.vocab_size, dim])?;
    Ok(map)
}
