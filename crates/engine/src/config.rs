//! Validated hyperparameter surface for the inference engine.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Numeric hyperparameters, capacity bounds, and the device descriptor.
///
/// Validated once at environment construction; invalid combinations fail
/// fast and prevent server start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Model embedding dimensionality.
    pub dim: usize,
    /// Number of attention heads; must divide `dim`.
    pub n_heads: usize,
    /// Number of transformer blocks.
    pub n_layers: usize,
    /// Vocabulary size of the token embedding and output head.
    pub vocab_size: usize,
    /// Width of the gated feed-forward activation space.
    pub intermediate_size: usize,
    /// Fixed capacity of every generate cache; bounds total sequence length.
    pub cache_sequence_length: usize,
    /// Longest prompt accepted by a single prefill pass.
    pub max_input_sequence_length: usize,
    /// Number of sequences decoded concurrently per batch.
    pub batch_size: usize,
    /// Reduced-precision arithmetic flag (bf16 storage when set).
    pub bf16_enable: bool,
    /// Device/platform descriptor, e.g. `"cpu"` or `"cpu=4"` for a sharded
    /// layout over four devices.
    pub platform: String,
}

impl EngineConfig {
    /// Derived per-head dimensionality.
    pub fn head_dim(&self) -> usize {
        self.dim / self.n_heads
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.dim == 0 {
            return Err(EngineError::configuration("dim must be greater than zero"));
        }
        if self.n_heads == 0 {
            return Err(EngineError::configuration(
                "n_heads must be greater than zero",
            ));
        }
        if self.dim % self.n_heads != 0 {
            return Err(EngineError::configuration(format!(
                "dim ({}) must be divisible by n_heads ({})",
                self.dim, self.n_heads
            )));
        }
        if self.head_dim() % 2 != 0 {
            return Err(EngineError::configuration(format!(
                "head_dim ({}) must be even for rotary embeddings",
                self.head_dim()
            )));
        }
        if self.n_layers == 0 {
            return Err(EngineError::configuration(
                "n_layers must be greater than zero",
            ));
        }
        if self.vocab_size == 0 {
            return Err(EngineError::configuration(
                "vocab_size must be greater than zero",
            ));
        }
        if self.intermediate_size == 0 {
            return Err(EngineError::configuration(
                "intermediate_size must be greater than zero",
            ));
        }
        if self.cache_sequence_length == 0 {
            return Err(EngineError::configuration(
                "cache_sequence_length must be greater than zero",
            ));
        }
        if self.max_input_sequence_length == 0 {
            return Err(EngineError::configuration(
                "max_input_sequence_length must be greater than zero",
            ));
        }
        if self.max_input_sequence_length > self.cache_sequence_length {
            return Err(EngineError::configuration(format!(
                "max_input_sequence_length ({}) cannot exceed cache_sequence_length ({})",
                self.max_input_sequence_length, self.cache_sequence_length
            )));
        }
        if self.batch_size == 0 {
            return Err(EngineError::configuration(
                "batch_size must be greater than zero",
            ));
        }
        if self.platform.is_empty() {
            return Err(EngineError::configuration(
                "platform descriptor must be non-empty",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> EngineConfig {
        EngineConfig {
            dim: 8,
            n_heads: 2,
            n_layers: 2,
            vocab_size: 32,
            intermediate_size: 16,
            cache_sequence_length: 16,
            max_input_sequence_length: 8,
            batch_size: 2,
            bf16_enable: false,
            platform: "cpu".to_string(),
        }
    }

    #[test]
    fn valid_config_passes() {
        base().validate().unwrap();
    }

    #[test]
    fn heads_must_divide_dim() {
        let mut config = base();
        config.n_heads = 3;
        assert!(matches!(
            config.validate().unwrap_err(),
            EngineError::Configuration { .. }
        ));
    }

    #[test]
    fn input_length_bounded_by_cache() {
        let mut config = base();
        config.max_input_sequence_length = 32;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_batch_is_rejected() {
        let mut config = base();
        config.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn deserializes_from_json() {
        let json = r#"{
            "dim": 8,
            "n_heads": 2,
            "n_layers": 2,
            "vocab_size": 32,
            "intermediate_size": 16,
            "cache_sequence_length": 16,
            "max_input_sequence_length": 8,
            "batch_size": 2,
            "bf16_enable": true,
            "platform": "cpu=4"
        }"#;
        let config: EngineConfig = serde_json::from_str(json).unwrap();
        config.validate().unwrap();
        assert!(config.bf16_enable);
        assert_eq!(config.head_dim(), 4);
    }
}
