//! The engine environment: immutable configuration plus factories.

use candle_core::{DType, Device, Tensor};

use attention::{GenerateCache, KvCache};
use embedding::rope::{RopeConfig, RotaryTable};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::sharding::{AxisSharded, Replicated, ShardSpec, ShardingPolicy};

/// Immutable execution environment, created once at server startup.
///
/// Owns the rotary table and the sharding layout, computes derived shapes,
/// and manufactures zero-initialised cache stores. Everything here is
/// read-only after construction; the sharding policy is fixed at build time
/// (tests inject [`Replicated`] via [`EngineEnv::with_sharding_policy`]).
#[derive(Debug)]
pub struct EngineEnv {
    config: EngineConfig,
    device: Device,
    dtype: DType,
    rotary: RotaryTable,
    sharding: Box<dyn ShardingPolicy>,
}

impl EngineEnv {
    /// Build the environment with the sharding layout implied by the
    /// platform descriptor (`"cpu"` replicated, `"cpu=N"` sharded N ways).
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let policy = policy_from_platform(&config.platform)?;
        Self::with_sharding_policy(config, policy)
    }

    /// Build the environment with an explicitly injected sharding policy.
    ///
    /// This is the test seam: single-device tests pass [`Replicated`] so the
    /// core math runs without any layout constraints.
    pub fn with_sharding_policy(
        config: EngineConfig,
        sharding: Box<dyn ShardingPolicy>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let device = resolve_device(&config.platform)?;
        let dtype = if config.bf16_enable {
            DType::BF16
        } else {
            DType::F32
        };
        // Twice the cache capacity, so absolute positions stay in range for
        // any sequence the cache itself can hold.
        let rope_config = RopeConfig::new(config.head_dim(), config.cache_sequence_length * 2);
        let rotary = RotaryTable::new(rope_config, &device)?;
        log::info!(
            "engine environment ready: dim={} heads={} layers={} cache_len={} batch={} dtype={dtype:?} sharding={}",
            config.dim,
            config.n_heads,
            config.n_layers,
            config.cache_sequence_length,
            config.batch_size,
            sharding.name()
        );
        Ok(Self {
            config,
            device,
            dtype,
            rotary,
            sharding,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Storage dtype implied by the precision flag.
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn head_dim(&self) -> usize {
        self.config.head_dim()
    }

    pub fn rotary(&self) -> &RotaryTable {
        &self.rotary
    }

    /// One empty prefill store per layer, for a single incoming sequence.
    pub fn make_prefill_caches(&self) -> Vec<KvCache> {
        (0..self.config.n_layers).map(|_| KvCache::prefill()).collect()
    }

    /// One zero-initialised batch-wide generate store per layer.
    pub fn make_generate_caches(&self) -> Result<Vec<KvCache>, EngineError> {
        (0..self.config.n_layers)
            .map(|_| {
                let cache = GenerateCache::new(
                    self.config.batch_size,
                    self.config.n_heads,
                    self.config.cache_sequence_length,
                    self.config.head_dim(),
                    self.dtype,
                    &self.device,
                )?;
                Ok(KvCache::Generate(cache))
            })
            .collect()
    }

    /// Partition a tensor according to the configured layout policy.
    pub fn apply_sharding(&self, tensor: &Tensor, spec: ShardSpec) -> Result<Tensor, EngineError> {
        self.sharding.shard(tensor, spec)
    }
}

fn policy_from_platform(platform: &str) -> Result<Box<dyn ShardingPolicy>, EngineError> {
    match shard_count(platform)? {
        1 => Ok(Box::new(Replicated)),
        shards => Ok(Box::new(AxisSharded::new(shards)?)),
    }
}

fn shard_count(platform: &str) -> Result<usize, EngineError> {
    match platform.split_once('=') {
        None => Ok(1),
        Some((_, count)) => count.parse::<usize>().map_err(|_| {
            EngineError::configuration(format!(
                "platform descriptor {platform:?} has a malformed device count"
            ))
        }),
    }
}

fn resolve_device(platform: &str) -> Result<Device, EngineError> {
    let kind = platform.split('=').next().unwrap_or(platform);
    match kind {
        "cpu" => Ok(Device::Cpu),
        other => Err(EngineError::configuration(format!(
            "unsupported platform {other:?}; expected \"cpu\" or \"cpu=N\""
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EngineConfig {
        EngineConfig {
            dim: 8,
            n_heads: 2,
            n_layers: 3,
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
    fn builds_with_derived_shapes() {
        let env = EngineEnv::new(config()).unwrap();
        assert_eq!(env.head_dim(), 4);
        assert_eq!(env.dtype(), DType::F32);
        assert_eq!(env.rotary().max_positions(), 32);
    }

    #[test]
    fn precision_flag_selects_bf16() {
        let mut cfg = config();
        cfg.bf16_enable = true;
        let env = EngineEnv::new(cfg).unwrap();
        assert_eq!(env.dtype(), DType::BF16);
    }

    #[test]
    fn cache_factories_match_configuration() {
        let env = EngineEnv::new(config()).unwrap();

        let prefill = env.make_prefill_caches();
        assert_eq!(prefill.len(), 3);
        assert!(prefill.iter().all(|c| c.as_prefill().is_some()));

        let generate = env.make_generate_caches().unwrap();
        assert_eq!(generate.len(), 3);
        for cache in &generate {
            let store = cache.as_generate().unwrap();
            assert_eq!(store.batch_size(), 2);
            assert_eq!(store.capacity(), 16);
            assert_eq!(store.positions(), &[0, 0]);
            let (keys, _) = store.read();
            assert_eq!(keys.dims(), &[2, 2, 16, 4]);
        }
    }

    #[test]
    fn platform_descriptor_selects_the_layout() {
        let mut cfg = config();
        cfg.platform = "cpu=4".to_string();
        let env = EngineEnv::new(cfg).unwrap();
        let tensor = Tensor::zeros((8, 8), DType::F32, env.device()).unwrap();
        assert!(env.apply_sharding(&tensor, ShardSpec::Axis(0)).is_ok());
        let odd = Tensor::zeros((6, 8), DType::F32, env.device()).unwrap();
        assert!(env.apply_sharding(&odd, ShardSpec::Axis(0)).is_err());
    }

    #[test]
    fn malformed_platforms_fail_fast() {
        let mut cfg = config();
        cfg.platform = "tpu=4".to_string();
        assert!(EngineEnv::new(cfg).is_err());

        let mut cfg = config();
        cfg.platform = "cpu=abc".to_string();
        assert!(EngineEnv::new(cfg).is_err());
    }

    #[test]
    fn invalid_hyperparameters_fail_fast() {
        let mut cfg = config();
        cfg.dim = 9;
        assert!(matches!(
            EngineEnv::new(cfg).unwrap_err(),
            EngineError::Configuration { .. }
        ));
    }
}
