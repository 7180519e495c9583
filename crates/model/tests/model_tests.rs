//! Shape and validation behaviour of the assembled decoder stack.

use std::sync::Arc;

use anyhow::Result;
use candle_core::{DType, Tensor};

use attention::masks::{build_decode_mask, build_prefill_mask};
use engine::{EngineConfig, EngineEnv, Replicated};
use model::weights::random_weights;
use model::Transformer;

fn make_env(batch_size: usize) -> Result<Arc<EngineEnv>> {
    let config = EngineConfig {
        dim: 16,
        n_heads: 4,
        n_layers: 2,
        vocab_size: 32,
        intermediate_size: 32,
        cache_sequence_length: 16,
        max_input_sequence_length: 8,
        batch_size,
        bf16_enable: false,
        platform: "cpu".to_string(),
    };
    let env = EngineEnv::with_sharding_policy(config, Box::new(Replicated))?;
    Ok(Arc::new(env))
}

fn make_model(env: Arc<EngineEnv>) -> Result<Transformer> {
    let weights = random_weights(&env)?;
    Ok(Transformer::new(env, weights)?)
}

#[test]
fn prefill_logits_cover_the_vocabulary() -> Result<()> {
    let env = make_env(1)?;
    let model = make_model(env.clone())?;
    let tokens = Tensor::from_vec(vec![5u32, 0, 17, 3], (1, 4), env.device())?;
    let mask = build_prefill_mask(env.device(), 4, 0)?;
    let mut caches = env.make_prefill_caches();
    let logits = model.forward(&tokens, &[0], &mut caches, &mask)?;
    assert_eq!(logits.dims(), &[1, 4, 32]);
    assert_eq!(logits.dtype(), DType::F32);
    Ok(())
}

#[test]
fn decode_logits_have_one_row_per_sequence() -> Result<()> {
    let env = make_env(2)?;
    let model = make_model(env.clone())?;
    let mut caches = env.make_generate_caches()?;

    let tokens = Tensor::from_vec(vec![4u32, 9], (2, 1), env.device())?;
    let mask = build_decode_mask(env.device(), &[0, 0], env.config().cache_sequence_length)?;
    let logits = model.forward(&tokens, &[0, 0], &mut caches, &mask)?;
    assert_eq!(logits.dims(), &[2, 1, 32]);

    for cache in &caches {
        assert_eq!(cache.as_generate().unwrap().positions(), &[1, 1]);
    }
    Ok(())
}

#[test]
fn cache_count_mismatch_is_rejected() -> Result<()> {
    let env = make_env(1)?;
    let model = make_model(env.clone())?;
    let tokens = Tensor::from_vec(vec![1u32, 2], (1, 2), env.device())?;
    let mask = build_prefill_mask(env.device(), 2, 0)?;
    let mut caches = env.make_prefill_caches();
    caches.truncate(1);
    assert!(model.forward(&tokens, &[0], &mut caches, &mask).is_err());
    Ok(())
}

#[test]
fn overlong_prompts_are_rejected_at_prefill() -> Result<()> {
    let env = make_env(1)?;
    let model = make_model(env.clone())?;
    let len = env.config().max_input_sequence_length + 1;
    let prompt: Vec<u32> = (0..len as u32).collect();
    let tokens = Tensor::from_vec(prompt, (1, len), env.device())?;
    let mask = build_prefill_mask(env.device(), len, 0)?;
    let mut caches = env.make_prefill_caches();
    let err = model.forward(&tokens, &[0], &mut caches, &mask).unwrap_err();
    assert!(err.to_string().contains("max_input_sequence_length"));
    Ok(())
}

#[test]
fn inconsistent_positions_are_rejected() -> Result<()> {
    let env = make_env(1)?;
    let model = make_model(env.clone())?;
    let tokens = Tensor::from_vec(vec![1u32, 2, 3], (1, 3), env.device())?;
    let mask = build_prefill_mask(env.device(), 3, 0)?;
    let mut caches = env.make_prefill_caches();
    assert!(model.forward(&tokens, &[0, 1], &mut caches, &mask).is_err());
    Ok(())
}

#[test]
fn float_tokens_are_rejected() -> Result<()> {
    let env = make_env(1)?;
    let model = make_model(env.clone())?;
    let tokens = Tensor::zeros((1, 2), DType::F32, env.device())?;
    let mask = build_prefill_mask(env.device(), 2, 0)?;
    let mut caches = env.make_prefill_caches();
    assert!(model.forward(&tokens, &[0], &mut caches, &mask).is_err());
    Ok(())
}

#[test]
fn missing_parameter_fails_assembly() -> Result<()> {
    let env = make_env(1)?;
    let mut weights = random_weights(&env)?;
    let _ = weights.take("norm.weight", &[16])?;
    let err = Transformer::new(env, weights).unwrap_err();
    assert!(err.to_string().contains("norm.weight"));
    Ok(())
}

#[test]
fn stray_parameter_fails_assembly() -> Result<()> {
    let env = make_env(1)?;
    let mut weights = random_weights(&env)?;
    weights.insert(
        "stray.weight",
        Tensor::zeros(4, DType::F32, env.device())?,
    );
    let err = Transformer::new(env, weights).unwrap_err();
    assert!(err.to_string().contains("stray.weight"));
    Ok(())
}
