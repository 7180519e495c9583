use candle_core::{DType, Device, Tensor};
use static_assertions::assert_impl_all;

use super::{GenerateCache, KvCache, PrefillCache};
use crate::core::AttentionError;

assert_impl_all!(GenerateCache: Send, Sync);
assert_impl_all!(KvCache: Send, Sync);

const HEADS: usize = 2;
const HEAD_DIM: usize = 4;

fn flat(tensor: &Tensor) -> Vec<f32> {
    tensor
        .to_dtype(DType::F32)
        .unwrap()
        .flatten_all()
        .unwrap()
        .to_vec1::<f32>()
        .unwrap()
}

fn step_kv(device: &Device, batch: usize, fill: f32) -> (Tensor, Tensor) {
    let shape = (batch, HEADS, 1, HEAD_DIM);
    let keys = Tensor::full(fill, shape, device).unwrap();
    let values = Tensor::full(fill + 0.5, shape, device).unwrap();
    (keys, values)
}

fn prefilled(device: &Device, seq_len: usize) -> (PrefillCache, Tensor, Tensor) {
    let shape = (1, HEADS, seq_len, HEAD_DIM);
    let keys = Tensor::rand(0.0f32, 1.0, shape, device).unwrap();
    let values = Tensor::rand(0.0f32, 1.0, shape, device).unwrap();
    let mut cache = PrefillCache::new();
    cache.update(&keys, &values).expect("first write succeeds");
    (cache, keys, values)
}

#[test]
fn prefill_read_returns_the_single_write() {
    let device = Device::Cpu;
    let (cache, keys, values) = prefilled(&device, 3);
    assert_eq!(cache.len(), 3);
    let (read_k, read_v) = cache.read().unwrap();
    assert_eq!(flat(&read_k), flat(&keys));
    assert_eq!(flat(&read_v), flat(&values));
}

#[test]
fn prefill_rejects_second_write() {
    let device = Device::Cpu;
    let (mut cache, keys, values) = prefilled(&device, 3);
    let err = cache.update(&keys, &values).unwrap_err();
    assert!(matches!(err, AttentionError::CacheState { .. }));
}

#[test]
fn prefill_read_before_write_fails() {
    let cache = PrefillCache::new();
    assert!(matches!(
        cache.read().unwrap_err(),
        AttentionError::CacheState { .. }
    ));
}

#[test]
fn generate_scatter_write_lands_at_each_row_position() {
    let device = Device::Cpu;
    let mut cache = GenerateCache::new(2, HEADS, 6, HEAD_DIM, DType::F32, &device).unwrap();
    let (keys, values) = step_kv(&device, 2, 1.0);
    let (full_k, _) = cache.update(&keys, &values).unwrap();

    assert_eq!(cache.positions(), &[1, 1]);
    for row in 0..2 {
        let written = full_k.narrow(0, row, 1).unwrap().narrow(2, 0, 1).unwrap();
        assert!(flat(&written).iter().all(|&v| v == 1.0));
        let untouched = full_k.narrow(0, row, 1).unwrap().narrow(2, 1, 5).unwrap();
        assert!(flat(&untouched).iter().all(|&v| v == 0.0));
    }
}

#[test]
fn merge_does_not_alter_other_rows() {
    let device = Device::Cpu;
    let mut cache = GenerateCache::new(3, HEADS, 8, HEAD_DIM, DType::F32, &device).unwrap();
    let (prefill, prefill_k, _) = prefilled(&device, 4);

    cache.merge_prefill(1, &prefill).unwrap();

    assert_eq!(cache.positions(), &[0, 4, 0]);
    let (keys, _) = cache.read();
    let merged = keys.narrow(0, 1, 1).unwrap().narrow(2, 0, 4).unwrap();
    assert_eq!(flat(&merged), flat(&prefill_k));
    for row in [0, 2] {
        let other = keys.narrow(0, row, 1).unwrap();
        assert!(flat(&other).iter().all(|&v| v == 0.0), "row {row} perturbed");
    }
}

#[test]
fn positions_advance_by_one_per_decode_step() {
    let device = Device::Cpu;
    let mut cache = GenerateCache::new(2, HEADS, 8, HEAD_DIM, DType::F32, &device).unwrap();
    for step in 0..5 {
        let (keys, values) = step_kv(&device, 2, step as f32);
        cache.update(&keys, &values).unwrap();
    }
    assert_eq!(cache.positions(), &[5, 5]);
}

#[test]
fn capacity_boundary_fails_without_mutation() {
    let device = Device::Cpu;
    let mut cache = GenerateCache::new(1, HEADS, 2, HEAD_DIM, DType::F32, &device).unwrap();
    let (keys, values) = step_kv(&device, 1, 3.0);
    cache.update(&keys, &values).unwrap();
    cache.update(&keys, &values).unwrap();
    assert_eq!(cache.positions(), &[2]);

    let snapshot = flat(&cache.read().0);
    let err = cache.update(&keys, &values).unwrap_err();
    assert!(matches!(
        err,
        AttentionError::CapacityExceeded {
            row: 0,
            position: 2,
            requested: 1,
            capacity: 2,
        }
    ));
    assert_eq!(cache.positions(), &[2], "failed update must not advance");
    assert_eq!(flat(&cache.read().0), snapshot, "failed update must not write");
}

#[test]
fn decode_shape_mismatch_is_rejected() {
    let device = Device::Cpu;
    let mut cache = GenerateCache::new(2, HEADS, 4, HEAD_DIM, DType::F32, &device).unwrap();
    let bad_keys = Tensor::zeros((2, HEADS + 1, 1, HEAD_DIM), DType::F32, &device).unwrap();
    let bad_values = bad_keys.clone();
    assert!(matches!(
        cache.update(&bad_keys, &bad_values).unwrap_err(),
        AttentionError::ShapeMismatch { .. }
    ));
}

#[test]
fn merge_past_capacity_is_rejected() {
    let device = Device::Cpu;
    let mut cache = GenerateCache::new(1, HEADS, 2, HEAD_DIM, DType::F32, &device).unwrap();
    let (prefill, _, _) = prefilled(&device, 3);
    assert!(matches!(
        cache.merge_prefill(0, &prefill).unwrap_err(),
        AttentionError::CapacityExceeded { .. }
    ));
    assert_eq!(cache.positions(), &[0]);
}

#[test]
fn reset_row_clears_data_and_position() {
    let device = Device::Cpu;
    let mut cache = GenerateCache::new(2, HEADS, 4, HEAD_DIM, DType::F32, &device).unwrap();
    let (keys, values) = step_kv(&device, 2, 7.0);
    cache.update(&keys, &values).unwrap();

    cache.reset_row(0).unwrap();

    assert_eq!(cache.positions(), &[0, 1]);
    let (full_k, _) = cache.read();
    assert!(flat(&full_k.narrow(0, 0, 1).unwrap())
        .iter()
        .all(|&v| v == 0.0));
    let survivor = full_k.narrow(0, 1, 1).unwrap().narrow(2, 0, 1).unwrap();
    assert!(flat(&survivor).iter().all(|&v| v == 7.0));
}

// Prefill 3 tokens, decode 2 more: position lands on 5 and the first 3 cache
// rows stay byte-identical to the standalone prefill output.
#[test]
fn prefill_then_decode_occupancy() {
    let device = Device::Cpu;
    let (prefill, prefill_k, prefill_v) = prefilled(&device, 3);

    let mut cache = GenerateCache::new(1, HEADS, 8, HEAD_DIM, DType::F32, &device).unwrap();
    cache.merge_prefill(0, &prefill).unwrap();
    for step in 0..2 {
        let (keys, values) = step_kv(&device, 1, step as f32);
        cache.update(&keys, &values).unwrap();
    }

    assert_eq!(cache.positions(), &[5]);
    let (keys, values) = cache.read();
    let head_k = keys.narrow(2, 0, 3).unwrap();
    let head_v = values.narrow(2, 0, 3).unwrap();
    assert_eq!(flat(&head_k), flat(&prefill_k));
    assert_eq!(flat(&head_v), flat(&prefill_v));
}

#[test]
fn tagged_variant_dispatches_update_and_read() {
    let device = Device::Cpu;
    let mut cache = KvCache::prefill();
    let shape = (1, HEADS, 2, HEAD_DIM);
    let keys = Tensor::rand(0.0f32, 1.0, shape, &device).unwrap();
    let values = Tensor::rand(0.0f32, 1.0, shape, &device).unwrap();

    let (updated_k, _) = cache.update(&keys, &values).unwrap();
    assert_eq!(updated_k.dims(), &[1, HEADS, 2, HEAD_DIM]);
    assert_eq!(cache.as_prefill().unwrap().len(), 2);
    assert!(cache.as_generate().is_none());

    let (read_k, _) = cache.read().unwrap();
    assert_eq!(flat(&read_k), flat(&keys));
}
