//! Batched decode-time cache with per-sequence write positions.

use candle_core::{DType, Device, Tensor};

use crate::core::AttentionError;
use crate::kv_cache::prefill::PrefillCache;

/// Key/value store shared by a batch of concurrently decoded sequences.
///
/// Keys and values are held at full capacity, shaped
/// `[batch, heads, capacity, head_dim]`, zero-initialised at construction.
/// `positions[i]` is the next index along the capacity dimension to write for
/// sequence `i`; it advances by the number of new tokens per
/// [`update`](Self::update) (1 in steady-state decode) and never wraps:
/// writing past capacity is a [`CapacityExceeded`](AttentionError) error and
/// the store stays untouched.
///
/// The serving layer owns one of these per attention layer for the lifetime
/// of the active batch and reclaims rows via [`reset_row`](Self::reset_row)
/// when a sequence finishes.
#[derive(Debug)]
pub struct GenerateCache {
    keys: Tensor,
    values: Tensor,
    positions: Vec<usize>,
    capacity: usize,
}

impl GenerateCache {
    /// Zero-initialised cache for `batch` sequences of at most `capacity` tokens.
    pub fn new(
        batch: usize,
        heads: usize,
        capacity: usize,
        head_dim: usize,
        dtype: DType,
        device: &Device,
    ) -> Result<Self, AttentionError> {
        if batch == 0 || heads == 0 || capacity == 0 || head_dim == 0 {
            return Err(AttentionError::ShapeMismatch {
                context: format!(
                    "generate cache dimensions must be non-zero, got batch={batch} heads={heads} capacity={capacity} head_dim={head_dim}"
                ),
            });
        }
        let shape = (batch, heads, capacity, head_dim);
        let keys = Tensor::zeros(shape, dtype, device)?;
        let values = Tensor::zeros(shape, dtype, device)?;
        log::info!(
            "generate cache init: batch={batch} heads={heads} capacity={capacity} head_dim={head_dim} dtype={dtype:?}"
        );
        Ok(Self {
            keys,
            values,
            positions: vec![0; batch],
            capacity,
        })
    }

    /// Full-capacity cache contents; masking hides the unwritten slots.
    pub fn read(&self) -> (Tensor, Tensor) {
        (self.keys.clone(), self.values.clone())
    }

    /// Next write index per batch row, co-indexed with the batch dimension.
    pub fn positions(&self) -> &[usize] {
        &self.positions
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn batch_size(&self) -> usize {
        self.positions.len()
    }

    /// Scatter-write one decode step into every row at its own position.
    ///
    /// `keys`/`values` are shaped `[batch, heads, n, head_dim]` with `n`
    /// normally 1. Every row is capacity-checked before the first write, so a
    /// failing call commits nothing. Rows other than the written index are
    /// never perturbed.
    pub fn update(
        &mut self,
        keys: &Tensor,
        values: &Tensor,
    ) -> Result<(Tensor, Tensor), AttentionError> {
        let (batch, heads, new_len, head_dim) =
            keys.dims4().map_err(|_| AttentionError::ShapeMismatch {
                context: format!(
                    "decode keys must have shape [batch, heads, n, head_dim], got {:?}",
                    keys.dims()
                ),
            })?;
        let cache_dims = self.keys.dims();
        if batch != cache_dims[0] || heads != cache_dims[1] || head_dim != cache_dims[3] {
            return Err(AttentionError::ShapeMismatch {
                context: format!(
                    "decode keys shape mismatch: expected [{}, {}, n, {}], got {:?}",
                    cache_dims[0],
                    cache_dims[1],
                    cache_dims[3],
                    keys.dims()
                ),
            });
        }
        if values.dims() != keys.dims() {
            return Err(AttentionError::ShapeMismatch {
                context: format!(
                    "decode values shape {:?} must match keys shape {:?}",
                    values.dims(),
                    keys.dims()
                ),
            });
        }
        if keys.dtype() != self.keys.dtype() || values.dtype() != self.keys.dtype() {
            return Err(AttentionError::UnsupportedDType {
                requested: format!(
                    "decode tensors must use {:?}, got {:?}/{:?}",
                    self.keys.dtype(),
                    keys.dtype(),
                    values.dtype()
                ),
            });
        }

        // Validate every row before mutating anything: a failed step must not
        // commit partial cache state.
        for (row, &pos) in self.positions.iter().enumerate() {
            if pos + new_len > self.capacity {
                return Err(AttentionError::CapacityExceeded {
                    row,
                    position: pos,
                    requested: new_len,
                    capacity: self.capacity,
                });
            }
        }

        let mut next_keys = self.keys.clone();
        let mut next_values = self.values.clone();
        for row in 0..batch {
            let pos = self.positions[row];
            let key_row = keys.narrow(0, row, 1)?;
            let value_row = values.narrow(0, row, 1)?;
            let ranges = [row..row + 1, 0..heads, pos..pos + new_len, 0..head_dim];
            next_keys = next_keys.slice_assign(&ranges, &key_row)?;
            next_values = next_values.slice_assign(&ranges, &value_row)?;
        }
        self.keys = next_keys;
        self.values = next_values;
        for pos in &mut self.positions {
            *pos += new_len;
        }
        Ok((self.keys.clone(), self.values.clone()))
    }

    /// Copy a completed prefill cache into batch row `row` at capacity offset
    /// `0..pos` and set that row's position to `pos`.
    ///
    /// This is how a sequence transitions from prefill to decode without
    /// recomputation.
    pub fn merge_prefill(
        &mut self,
        row: usize,
        prefill: &PrefillCache,
    ) -> Result<(), AttentionError> {
        if row >= self.positions.len() {
            return Err(AttentionError::ShapeMismatch {
                context: format!(
                    "merge row {row} out of range for batch of {}",
                    self.positions.len()
                ),
            });
        }
        let (keys, values) = prefill.read()?;
        let (_, heads, prefill_len, head_dim) = keys.dims4()?;
        let cache_dims = self.keys.dims();
        if heads != cache_dims[1] || head_dim != cache_dims[3] {
            return Err(AttentionError::ShapeMismatch {
                context: format!(
                    "prefill cache shape {:?} incompatible with generate cache {cache_dims:?}",
                    keys.dims()
                ),
            });
        }
        if prefill_len > self.capacity {
            return Err(AttentionError::CapacityExceeded {
                row,
                position: 0,
                requested: prefill_len,
                capacity: self.capacity,
            });
        }
        let ranges = [row..row + 1, 0..heads, 0..prefill_len, 0..head_dim];
        self.keys = self.keys.slice_assign(&ranges, &keys)?;
        self.values = self.values.slice_assign(&ranges, &values)?;
        self.positions[row] = prefill_len;
        log::debug!("merged {prefill_len} prefilled positions into cache row {row}");
        Ok(())
    }

    /// Zero a finished sequence's row and reset its position so the slot can
    /// be reassigned by the batch manager.
    pub fn reset_row(&mut self, row: usize) -> Result<(), AttentionError> {
        if row >= self.positions.len() {
            return Err(AttentionError::ShapeMismatch {
                context: format!(
                    "reset row {row} out of range for batch of {}",
                    self.positions.len()
                ),
            });
        }
        let dims = self.keys.dims();
        let zeros = Tensor::zeros(
            (1, dims[1], dims[2], dims[3]),
            self.keys.dtype(),
            self.keys.device(),
        )?;
        let ranges = [row..row + 1, 0..dims[1], 0..dims[2], 0..dims[3]];
        self.keys = self.keys.slice_assign(&ranges, &zeros)?;
        self.values = self.values.slice_assign(&ranges, &zeros)?;
        self.positions[row] = 0;
        Ok(())
    }
}
