//! Ephemeral cache for one sequence processed in a single prefill pass.

use candle_core::Tensor;

use crate::core::AttentionError;

/// Key/value store for exactly one sequence being prefilled.
///
/// The whole sequence is written at once, so there is no position counter:
/// [`update`](Self::update) is a one-time full assignment and a second call is
/// rejected (single-write invariant). The store lives only for the duration of
/// prefill, after which it is either discarded or merged into a
/// [`GenerateCache`](super::GenerateCache) row.
#[derive(Debug, Default)]
pub struct PrefillCache {
    entry: Option<(Tensor, Tensor)>,
}

impl PrefillCache {
    pub fn new() -> Self {
        Self { entry: None }
    }

    /// Store the keys/values computed by the prefill pass.
    ///
    /// Both tensors must be shaped `[1, heads, seq_len, head_dim]`; the
    /// returned pair is the stored content, ready for the attention kernel.
    pub fn update(
        &mut self,
        keys: &Tensor,
        values: &Tensor,
    ) -> Result<(Tensor, Tensor), AttentionError> {
        if self.entry.is_some() {
            return Err(AttentionError::CacheState {
                context: "prefill cache accepts exactly one write",
            });
        }
        let dims = keys.dims();
        if dims.len() != 4 || dims[0] != 1 {
            return Err(AttentionError::ShapeMismatch {
                context: format!(
                    "prefill keys must have shape [1, heads, seq_len, head_dim], got {dims:?}"
                ),
            });
        }
        if values.dims() != dims {
            return Err(AttentionError::ShapeMismatch {
                context: format!(
                    "prefill values shape {:?} must match keys shape {dims:?}",
                    values.dims()
                ),
            });
        }
        if keys.dtype() != values.dtype() {
            return Err(AttentionError::UnsupportedDType {
                requested: format!("keys {:?} vs values {:?}", keys.dtype(), values.dtype()),
            });
        }
        self.entry = Some((keys.clone(), values.clone()));
        Ok((keys.clone(), values.clone()))
    }

    /// The full cached tensor pair.
    pub fn read(&self) -> Result<(Tensor, Tensor), AttentionError> {
        self.entry
            .as_ref()
            .map(|(k, v)| (k.clone(), v.clone()))
            .ok_or(AttentionError::CacheState {
                context: "prefill cache read before its single write",
            })
    }

    /// Number of cached positions (0 before the write).
    pub fn len(&self) -> usize {
        self.entry
            .as_ref()
            .map(|(k, _)| k.dims()[2])
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.entry.is_none()
    }
}
