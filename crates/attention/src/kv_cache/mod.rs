//! Key/value cache stores for the two phases of autoregressive generation.
//!
//! Prefill processes a whole prompt in one pass and captures its keys/values
//! in a [`PrefillCache`]; decode emits one token at a time against a batched
//! [`GenerateCache`]. The transition between the two is an explicit
//! [`GenerateCache::merge_prefill`] into the sequence's assigned batch row.

pub mod generate;
pub mod prefill;

pub use generate::GenerateCache;
pub use prefill::PrefillCache;

use candle_core::Tensor;

use crate::core::AttentionError;

/// Tagged cache variant dispatched statically per call site.
///
/// Attention code accepts a `&mut KvCache` and calls [`update`](Self::update)
/// with the freshly projected keys/values; the returned pair is the full
/// post-update cache content to attend over. Which phase a forward call is in
/// is dictated solely by the variant handed in.
#[derive(Debug)]
pub enum KvCache {
    Prefill(PrefillCache),
    Generate(GenerateCache),
}

impl KvCache {
    /// Fresh, empty prefill store for a single sequence.
    pub fn prefill() -> Self {
        KvCache::Prefill(PrefillCache::new())
    }

    /// Cache contents valid up to the current write position(s).
    ///
    /// For the generate variant this is the full-capacity tensor pair;
    /// masking, not slicing, hides the unwritten slots.
    pub fn read(&self) -> Result<(Tensor, Tensor), AttentionError> {
        match self {
            KvCache::Prefill(cache) => cache.read(),
            KvCache::Generate(cache) => Ok(cache.read()),
        }
    }

    /// Merge newly computed keys/values into the store and return the
    /// post-update full cache for immediate use by attention.
    pub fn update(
        &mut self,
        keys: &Tensor,
        values: &Tensor,
    ) -> Result<(Tensor, Tensor), AttentionError> {
        match self {
            KvCache::Prefill(cache) => cache.update(keys, values),
            KvCache::Generate(cache) => cache.update(keys, values),
        }
    }

    pub fn as_prefill(&self) -> Option<&PrefillCache> {
        match self {
            KvCache::Prefill(cache) => Some(cache),
            KvCache::Generate(_) => None,
        }
    }

    pub fn as_generate(&self) -> Option<&GenerateCache> {
        match self {
            KvCache::Prefill(_) => None,
            KvCache::Generate(cache) => Some(cache),
        }
    }

    pub fn as_generate_mut(&mut self) -> Option<&mut GenerateCache> {
        match self {
            KvCache::Prefill(_) => None,
            KvCache::Generate(cache) => Some(cache),
        }
    }
}

#[cfg(test)]
mod tests;
