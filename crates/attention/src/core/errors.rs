//! Error types emitted by the attention kernel and the cache stores.
//!
//! Every failure here is a deterministic function of the inputs: nothing is
//! retried internally and a failed cache update must leave the store
//! untouched. Recovery (dropping a sequence, restarting a batch) belongs to
//! the serving layer.

/// Attention-specific error category.
#[derive(Debug)]
pub enum AttentionError {
    /// Tensor rank or dimensions are inconsistent with the documented contract.
    ShapeMismatch { context: String },
    /// A decode write would advance a sequence past the fixed cache capacity.
    CapacityExceeded {
        row: usize,
        position: usize,
        requested: usize,
        capacity: usize,
    },
    /// A cache store was used outside its lifecycle (e.g. a second prefill write).
    CacheState { context: &'static str },
    /// The kernel does not support the requested data type.
    UnsupportedDType { requested: String },
    /// A backend-specific failure propagated to the caller.
    Backend { message: String },
}

impl std::fmt::Display for AttentionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttentionError::ShapeMismatch { context } => {
                write!(f, "invalid tensor shape: {context}")
            }
            AttentionError::CapacityExceeded {
                row,
                position,
                requested,
                capacity,
            } => write!(
                f,
                "cache capacity exceeded for row {row}: position {position} + {requested} new tokens > capacity {capacity}"
            ),
            AttentionError::CacheState { context } => {
                write!(f, "invalid cache state: {context}")
            }
            AttentionError::UnsupportedDType { requested } => {
                write!(f, "unsupported dtype {requested}")
            }
            AttentionError::Backend { message } => f.write_str(message),
        }
    }
}

impl std::error::Error for AttentionError {}

impl From<candle_core::Error> for AttentionError {
    fn from(err: candle_core::Error) -> Self {
        AttentionError::Backend {
            message: err.to_string(),
        }
    }
}
