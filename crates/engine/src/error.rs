//! Engine-level error type.

use thiserror::Error;

use attention::AttentionError;

/// Failures surfaced by the environment and the model stack.
///
/// Configuration errors are fatal at startup and prevent serving; the other
/// variants carry cache/kernel and tensor-backend failures upward unchanged.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid engine configuration: {message}")]
    Configuration { message: String },

    #[error(transparent)]
    Attention(#[from] AttentionError),

    #[error(transparent)]
    Tensor(#[from] candle_core::Error),
}

impl EngineError {
    pub fn configuration(message: impl Into<String>) -> Self {
        EngineError::Configuration {
            message: message.into(),
        }
    }
}
