//! Lightweight validation helpers shared across layer components.
//!
//! The routines return `candle_core::Result<()>` so call sites can propagate
//! errors without panicking.

use candle_core::{DType, Error, Result, Tensor};

/// Ensures a tensor matches the expected dimensions exactly.
pub fn expect_shape(label: &str, tensor: &Tensor, expected: &[usize]) -> Result<()> {
    let actual = tensor.dims();
    if actual == expected {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{label}: expected shape {expected:?}, got {actual:?}"
        )))
    }
}

/// Validates the `(batch, seq, hidden)` convention with a known hidden size.
pub fn expect_batch_seq_hidden(label: &str, tensor: &Tensor, hidden: usize) -> Result<()> {
    let dims = tensor.dims();
    match dims {
        [_, _, actual] if *actual == hidden => Ok(()),
        _ => Err(Error::Msg(format!(
            "{label}: expected (batch, seq, {hidden}) layout, got {dims:?}"
        ))),
    }
}

/// Checks the tensor dtype is one of the allowed values.
pub fn expect_dtype_in(label: &str, tensor: &Tensor, allowed: &[DType]) -> Result<()> {
    let dtype = tensor.dtype();
    if allowed.iter().any(|&candidate| candidate == dtype) {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{label}: expected dtype in {allowed:?}, got {dtype:?}"
        )))
    }
}

/// Checks the tensor is contiguous in memory.
pub fn expect_contiguous(label: &str, tensor: &Tensor) -> Result<()> {
    if tensor.is_contiguous() {
        Ok(())
    } else {
        Err(Error::Msg(format!("{label}: tensor must be contiguous")))
    }
}
