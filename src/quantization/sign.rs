//! Hard sign binarization.
//!
//! `W_q = sign(W)` with `sign(0) = 0`, so an exactly-zero weight contributes
//! nothing to the forward matmul.

use candle_core::Tensor;

use crate::error::Result;

/// Binarize weights to {-1, 0, +1} by sign.
///
/// Positive values map to `+1`, negative values to `-1` and zero (or NaN) to `0`.
/// The result keeps the dtype of `weight`.
///
/// # Errors
///
/// Returns error if tensor operations fail.
pub fn sign_binarize(weight: &Tensor) -> Result<Tensor> {
    let dtype = weight.dtype();
    let positive = weight.gt(0.0)?.to_dtype(dtype)?;
    let negative = weight.lt(0.0)?.to_dtype(dtype)?;
    Ok(positive.sub(&negative)?)
}

/// Mask of weights outside `[-1, 1]`, i.e. `(W > 1) | (W < -1)`.
///
/// Returned as a `u8` tensor (1 = saturated) suitable for `where_cond`.
///
/// # Errors
///
/// Returns error if tensor operations fail.
pub fn saturation_mask(weight: &Tensor) -> Result<Tensor> {
    Ok(weight.abs()?.gt(1.0)?)
}
