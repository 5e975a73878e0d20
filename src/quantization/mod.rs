//! Weight binarization transforms.
//!
//! This module provides the pure tensor math shared by the layers:
//! - **Sign**: `sign(W)` with a saturation mask for `|W| > 1`
//! - **Scaled tanh**: `k * tanh(t * (W - mean) / std)` with `k = max(1/t, 1)`

mod sign;
mod tanh;

pub use sign::{saturation_mask, sign_binarize};
pub use tanh::{
    control_scale, normalize_weights, tanh_binarize, tanh_surrogate_grad, validate_temperature,
    WeightStats,
};
