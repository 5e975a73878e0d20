//! Weight-binarization layers for neural network compression research.
//!
//! This crate provides drop-in replacements for dense linear layers whose
//! weights are binarized at forward time while the full-precision weights keep
//! training through a hand-written gradient:
//! - **Sign**: `W_q = sign(W)` with a straight-through gradient clipped to
//!   `|W| <= 1`
//! - **Scaled tanh (IR)**: `W_q = k * tanh(t * W_norm)`, a temperature-controlled
//!   smooth sign with an analytic surrogate gradient
//!
//! # Features
//!
//! - `BinarizedLinear` and `IrLinear`: stateful layers with `forward` / `backward`
//! - `BinaryFunction`: the `{forward, backward}` pair behind each layer
//! - `binarizer`: in-place replacement of dense sub-layers in a transformer
//! - `TemperatureSchedule`: exponential annealing of `t` for training loops
//!
//! # Quick Start
//!
//! ```ignore
//! use binarize_linear::{binarizer, GradRequest, IrLinear, TransformerModel};
//! use candle_core::{Device, Tensor};
//!
//! let device = Device::Cpu;
//!
//! let mut layer = IrLinear::new(256, 64, true, &device)?;
//! layer.set_temperature(0.1);
//!
//! let input = Tensor::randn(0.0f32, 1.0, (4, 256), &device)?;
//! let output = layer.forward(&input)?;
//! let grads = layer.backward(&output.ones_like()?, GradRequest::all())?;
//!
//! // Swap every dense layer except the value projection
//! let mut model: TransformerModel = build_model()?;
//! binarizer(&mut model, "ir", true, false, false)?;
//! ```
//!
//! # Gradients
//!
//! ```text
//! grad_input  = grad_output · W_q
//! grad_weight = (grad_outputᵗ · input) ⊙ rule
//! grad_bias   = sum(grad_output) over the batch
//! ```
//!
//! where `rule` is `0` at `|W| > 1` (else `1`) for sign, and
//! `k * t * (1 - tanh(t * W_norm)^2)` for scaled tanh.
//!
//! # Feature Flags
//!
//! - `default`: CPU-only
//! - `cuda`: Enable CUDA tensors in candle
//!
//! # References
//!
//! - "Forward and Backward Information Retention for Accurate Binary Neural
//!   Networks" <https://arxiv.org/abs/1909.10788>

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]

mod config;
mod error;
pub mod layer;
pub mod quantization;
pub mod surgery;

pub use config::{
    BinarizeConfig, BinarizeKind, TemperatureSchedule, KEY_LAYER, QUERY_LAYER, VALUE_LAYER,
};
pub use error::{BinarizeError, Result};
pub use layer::{
    BinarizedLinear, BinaryFunction, GradRequest, IrLinear, LinearGradients, ScaledTanhBinarizer,
    SignBinarizer,
};
pub use surgery::{
    binarize_with_config, binarizer, BlockStack, GroupKind, ModuleGroup, SubLayer, SubLayerKind,
    TransformerBlock, TransformerModel,
};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::{BinarizeConfig, BinarizeKind, TemperatureSchedule};
    pub use crate::error::{BinarizeError, Result};
    pub use crate::layer::{BinarizedLinear, BinaryFunction, GradRequest, IrLinear};
    pub use crate::surgery::{binarizer, BlockStack, SubLayer, TransformerModel};
}
