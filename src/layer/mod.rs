//! Binarized linear layers.
//!
//! This module provides:
//! - `BinaryFunction`: the `{forward, backward}` pair a binarizer implements
//! - `BinarizedLinear`: hard sign weights with clipped straight-through gradient
//! - `IrLinear`: scaled-tanh weights with analytic surrogate gradient

mod function;
mod ir;
mod params;
mod sign;

pub use function::{BinaryFunction, GradRequest, LinearGradients};
pub use ir::{IrLinear, IrSaved, ScaledTanhBinarizer};
pub use sign::{BinarizedLinear, SignBinarizer, SignSaved};
