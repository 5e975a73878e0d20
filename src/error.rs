//! Error types for binarize-linear.

use thiserror::Error;

/// Result type alias for binarization operations.
pub type Result<T> = std::result::Result<T, BinarizeError>;

/// Errors that can occur while binarizing layers or computing their gradients.
#[derive(Debug, Error)]
pub enum BinarizeError {
    /// Unsupported layer configuration (missing bias, unknown layer kind, ...).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Invalid call argument, such as a missing or non-positive temperature.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Shape mismatch in tensor operations.
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Expected shape.
        expected: Vec<usize>,
        /// Actual shape.
        actual: Vec<usize>,
    },

    /// `backward` was called without a matching `forward`.
    #[error("no saved context - call forward() before backward()")]
    NoSavedContext,

    /// Weights cannot be quantized (e.g. zero standard deviation).
    #[error("quantization error: {0}")]
    Quantization(String),

    /// Candle tensor operation error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),
}

impl BinarizeError {
    /// Create a configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create an invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a shape mismatch error.
    pub fn shape_mismatch(expected: &[usize], actual: &[usize]) -> Self {
        Self::ShapeMismatch {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}
