//! BinarizedLinear layer - sign-binarized weights with a clipped straight-through gradient.

use std::fmt;

use candle_core::{Device, Tensor};

use super::function::{
    flatten_input, linear_backward, linear_forward, weight_dims, BinaryFunction, GradRequest,
    LinearGradients,
};
use super::params::LinearParams;
use crate::error::{BinarizeError, Result};
use crate::quantization::{saturation_mask, sign_binarize};

/// Sign binarizer: `W_q = sign(W)`.
///
/// Backward passes the weight gradient straight through, except where
/// `|W| > 1`, where it is zeroed.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignBinarizer;

/// Intermediates of a sign forward call.
#[derive(Debug, Clone)]
pub struct SignSaved {
    input: Tensor,
    input_dims: Vec<usize>,
    weight_q: Tensor,
    mask: Tensor,
    bias: Option<Tensor>,
}

impl SignSaved {
    /// Binarized weight used in the forward matmul.
    #[must_use]
    pub const fn weight_q(&self) -> &Tensor {
        &self.weight_q
    }

    /// Saturation mask (`u8`, 1 where `|W| > 1`).
    #[must_use]
    pub const fn mask(&self) -> &Tensor {
        &self.mask
    }
}

impl BinaryFunction for SignBinarizer {
    type Args = ();
    type Saved = SignSaved;

    fn forward(
        input: &Tensor,
        weight: &Tensor,
        bias: Option<&Tensor>,
        (): (),
    ) -> Result<(Tensor, SignSaved)> {
        let (_, in_features) = weight_dims(weight)?;
        let (flat_input, input_dims) = flatten_input(input, in_features)?;

        let mask = saturation_mask(weight)?;
        let weight_q = sign_binarize(weight)?;
        let output = linear_forward(&flat_input, &input_dims, &weight_q, bias)?;

        let saved = SignSaved {
            input: flat_input,
            input_dims,
            weight_q,
            mask,
            bias: bias.cloned(),
        };
        Ok((output, saved))
    }

    fn backward(
        saved: SignSaved,
        grad_output: &Tensor,
        request: GradRequest,
    ) -> Result<LinearGradients> {
        let SignSaved {
            input,
            input_dims,
            weight_q,
            mask,
            bias,
        } = saved;

        linear_backward(
            &input,
            &input_dims,
            &weight_q,
            bias.is_some(),
            grad_output,
            request,
            |grad_weight| Ok(mask.where_cond(&grad_weight.zeros_like()?, &grad_weight)?),
        )
    }
}

/// Linear layer whose weights are binarized to {-1, +1} by sign at forward time.
///
/// Full-precision weights are kept for the optimizer; only the forward matmul
/// sees `sign(W)`. Each `forward` stores a single saved context that the next
/// `backward` consumes, so at most one forward may be in flight per layer.
///
/// # Example
///
/// ```ignore
/// use binarize_linear::{BinarizedLinear, GradRequest};
/// use candle_core::{Device, Tensor};
///
/// let device = Device::Cpu;
/// let mut layer = BinarizedLinear::new(256, 64, true, &device)?;
///
/// let input = Tensor::randn(0.0f32, 1.0, (4, 256), &device)?;
/// let output = layer.forward(&input)?;
///
/// let grad_output = output.ones_like()?;
/// let grads = layer.backward(&grad_output, GradRequest::all())?;
/// ```
#[derive(Debug)]
pub struct BinarizedLinear {
    params: LinearParams,
    saved: Option<SignSaved>,
}

impl BinarizedLinear {
    /// Display name of the layer type.
    pub const NAME: &'static str = "BinarizedLinear";

    /// Create a layer with freshly initialized weights.
    ///
    /// Weights are drawn from `N(0, sqrt(1/in_features))`; the bias, if
    /// enabled, starts at zero. A layer created without bias cannot run
    /// `forward`.
    ///
    /// # Errors
    ///
    /// Returns error if a feature count is zero or tensor creation fails.
    pub fn new(
        in_features: usize,
        out_features: usize,
        bias: bool,
        device: &Device,
    ) -> Result<Self> {
        Ok(Self {
            params: LinearParams::new(in_features, out_features, bias, device)?,
            saved: None,
        })
    }

    /// Re-initialize weights and zero the bias.
    ///
    /// # Errors
    ///
    /// Returns error if tensor creation fails.
    pub fn reset_parameters(&mut self) -> Result<()> {
        self.saved = None;
        self.params.reset()
    }

    /// Get the input features dimension.
    #[must_use]
    pub const fn in_features(&self) -> usize {
        self.params.in_features()
    }

    /// Get the output features dimension.
    #[must_use]
    pub const fn out_features(&self) -> usize {
        self.params.out_features()
    }

    /// Full-precision weight `[out_features, in_features]`.
    #[must_use]
    pub const fn weight(&self) -> &Tensor {
        self.params.weight()
    }

    /// Bias `[out_features]`, if enabled.
    #[must_use]
    pub const fn bias(&self) -> Option<&Tensor> {
        self.params.bias()
    }

    /// Get the device.
    #[must_use]
    pub const fn device(&self) -> &Device {
        self.params.device()
    }

    /// Replace the full-precision weight.
    ///
    /// # Errors
    ///
    /// Returns error if the shape is not `[out_features, in_features]`.
    pub fn set_weight(&mut self, weight: Tensor) -> Result<()> {
        self.params.set_weight(weight)
    }

    /// Replace (or add) the bias.
    ///
    /// # Errors
    ///
    /// Returns error if the shape is not `[out_features]`.
    pub fn set_bias(&mut self, bias: Tensor) -> Result<()> {
        self.params.set_bias(bias)
    }

    /// Whether a forward context is waiting for `backward`.
    #[must_use]
    pub const fn has_saved_context(&self) -> bool {
        self.saved.is_some()
    }

    /// Saved context of the last forward, if not yet consumed.
    #[must_use]
    pub const fn saved_context(&self) -> Option<&SignSaved> {
        self.saved.as_ref()
    }

    /// Forward pass, retaining the context for `backward`.
    ///
    /// # Arguments
    ///
    /// * `input` - Input tensor [..., in_features]
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the layer has no bias, `ShapeMismatch` if the
    /// input's last dimension is not `in_features`.
    pub fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        tracing::trace!(layer = Self::NAME, dims = ?input.dims(), "forward");
        let bias = self.params.require_bias(Self::NAME)?;
        let (output, saved) = SignBinarizer::forward(input, self.params.weight(), Some(bias), ())?;
        self.saved = Some(saved);
        Ok(output)
    }

    /// Forward pass without retaining a context.
    ///
    /// # Errors
    ///
    /// Same as [`BinarizedLinear::forward`].
    pub fn infer(&self, input: &Tensor) -> Result<Tensor> {
        let bias = self.params.require_bias(Self::NAME)?;
        let (output, _) = SignBinarizer::forward(input, self.params.weight(), Some(bias), ())?;
        Ok(output)
    }

    /// Backward pass for the last `forward`, consuming its saved context.
    ///
    /// # Errors
    ///
    /// Returns `NoSavedContext` if no forward preceded this call, or
    /// `ShapeMismatch` if `grad_output` does not match the forward output.
    pub fn backward(
        &mut self,
        grad_output: &Tensor,
        request: GradRequest,
    ) -> Result<LinearGradients> {
        tracing::trace!(layer = Self::NAME, ?request, "backward");
        let saved = self.saved.take().ok_or(BinarizeError::NoSavedContext)?;
        SignBinarizer::backward(saved, grad_output, request)
    }
}

impl fmt::Display for BinarizedLinear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} -> {})",
            Self::NAME,
            self.in_features(),
            self.out_features()
        )
    }
}
