//! IrLinear layer - scaled-tanh binarized weights with an analytic surrogate gradient.

use std::fmt;

use candle_core::{Device, Tensor};

use super::function::{
    flatten_input, linear_backward, linear_forward, weight_dims, BinaryFunction, GradRequest,
    LinearGradients,
};
use super::params::LinearParams;
use crate::error::{BinarizeError, Result};
use crate::quantization::{
    control_scale, normalize_weights, tanh_binarize, tanh_surrogate_grad, validate_temperature,
    WeightStats,
};

/// Scaled-tanh binarizer: `W_q = k * tanh(t * (W - mean) / std)`, `k = max(1/t, 1)`.
///
/// The temperature `t` is supplied per call and never receives a gradient.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScaledTanhBinarizer;

/// Intermediates of a scaled-tanh forward call.
#[derive(Debug, Clone)]
pub struct IrSaved {
    input: Tensor,
    input_dims: Vec<usize>,
    weight_q: Tensor,
    weight_norm: Tensor,
    bias: Option<Tensor>,
    std: f64,
    t: f64,
    k: f64,
}

impl IrSaved {
    /// Quantized weight used in the forward matmul.
    #[must_use]
    pub const fn weight_q(&self) -> &Tensor {
        &self.weight_q
    }

    /// Normalized weight `(W - mean) / std`.
    #[must_use]
    pub const fn weight_norm(&self) -> &Tensor {
        &self.weight_norm
    }

    /// Unbiased standard deviation of the weight.
    #[must_use]
    pub const fn std(&self) -> f64 {
        self.std
    }

    /// Temperature of the forward call.
    #[must_use]
    pub const fn temperature(&self) -> f64 {
        self.t
    }

    /// Control scale `k = max(1/t, 1)`.
    #[must_use]
    pub const fn control_scale(&self) -> f64 {
        self.k
    }
}

impl BinaryFunction for ScaledTanhBinarizer {
    type Args = Option<f64>;
    type Saved = IrSaved;

    fn forward(
        input: &Tensor,
        weight: &Tensor,
        bias: Option<&Tensor>,
        t: Option<f64>,
    ) -> Result<(Tensor, IrSaved)> {
        let t = validate_temperature(t)?;
        let (_, in_features) = weight_dims(weight)?;
        let (flat_input, input_dims) = flatten_input(input, in_features)?;

        let stats = WeightStats::compute(weight)?;
        let weight_norm = normalize_weights(weight, &stats)?;
        let k = control_scale(t);
        let weight_q = tanh_binarize(&weight_norm, t)?;

        let output = linear_forward(&flat_input, &input_dims, &weight_q, bias)?;

        let saved = IrSaved {
            input: flat_input,
            input_dims,
            weight_q,
            weight_norm,
            bias: bias.cloned(),
            std: stats.std,
            t,
            k,
        };
        Ok((output, saved))
    }

    fn backward(
        saved: IrSaved,
        grad_output: &Tensor,
        request: GradRequest,
    ) -> Result<LinearGradients> {
        let IrSaved {
            input,
            input_dims,
            weight_q,
            weight_norm,
            bias,
            t,
            ..
        } = saved;

        linear_backward(
            &input,
            &input_dims,
            &weight_q,
            bias.is_some(),
            grad_output,
            request,
            |grad_weight_q| {
                let surrogate = tanh_surrogate_grad(&weight_norm, t)?;
                Ok(grad_weight_q.mul(&surrogate)?)
            },
        )
    }
}

/// Linear layer with scaled-tanh binarized weights.
///
/// The temperature is owned by the caller (typically annealed with a
/// [`TemperatureSchedule`](crate::TemperatureSchedule)) and must be set with
/// [`IrLinear::set_temperature`] or passed to
/// [`IrLinear::forward_with_temperature`] before each forward.
#[derive(Debug)]
pub struct IrLinear {
    params: LinearParams,
    temperature: Option<f64>,
    saved: Option<IrSaved>,
}

impl IrLinear {
    /// Display name of the layer type.
    pub const NAME: &'static str = "IRLinear";

    /// Create a layer with freshly initialized weights and no temperature.
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
            temperature: None,
            saved: None,
        })
    }

    /// Re-initialize weights, zero the bias and clear the temperature.
    ///
    /// # Errors
    ///
    /// Returns error if tensor creation fails.
    pub fn reset_parameters(&mut self) -> Result<()> {
        self.temperature = None;
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

    /// Current temperature, if set.
    #[must_use]
    pub const fn temperature(&self) -> Option<f64> {
        self.temperature
    }

    /// Set the temperature used by [`IrLinear::forward`].
    ///
    /// Validation happens at forward time.
    pub fn set_temperature(&mut self, t: f64) {
        self.temperature = Some(t);
    }

    /// Clear the temperature.
    pub fn clear_temperature(&mut self) {
        self.temperature = None;
    }

    /// Whether a forward context is waiting for `backward`.
    #[must_use]
    pub const fn has_saved_context(&self) -> bool {
        self.saved.is_some()
    }

    /// Saved context of the last forward, if not yet consumed.
    #[must_use]
    pub const fn saved_context(&self) -> Option<&IrSaved> {
        self.saved.as_ref()
    }

    /// Forward pass with the stored temperature.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the layer has no bias, `InvalidArgument` if
    /// the temperature is unset or not positive.
    pub fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        self.run_forward(input, self.temperature)
    }

    /// Forward pass with an explicit temperature for this call only.
    ///
    /// # Errors
    ///
    /// Same as [`IrLinear::forward`].
    pub fn forward_with_temperature(&mut self, input: &Tensor, t: f64) -> Result<Tensor> {
        self.run_forward(input, Some(t))
    }

    /// Forward pass with the stored temperature, without retaining a context.
    ///
    /// # Errors
    ///
    /// Same as [`IrLinear::forward`].
    pub fn infer(&self, input: &Tensor) -> Result<Tensor> {
        let bias = self.params.require_bias(Self::NAME)?;
        let weight = self.params.weight();
        let (output, _) =
            ScaledTanhBinarizer::forward(input, weight, Some(bias), self.temperature)?;
        Ok(output)
    }

    /// Backward pass for the last forward, consuming its saved context.
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
        ScaledTanhBinarizer::backward(saved, grad_output, request)
    }

    fn run_forward(&mut self, input: &Tensor, t: Option<f64>) -> Result<Tensor> {
        tracing::trace!(layer = Self::NAME, dims = ?input.dims(), ?t, "forward");
        let bias = self.params.require_bias(Self::NAME)?;
        let (output, saved) =
            ScaledTanhBinarizer::forward(input, self.params.weight(), Some(bias), t)?;
        self.saved = Some(saved);
        Ok(output)
    }
}

impl fmt::Display for IrLinear {
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
