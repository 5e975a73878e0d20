//! Custom forward/backward contract for binarized linear transforms.

use candle_core::Tensor;

use crate::error::{BinarizeError, Result};

/// A linear transform with a quantized weight and a hand-written gradient rule.
///
/// `forward` returns the output together with the intermediates that
/// `backward` needs. The saved value is consumed by `backward`, so every
/// gradient is derived from exactly the quantized weight used in the forward
/// matmul.
pub trait BinaryFunction {
    /// Per-call arguments beyond input, weight and bias.
    type Args;

    /// Intermediates retained between forward and backward.
    type Saved;

    /// Compute `input · quantize(weight)ᵗ + bias`.
    ///
    /// # Errors
    ///
    /// Returns error if arguments are invalid or tensor operations fail.
    fn forward(
        input: &Tensor,
        weight: &Tensor,
        bias: Option<&Tensor>,
        args: Self::Args,
    ) -> Result<(Tensor, Self::Saved)>;

    /// Compute the gradients requested by `request`.
    ///
    /// # Errors
    ///
    /// Returns error if `grad_output` does not match the forward output shape.
    fn backward(
        saved: Self::Saved,
        grad_output: &Tensor,
        request: GradRequest,
    ) -> Result<LinearGradients>;
}

/// Which inputs of a forward call need a gradient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GradRequest {
    /// Gradient w.r.t. the layer input.
    pub input: bool,
    /// Gradient w.r.t. the full-precision weight.
    pub weight: bool,
    /// Gradient w.r.t. the bias.
    pub bias: bool,
}

impl Default for GradRequest {
    fn default() -> Self {
        Self::all()
    }
}

impl GradRequest {
    /// Request every gradient.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            input: true,
            weight: true,
            bias: true,
        }
    }

    /// Request no gradient.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            input: false,
            weight: false,
            bias: false,
        }
    }

    /// Set whether the input gradient is needed.
    #[must_use]
    pub const fn with_input(mut self, needed: bool) -> Self {
        self.input = needed;
        self
    }

    /// Set whether the weight gradient is needed.
    #[must_use]
    pub const fn with_weight(mut self, needed: bool) -> Self {
        self.weight = needed;
        self
    }

    /// Set whether the bias gradient is needed.
    #[must_use]
    pub const fn with_bias(mut self, needed: bool) -> Self {
        self.bias = needed;
        self
    }
}

/// Gradients produced by a backward call.
///
/// `None` means "no gradient", which is distinct from a zero tensor.
#[derive(Debug, Clone, Default)]
pub struct LinearGradients {
    /// Gradient w.r.t. the input, same shape as the input.
    pub input: Option<Tensor>,
    /// Gradient w.r.t. the weight, shape `[out_features, in_features]`.
    pub weight: Option<Tensor>,
    /// Gradient w.r.t. the bias, shape `[out_features]`.
    pub bias: Option<Tensor>,
    /// Gradient w.r.t. the temperature. Never produced.
    pub temperature: Option<Tensor>,
}

/// `(out_features, in_features)` of a 2-D weight with no empty dimension.
pub(crate) fn weight_dims(weight: &Tensor) -> Result<(usize, usize)> {
    let (out_features, in_features) = weight.dims2()?;
    if out_features == 0 || in_features == 0 {
        return Err(BinarizeError::configuration(format!(
            "weight must have non-zero dimensions, got [{out_features}, {in_features}]"
        )));
    }
    Ok((out_features, in_features))
}

/// Flatten `input` to `[rows, in_features]`, returning its original dims.
pub(crate) fn flatten_input(input: &Tensor, in_features: usize) -> Result<(Tensor, Vec<usize>)> {
    let dims = input.dims().to_vec();
    if dims.last() != Some(&in_features) {
        let mut expected = dims.clone();
        match expected.last_mut() {
            Some(last) => *last = in_features,
            None => expected.push(in_features),
        }
        return Err(BinarizeError::shape_mismatch(&expected, &dims));
    }

    let rows = input.elem_count() / in_features;
    Ok((input.reshape((rows, in_features))?, dims))
}

/// Dims of the forward output for an input with `input_dims`.
pub(crate) fn output_dims(input_dims: &[usize], out_features: usize) -> Vec<usize> {
    let mut dims = input_dims.to_vec();
    if let Some(last) = dims.last_mut() {
        *last = out_features;
    }
    dims
}

/// `flat_input · weight_qᵗ + bias`, reshaped back to the input's leading dims.
pub(crate) fn linear_forward(
    flat_input: &Tensor,
    input_dims: &[usize],
    weight_q: &Tensor,
    bias: Option<&Tensor>,
) -> Result<Tensor> {
    let out_features = weight_q.dim(0)?;
    let output = flat_input.matmul(&weight_q.t()?)?;

    let output = if let Some(bias) = bias {
        if bias.dims() != [out_features] {
            return Err(BinarizeError::shape_mismatch(&[out_features], bias.dims()));
        }
        output.broadcast_add(bias)?
    } else {
        output
    };

    Ok(output.reshape(output_dims(input_dims, out_features))?)
}

/// Check `grad_output` against the forward output and flatten it to `[rows, out_features]`.
pub(crate) fn flatten_grad_output(
    grad_output: &Tensor,
    input_dims: &[usize],
    out_features: usize,
) -> Result<Tensor> {
    let expected = output_dims(input_dims, out_features);
    if grad_output.dims() != expected.as_slice() {
        return Err(BinarizeError::shape_mismatch(&expected, grad_output.dims()));
    }

    let rows = grad_output.elem_count() / out_features;
    Ok(grad_output.reshape((rows, out_features))?)
}

/// Gradients shared by every binarizer: input, unscaled weight and bias.
///
/// `scale_weight_grad` turns `grad_outputᵗ · input` into the final weight
/// gradient (masking for sign, surrogate scaling for tanh).
pub(crate) fn linear_backward(
    flat_input: &Tensor,
    input_dims: &[usize],
    weight_q: &Tensor,
    has_bias: bool,
    grad_output: &Tensor,
    request: GradRequest,
    scale_weight_grad: impl FnOnce(Tensor) -> Result<Tensor>,
) -> Result<LinearGradients> {
    let out_features = weight_q.dim(0)?;
    let flat_grad = flatten_grad_output(grad_output, input_dims, out_features)?;

    let input = if request.input {
        Some(flat_grad.matmul(weight_q)?.reshape(input_dims)?)
    } else {
        None
    };

    let weight = if request.weight {
        let grad_weight_q = flat_grad.t()?.matmul(flat_input)?;
        Some(scale_weight_grad(grad_weight_q)?)
    } else {
        None
    };

    let bias = if has_bias && request.bias {
        Some(flat_grad.sum(0)?)
    } else {
        None
    };

    Ok(LinearGradients {
        input,
        weight,
        bias,
        temperature: None,
    })
}
