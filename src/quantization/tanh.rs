//! Scaled-tanh binarization.
//!
//! Implements the smooth sign surrogate used by IR binarization:
//!
//! ```text
//! W_norm = (W - mean(W)) / std(W)        (unbiased std)
//! k      = max(1/t, 1)
//! W_q    = k * tanh(t * W_norm)
//! dW_q   = k * t * (1 - tanh(t * W_norm)^2)
//! ```
//!
//! As `t` grows, `W_q` approaches `sign(W_norm)`. The gradient factor is taken
//! with respect to `W_norm` and applied directly to the weight gradient; the
//! `1/std` term of the normalization is not folded in.

use candle_core::{DType, Tensor};

use crate::error::{BinarizeError, Result};

/// Mean and unbiased standard deviation of a weight tensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightStats {
    /// Mean over all elements.
    pub mean: f64,
    /// Unbiased (n - 1) standard deviation over all elements.
    pub std: f64,
}

impl WeightStats {
    /// Compute statistics over every element of `weight`.
    ///
    /// # Errors
    ///
    /// Returns `Quantization` if `weight` has fewer than two elements or a
    /// zero / non-finite standard deviation.
    #[allow(clippy::cast_precision_loss)]
    pub fn compute(weight: &Tensor) -> Result<Self> {
        let n = weight.elem_count();
        if n < 2 {
            return Err(BinarizeError::Quantization(format!(
                "standard deviation needs at least 2 weights, got {n}"
            )));
        }

        let weight = weight.to_dtype(DType::F64)?;
        let mean = weight.mean_all()?.to_scalar::<f64>()?;
        let sum_sq = weight.affine(1.0, -mean)?.sqr()?.sum_all()?.to_scalar::<f64>()?;
        let std = (sum_sq / (n - 1) as f64).sqrt();

        if !(std.is_finite() && std > 0.0) {
            return Err(BinarizeError::Quantization(format!(
                "weight standard deviation must be finite and > 0, got {std}"
            )));
        }

        Ok(Self { mean, std })
    }
}

/// Normalize weights to zero mean and unit standard deviation.
///
/// # Errors
///
/// Returns error if tensor operations fail.
pub fn normalize_weights(weight: &Tensor, stats: &WeightStats) -> Result<Tensor> {
    let scale = 1.0 / stats.std;
    Ok(weight.affine(scale, -stats.mean * scale)?)
}

/// Check that a temperature was supplied and is a positive finite scalar.
///
/// # Errors
///
/// Returns `InvalidArgument` if `t` is `None`, non-finite or `<= 0`.
pub fn validate_temperature(t: Option<f64>) -> Result<f64> {
    match t {
        None => Err(BinarizeError::invalid_argument(
            "temperature t must be set before forward",
        )),
        Some(t) if !t.is_finite() || t <= 0.0 => Err(BinarizeError::invalid_argument(format!(
            "temperature t must be a positive finite scalar, got {t}"
        ))),
        Some(t) => Ok(t),
    }
}

/// Control scale `k = max(1/t, 1)`.
#[must_use]
pub fn control_scale(t: f64) -> f64 {
    (1.0 / t).max(1.0)
}

/// Compute `k * tanh(t * weight_norm)`.
///
/// # Errors
///
/// Returns error if tensor operations fail.
pub fn tanh_binarize(weight_norm: &Tensor, t: f64) -> Result<Tensor> {
    let k = control_scale(t);
    Ok(weight_norm.affine(t, 0.0)?.tanh()?.affine(k, 0.0)?)
}

/// Compute the surrogate gradient `k * t * (1 - tanh(t * weight_norm)^2)`.
///
/// # Errors
///
/// Returns error if tensor operations fail.
pub fn tanh_surrogate_grad(weight_norm: &Tensor, t: f64) -> Result<Tensor> {
    let kt = control_scale(t) * t;
    let tanh = weight_norm.affine(t, 0.0)?.tanh()?;
    Ok(tanh.sqr()?.affine(-kt, kt)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn symmetric_weight(device: &Device) -> Tensor {
        Tensor::from_vec(vec![-3.0f64, -1.0, 1.0, 3.0], (2, 2), device).unwrap()
    }

    #[test]
    fn test_weight_stats_unbiased() {
        let device = Device::Cpu;
        let stats = WeightStats::compute(&symmetric_weight(&device)).unwrap();

        // sum of squares = 20, n - 1 = 3
        assert!(stats.mean.abs() < 1e-12);
        assert!((stats.std - (20.0f64 / 3.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_weight_stats_degenerate() {
        let device = Device::Cpu;

        let single = Tensor::from_vec(vec![0.5f32], (1, 1), &device).unwrap();
        assert!(matches!(
            WeightStats::compute(&single),
            Err(BinarizeError::Quantization(_))
        ));

        let constant = Tensor::ones((4, 4), DType::F32, &device).unwrap();
        assert!(matches!(
            WeightStats::compute(&constant),
            Err(BinarizeError::Quantization(_))
        ));
    }

    #[test]
    fn test_normalize_weights() {
        let device = Device::Cpu;
        let weight = Tensor::randn(2.0f32, 3.0, (16, 32), &device).unwrap();
        let stats = WeightStats::compute(&weight).unwrap();

        let norm = normalize_weights(&weight, &stats).unwrap();
        let norm_stats = WeightStats::compute(&norm).unwrap();

        assert!(norm_stats.mean.abs() < 1e-4);
        assert!((norm_stats.std - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_validate_temperature() {
        assert!(matches!(
            validate_temperature(None),
            Err(BinarizeError::InvalidArgument(_))
        ));
        assert!(validate_temperature(Some(0.0)).is_err());
        assert!(validate_temperature(Some(-1.0)).is_err());
        assert!(validate_temperature(Some(f64::NAN)).is_err());
        assert_eq!(validate_temperature(Some(0.5)).unwrap(), 0.5);
    }

    #[test]
    fn test_control_scale() {
        assert_eq!(control_scale(0.1), 10.0);
        assert_eq!(control_scale(1.0), 1.0);
        assert_eq!(control_scale(5.0), 1.0);
    }

    #[test]
    fn test_large_temperature_approaches_sign() {
        let device = Device::Cpu;
        let weight = symmetric_weight(&device);
        let stats = WeightStats::compute(&weight).unwrap();
        let norm = normalize_weights(&weight, &stats).unwrap();

        let quantized: Vec<f64> = tanh_binarize(&norm, 1000.0)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();

        for (q, expected) in quantized.iter().zip([-1.0, -1.0, 1.0, 1.0]) {
            assert!((q - expected).abs() < 1e-6, "{q} vs {expected}");
        }
    }

    #[test]
    fn test_small_temperature_bounded_by_k() {
        let device = Device::Cpu;
        let weight = Tensor::randn(0.0f64, 1.0, (32, 32), &device).unwrap();
        let stats = WeightStats::compute(&weight).unwrap();
        let norm = normalize_weights(&weight, &stats).unwrap();

        let t = 0.01;
        let k = control_scale(t);
        assert_eq!(k, 100.0);

        let quantized: Vec<f64> = tanh_binarize(&norm, t)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        let normalized: Vec<f64> = norm.flatten_all().unwrap().to_vec1().unwrap();

        for (q, n) in quantized.iter().zip(&normalized) {
            assert!(q.abs() <= k);
            // k * tanh(t * x) ~= x when k * t == 1 and t * x is small
            assert!((q - n).abs() < 1e-2 * n.abs().max(1.0));
        }
    }

    #[test]
    fn test_surrogate_grad_matches_finite_difference() {
        let device = Device::Cpu;
        let norm = Tensor::from_vec(
            vec![-2.0f64, -0.7, -0.1, 0.0, 0.05, 0.4, 1.3, 2.5],
            (2, 4),
            &device,
        )
        .unwrap();
        let h = 1e-6;

        for t in [0.2, 1.0, 3.0] {
            let grad: Vec<f64> = tanh_surrogate_grad(&norm, t)
                .unwrap()
                .flatten_all()
                .unwrap()
                .to_vec1()
                .unwrap();

            let plus = tanh_binarize(&norm.affine(1.0, h).unwrap(), t).unwrap();
            let minus = tanh_binarize(&norm.affine(1.0, -h).unwrap(), t).unwrap();
            let numeric: Vec<f64> = ((plus - minus).unwrap() / (2.0 * h))
                .unwrap()
                .flatten_all()
                .unwrap()
                .to_vec1()
                .unwrap();

            for (g, n) in grad.iter().zip(&numeric) {
                assert!((g - n).abs() < 1e-5 * g.abs().max(1.0), "t={t}: {g} vs {n}");
            }
        }
    }
}
