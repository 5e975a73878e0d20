//! Trainable parameters shared by the binarized layers.

use candle_core::{DType, Device, Tensor};

use crate::error::{BinarizeError, Result};

/// Full-precision weight and optional bias of a binarized layer.
#[derive(Debug, Clone)]
pub(crate) struct LinearParams {
    weight: Tensor,
    bias: Option<Tensor>,
    in_features: usize,
    out_features: usize,
    device: Device,
}

impl LinearParams {
    /// Freshly initialized parameters: `N(0, sqrt(1/in_features))` weights, zero bias.
    pub(crate) fn new(
        in_features: usize,
        out_features: usize,
        bias: bool,
        device: &Device,
    ) -> Result<Self> {
        if in_features == 0 || out_features == 0 {
            return Err(BinarizeError::configuration(format!(
                "features must be > 0, got {in_features} -> {out_features}"
            )));
        }

        let weight = init_weight(in_features, out_features, device)?;
        let bias = if bias {
            Some(Tensor::zeros(out_features, DType::F32, device)?)
        } else {
            None
        };

        Ok(Self {
            weight,
            bias,
            in_features,
            out_features,
            device: device.clone(),
        })
    }

    pub(crate) fn reset(&mut self) -> Result<()> {
        self.weight = init_weight(self.in_features, self.out_features, &self.device)?;
        if let Some(bias) = self.bias.as_mut() {
            *bias = bias.zeros_like()?;
        }
        Ok(())
    }

    pub(crate) const fn in_features(&self) -> usize {
        self.in_features
    }

    pub(crate) const fn out_features(&self) -> usize {
        self.out_features
    }

    pub(crate) const fn weight(&self) -> &Tensor {
        &self.weight
    }

    pub(crate) const fn bias(&self) -> Option<&Tensor> {
        self.bias.as_ref()
    }

    pub(crate) const fn device(&self) -> &Device {
        &self.device
    }

    pub(crate) fn set_weight(&mut self, weight: Tensor) -> Result<()> {
        let expected = [self.out_features, self.in_features];
        if weight.dims() != expected {
            return Err(BinarizeError::shape_mismatch(&expected, weight.dims()));
        }
        self.weight = weight;
        Ok(())
    }

    pub(crate) fn set_bias(&mut self, bias: Tensor) -> Result<()> {
        if bias.dims() != [self.out_features] {
            return Err(BinarizeError::shape_mismatch(&[self.out_features], bias.dims()));
        }
        self.bias = Some(bias);
        Ok(())
    }

    /// Bias for a forward call; a bias-less layer cannot run forward.
    pub(crate) fn require_bias(&self, layer: &str) -> Result<&Tensor> {
        self.bias.as_ref().ok_or_else(|| {
            BinarizeError::configuration(format!("{layer} requires a bias to run forward"))
        })
    }
}

#[allow(clippy::cast_precision_loss)]
fn init_weight(in_features: usize, out_features: usize, device: &Device) -> Result<Tensor> {
    let std = (1.0 / in_features as f64).sqrt();
    Ok(Tensor::randn(0.0f32, std as f32, (out_features, in_features), device)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_statistics() {
        let device = Device::Cpu;
        let params = LinearParams::new(256, 128, true, &device).unwrap();

        assert_eq!(params.weight().dims(), &[128, 256]);
        let values: Vec<f32> = params.weight().flatten_all().unwrap().to_vec1().unwrap();
        let n = values.len() as f32;
        let mean = values.iter().sum::<f32>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / (n - 1.0);

        // std = sqrt(1/256) = 0.0625
        assert!(mean.abs() < 0.01, "mean {mean}");
        assert!((var.sqrt() - 0.0625).abs() < 0.005, "std {}", var.sqrt());

        let bias: Vec<f32> = params.bias().unwrap().to_vec1().unwrap();
        assert!(bias.iter().all(|b| *b == 0.0));
    }

    #[test]
    fn test_zero_features_rejected() {
        let device = Device::Cpu;
        assert!(matches!(
            LinearParams::new(0, 4, true, &device),
            Err(BinarizeError::Configuration(_))
        ));
        assert!(LinearParams::new(4, 0, true, &device).is_err());
    }

    #[test]
    fn test_set_weight_checks_shape() {
        let device = Device::Cpu;
        let mut params = LinearParams::new(4, 2, false, &device).unwrap();

        let good = Tensor::ones((2, 4), DType::F32, &device).unwrap();
        params.set_weight(good).unwrap();

        let bad = Tensor::ones((4, 2), DType::F32, &device).unwrap();
        assert!(matches!(
            params.set_weight(bad),
            Err(BinarizeError::ShapeMismatch { .. })
        ));
        assert!(params.set_bias(Tensor::ones(3, DType::F32, &device).unwrap()).is_err());
    }

    #[test]
    fn test_require_bias() {
        let device = Device::Cpu;
        let params = LinearParams::new(4, 2, false, &device).unwrap();
        assert!(matches!(
            params.require_bias("BinarizedLinear"),
            Err(BinarizeError::Configuration(_))
        ));
    }

    #[test]
    fn test_reset_zeroes_bias() {
        let device = Device::Cpu;
        let mut params = LinearParams::new(8, 4, true, &device).unwrap();
        params
            .set_bias(Tensor::ones(4, DType::F32, &device).unwrap())
            .unwrap();

        params.reset().unwrap();
        let bias: Vec<f32> = params.bias().unwrap().to_vec1().unwrap();
        assert_eq!(bias, vec![0.0; 4]);
    }
}
