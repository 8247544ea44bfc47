//! Affine projection applied to loaded weights.
//!
//! Weights follow the `(out_features, in_features)` convention used by
//! checkpoint files, so the projection computes `x · Wᵀ (+ b)`. Inputs may
//! have any leading layout as long as the trailing dimension is
//! `in_features`; leading dimensions are flattened for the matmul and restored
//! afterwards. The weight is cast to the activation dtype at apply time, which
//! lets half-precision checkpoints drive an `f32` activation stream.

use candle_core::Tensor;

use crate::{checks, Result};

/// Dense projection with an optional bias vector.
#[derive(Debug, Clone)]
pub struct Linear {
    weight: Tensor,
    bias: Option<Tensor>,
    in_features: usize,
    out_features: usize,
}

impl Linear {
    /// Wraps a loaded `(out_features, in_features)` weight and optional bias.
    pub fn new(weight: Tensor, bias: Option<Tensor>) -> Result<Self> {
        checks::expect_float("linear.weight", &weight)?;
        let (out_features, in_features) = checks::expect_matrix("linear.weight", &weight)?;
        if let Some(bias) = &bias {
            checks::expect_float("linear.bias", bias)?;
            checks::expect_shape("linear.bias", bias, &[out_features])?;
        }
        Ok(Self {
            weight,
            bias,
            in_features,
            out_features,
        })
    }

    /// Number of features consumed by the projection.
    pub fn in_features(&self) -> usize {
        self.in_features
    }

    /// Number of features produced by the projection.
    pub fn out_features(&self) -> usize {
        self.out_features
    }

    /// Returns the weight tensor.
    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    /// Applies the projection to `hidden`.
    pub fn forward(&self, hidden: &Tensor) -> Result<Tensor> {
        checks::expect_features("linear.input", hidden, self.in_features)?;

        let dtype = hidden.dtype();
        let weight = checks::cast_to(&self.weight, dtype)?;
        let mut out_dims = hidden.dims().to_vec();
        let rows = hidden.elem_count() / self.in_features;
        if let Some(last) = out_dims.last_mut() {
            *last = self.out_features;
        }

        let flat = hidden.reshape((rows, self.in_features))?;
        let mut output = flat.matmul(&weight.t()?)?;
        if let Some(bias) = &self.bias {
            let bias = checks::cast_to(bias, dtype)?;
            output = output.broadcast_add(&bias)?;
        }
        Ok(output.reshape(out_dims)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LayerError;
    use candle_core::{DType, Device};

    #[test]
    fn projection_matches_manual_matmul() -> Result<()> {
        let device = Device::Cpu;
        let weight = Tensor::from_vec(vec![1f32, 0., 2., 0., 1., -1.], (2, 3), &device)?;
        let bias = Tensor::from_vec(vec![0.5f32, -0.5], 2, &device)?;
        let linear = Linear::new(weight, Some(bias))?;

        let input = Tensor::from_vec(vec![1f32, 2., 3., -1., 0., 1.], (2, 3), &device)?;
        let out = linear.forward(&input)?.to_vec2::<f32>()?;

        assert_eq!(out, vec![vec![7.5, -1.5], vec![1.5, -1.5]]);
        Ok(())
    }

    #[test]
    fn leading_dimensions_are_preserved() -> Result<()> {
        let device = Device::Cpu;
        let linear = Linear::new(Tensor::ones((5, 4), DType::F32, &device)?, None)?;
        let input = Tensor::ones((2, 3, 4), DType::F32, &device)?;
        let out = linear.forward(&input)?;
        assert_eq!(out.dims(), &[2, 3, 5]);
        Ok(())
    }

    #[test]
    fn half_precision_weights_follow_activation_dtype() -> Result<()> {
        let device = Device::Cpu;
        let weight = Tensor::ones((2, 2), DType::F16, &device)?;
        let linear = Linear::new(weight, None)?;
        let out = linear.forward(&Tensor::ones((1, 2), DType::F32, &device)?)?;
        assert_eq!(out.dtype(), DType::F32);
        assert_eq!(out.to_vec2::<f32>()?, vec![vec![2.0, 2.0]]);
        Ok(())
    }

    #[test]
    fn bias_shape_is_validated() {
        let device = Device::Cpu;
        let weight = Tensor::ones((2, 3), DType::F32, &device).unwrap();
        let bias = Tensor::ones(3, DType::F32, &device).unwrap();
        assert!(matches!(
            Linear::new(weight, Some(bias)),
            Err(LayerError::Shape { .. })
        ));
    }

    #[test]
    fn input_feature_mismatch_is_rejected() {
        let device = Device::Cpu;
        let linear = Linear::new(Tensor::ones((2, 3), DType::F32, &device).unwrap(), None).unwrap();
        let input = Tensor::ones((1, 4), DType::F32, &device).unwrap();
        assert!(linear.forward(&input).is_err());
    }
}
