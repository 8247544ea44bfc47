//! Lightweight validation helpers shared across layer components.
//!
//! Each helper names the tensor it inspects so failures point at the offending
//! weight (`blk.3.self_attn.q_proj` style contexts are passed by callers).

use candle_core::{DType, Tensor};

use crate::{LayerError, Result};

/// Ensures a tensor matches the expected dimensions exactly.
pub fn expect_shape(context: &'static str, tensor: &Tensor, expected: &[usize]) -> Result<()> {
    if tensor.dims() == expected {
        Ok(())
    } else {
        Err(LayerError::Shape {
            context,
            expected: expected.to_vec(),
            actual: tensor.dims().to_vec(),
        })
    }
}

/// Ensures a tensor is a matrix and returns its `(rows, cols)`.
pub fn expect_matrix(context: &'static str, tensor: &Tensor) -> Result<(usize, usize)> {
    match tensor.dims() {
        [rows, cols] => Ok((*rows, *cols)),
        other => Err(LayerError::Shape {
            context,
            expected: vec![0, 0],
            actual: other.to_vec(),
        }),
    }
}

/// Validates that the trailing dimension of `tensor` equals `features`.
pub fn expect_features(context: &'static str, tensor: &Tensor, features: usize) -> Result<()> {
    match tensor.dims().last() {
        Some(&last) if last == features => Ok(()),
        _ => Err(LayerError::Shape {
            context,
            expected: vec![features],
            actual: tensor.dims().to_vec(),
        }),
    }
}

/// Checks the tensor holds floating point data usable as a weight.
pub fn expect_float(context: &'static str, tensor: &Tensor) -> Result<()> {
    match tensor.dtype() {
        DType::F16 | DType::BF16 | DType::F32 | DType::F64 => Ok(()),
        dtype => Err(LayerError::UnsupportedDType { context, dtype }),
    }
}

/// Casts `tensor` to `dtype`, skipping the copy when it already matches.
pub fn cast_to(tensor: &Tensor, dtype: DType) -> Result<Tensor> {
    if tensor.dtype() == dtype {
        Ok(tensor.clone())
    } else {
        Ok(tensor.to_dtype(dtype)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn shape_mismatch_reports_context() {
        let tensor = Tensor::zeros((2, 3), DType::F32, &Device::Cpu).unwrap();
        let err = expect_shape("norm.weight", &tensor, &[3]).unwrap_err();
        assert!(err.to_string().starts_with("norm.weight"));
    }

    #[test]
    fn integer_weights_are_rejected() {
        let tensor = Tensor::zeros(4, DType::U32, &Device::Cpu).unwrap();
        assert!(matches!(
            expect_float("linear.weight", &tensor),
            Err(LayerError::UnsupportedDType { .. })
        ));
    }
}
