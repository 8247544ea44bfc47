//! Root-mean-square normalisation used by LLaMA-style decoder blocks.
//!
//! Normalisation happens along the trailing feature axis. Statistics are
//! always accumulated in `f32` and the result is cast back to the input dtype.

use candle_core::{DType, Tensor, D};

use crate::{checks, Result};

/// RMS normalisation with a learnable per-feature scale.
#[derive(Debug, Clone)]
pub struct RmsNorm {
    weight: Tensor,
    eps: f64,
}

impl RmsNorm {
    /// Wraps a loaded `(hidden_size,)` scale vector.
    pub fn new(weight: Tensor, eps: f64) -> Result<Self> {
        checks::expect_float("rms_norm.weight", &weight)?;
        let hidden = weight.elem_count();
        checks::expect_shape("rms_norm.weight", &weight, &[hidden])?;
        Ok(Self { weight, eps })
    }

    /// Size of the normalised feature axis.
    pub fn hidden_size(&self) -> usize {
        self.weight.elem_count()
    }

    /// Epsilon added to the mean square before the square root.
    pub fn eps(&self) -> f64 {
        self.eps
    }

    /// Computes `x / sqrt(mean(x²) + eps) * weight` over the last axis.
    pub fn forward(&self, hidden: &Tensor) -> Result<Tensor> {
        checks::expect_features("rms_norm.input", hidden, self.hidden_size())?;

        let dtype = hidden.dtype();
        let compute = hidden.to_dtype(DType::F32)?;
        let mean_square = compute.sqr()?.mean_keepdim(D::Minus1)?;
        let denom = (mean_square + self.eps)?.sqrt()?;
        let normalized = compute.broadcast_div(&denom)?;
        let weight = self.weight.to_dtype(DType::F32)?;
        let scaled = normalized.broadcast_mul(&weight)?;
        checks::cast_to(&scaled, dtype)
    }
}
