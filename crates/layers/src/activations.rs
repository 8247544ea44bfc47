//! Activation functions used by gated feed-forward stacks.
//!
//! Activations return tensors with the same layout as their input. They
//! evaluate in at least `f32` precision and cast the result back so
//! half-precision activations lose no accuracy inside the non-linearity.

use candle_core::{DType, Tensor};

use crate::{checks, Result};

/// SiLU (swish): `x · sigmoid(x)`.
pub fn silu(input: &Tensor) -> Result<Tensor> {
    let dtype = input.dtype();
    let compute = checks::cast_to(input, widen(dtype))?;
    checks::cast_to(&compute.silu()?, dtype)
}

fn widen(dtype: DType) -> DType {
    match dtype {
        DType::F16 | DType::BF16 => DType::F32,
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn silu_matches_swish_reference() -> Result<()> {
        let device = Device::Cpu;
        let input = Tensor::from_slice(&[-3.0f32, -1.0, 0.0, 0.5, 2.0], (5,), &device)?;
        let output = silu(&input)?;

        let one = Tensor::ones_like(&input)?;
        let neg = input.affine(-1.0, 0.0)?;
        let denom = (one.clone() + neg.exp()?)?;
        let sigmoid = one.broadcast_div(&denom)?;
        let reference = input.mul(&sigmoid)?;
        let diff = output.sub(&reference)?.abs()?.max_all()?.to_vec0::<f32>()?;
        assert!(diff < 5e-6);
        Ok(())
    }

    #[test]
    fn silu_preserves_half_precision_dtype() -> Result<()> {
        let device = Device::Cpu;
        let input = Tensor::from_slice(&[1.0f32, -1.0], (2,), &device)?.to_dtype(DType::BF16)?;
        assert_eq!(silu(&input)?.dtype(), DType::BF16);
        Ok(())
    }
}
