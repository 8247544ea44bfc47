//! Integration with rotary position embedding utilities.
//!
//! The adapter pairs one [`Rope`] with the optional per-layer frequency
//! factors of a checkpoint, so live query/key encoding and the re-rotation of
//! cached keys go through the exact same parameters.

use candle_core::{Result, Tensor};
use embedding::positional::rope::Rope;

use crate::core::{to_backend_err, AttentionError};
use crate::kv_cache::KeyShift;

/// Adapter that bridges attention and the cache with the positional embedding crate.
#[derive(Debug, Clone)]
pub struct RopeAdapter {
    rope: Rope,
    layer_factors: Vec<Option<Tensor>>,
}

impl RopeAdapter {
    /// `layer_factors[i]` holds the frequency factors of layer `i`, if any.
    /// Layers past the end of the vector use unit factors.
    pub fn new(rope: Rope, layer_factors: Vec<Option<Tensor>>) -> Self {
        Self {
            rope,
            layer_factors,
        }
    }

    pub fn rope(&self) -> &Rope {
        &self.rope
    }

    pub fn factors(&self, layer: usize) -> Option<&Tensor> {
        self.layer_factors.get(layer).and_then(Option::as_ref)
    }

    /// Rotate `x` shaped `[rows, heads, head_dim]` to the per-row `positions`
    /// using the factors of `layer`.
    pub fn apply(&self, layer: usize, x: &Tensor, positions: &Tensor) -> Result<Tensor> {
        self.rope.apply(x, positions, self.factors(layer))
    }
}

impl KeyShift for RopeAdapter {
    fn shift(&self, layer: usize, key: &Tensor, delta: i64) -> std::result::Result<Tensor, AttentionError> {
        let rows = key.dim(0).map_err(to_backend_err)?;
        let offsets = Tensor::full(delta, rows, key.device()).map_err(to_backend_err)?;
        self.apply(layer, key, &offsets).map_err(to_backend_err)
    }
}
