//! Gated feed-forward block (SwiGLU).
//!
//! Computes `down(silu(gate(x)) ⊙ up(x))`. The block is a pure function of its
//! input and three projections; it never touches the attention cache.

use candle_core::Tensor;

use crate::{activations, linear::Linear, LayerError, Result};

/// Gate/up/down projections of a gated linear unit.
#[derive(Debug, Clone)]
pub struct FeedForward {
    gate: Linear,
    up: Linear,
    down: Linear,
}

impl FeedForward {
    /// Assembles the block, checking the three projections agree on sizes.
    pub fn new(gate: Linear, up: Linear, down: Linear) -> Result<Self> {
        if gate.in_features() != up.in_features() || gate.out_features() != up.out_features() {
            return Err(LayerError::Shape {
                context: "mlp.up_proj",
                expected: vec![gate.out_features(), gate.in_features()],
                actual: vec![up.out_features(), up.in_features()],
            });
        }
        if down.in_features() != gate.out_features() || down.out_features() != gate.in_features()
        {
            return Err(LayerError::Shape {
                context: "mlp.down_proj",
                expected: vec![gate.in_features(), gate.out_features()],
                actual: vec![down.out_features(), down.in_features()],
            });
        }
        Ok(Self { gate, up, down })
    }

    /// Model hidden size consumed and produced by the block.
    pub fn hidden_size(&self) -> usize {
        self.gate.in_features()
    }

    /// Width of the gated intermediate activation.
    pub fn intermediate_size(&self) -> usize {
        self.gate.out_features()
    }

    /// Forward pass through the gated unit.
    pub fn forward(&self, hidden: &Tensor) -> Result<Tensor> {
        let gated = activations::silu(&self.gate.forward(hidden)?)?;
        let hidden = gated.mul(&self.up.forward(hidden)?)?;
        self.down.forward(&hidden)
    }
}
