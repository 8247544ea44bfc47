use candle_core::{Device, Tensor};

use crate::error::{ModelError, Result};

/// One forward call's worth of tokens.
///
/// `inputs[i]` sits at absolute position `positions[i]`. `outputs` lists the
/// rows whose logits are wanted; an empty list requests every row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    pub inputs: Vec<u32>,
    pub positions: Vec<usize>,
    pub outputs: Vec<usize>,
}

impl Batch {
    pub fn new(inputs: Vec<u32>, positions: Vec<usize>, outputs: Vec<usize>) -> Self {
        Self {
            inputs,
            positions,
            outputs,
        }
    }

    /// Tokens at consecutive positions starting at `start`, requesting logits
    /// for the last one only.
    pub fn sequential(inputs: Vec<u32>, start: usize) -> Self {
        let positions = (start..start + inputs.len()).collect();
        let outputs = inputs.len().checked_sub(1).into_iter().collect();
        Self {
            inputs,
            positions,
            outputs,
        }
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        if self.inputs.is_empty() {
            return Err(ModelError::Shape("batch must contain at least one token".into()));
        }
        if self.positions.len() != self.inputs.len() {
            return Err(ModelError::Shape(format!(
                "batch has {} inputs but {} positions",
                self.inputs.len(),
                self.positions.len()
            )));
        }
        if let Some(&row) = self.outputs.iter().find(|&&row| row >= self.inputs.len()) {
            return Err(ModelError::Shape(format!(
                "output row {row} out of range for batch of {}",
                self.inputs.len()
            )));
        }
        Ok(())
    }

    /// Whether the last layer should gather a subset of rows.
    pub fn prunes_outputs(&self) -> bool {
        !self.outputs.is_empty()
    }

    /// Number of logit rows a forward call produces.
    pub fn num_outputs(&self) -> usize {
        if self.outputs.is_empty() {
            self.inputs.len()
        } else {
            self.outputs.len()
        }
    }

    pub fn input_tensor(&self, device: &Device) -> Result<Tensor> {
        Ok(Tensor::new(self.inputs.as_slice(), device)?)
    }

    pub fn position_tensor(&self, device: &Device) -> Result<Tensor> {
        let positions: Vec<i64> = self.positions.iter().map(|&p| p as i64).collect();
        Ok(Tensor::new(positions.as_slice(), device)?)
    }

    /// `None` when every row is requested.
    pub fn output_tensor(&self, device: &Device) -> Result<Option<Tensor>> {
        if self.outputs.is_empty() {
            return Ok(None);
        }
        let rows: Vec<u32> = self.outputs.iter().map(|&r| r as u32).collect();
        Ok(Some(Tensor::new(rows.as_slice(), device)?))
    }
}
