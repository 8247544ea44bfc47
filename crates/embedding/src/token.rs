//! Token embedding lookup backed by a loaded weight matrix, with a tied
//! read-out head for checkpoints that do not ship a separate output
//! projection.

use candle_core::{bail, DType, Result, Tensor};

/// Token embedding table shaped `(vocab_size, hidden_dim)`.
#[derive(Debug, Clone)]
pub struct TokenEmbedding {
    weight: Tensor,
    vocab_size: usize,
    hidden_dim: usize,
}

impl TokenEmbedding {
    /// Wraps a loaded embedding matrix.
    pub fn new(weight: Tensor) -> Result<Self> {
        let (vocab_size, hidden_dim) = weight.dims2()?;
        if vocab_size == 0 {
            bail!("token embedding requires vocab_size > 0");
        }
        if hidden_dim == 0 {
            bail!("token embedding requires hidden_dim > 0");
        }
        Ok(Self {
            weight,
            vocab_size,
            hidden_dim,
        })
    }

    /// Number of rows in the table.
    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    /// Width of each embedding vector.
    pub fn hidden_dim(&self) -> usize {
        self.hidden_dim
    }

    /// Returns the underlying weight tensor.
    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    /// Looks up embeddings for a 1-D tensor of token ids.
    ///
    /// Returns `(len, hidden_dim)` in `f32`, regardless of the storage dtype
    /// of the table, so the decoder stack runs a single-precision activation
    /// stream.
    pub fn forward(&self, token_ids: &Tensor) -> Result<Tensor> {
        if token_ids.rank() != 1 {
            bail!(
                "token_ids must be 1-D, got shape {:?}",
                token_ids.dims()
            );
        }
        if !token_ids.dtype().is_int() {
            bail!(
                "token_ids expected integer dtype but received {:?}",
                token_ids.dtype()
            );
        }
        self.ensure_id_range(token_ids)?;

        let gathered = self.weight.index_select(token_ids, 0)?;
        gathered.to_dtype(DType::F32)
    }

    /// Applies the tied projection `hidden · Eᵀ`, producing
    /// `(rows, vocab_size)` logits.
    pub fn linear_out(&self, hidden: &Tensor) -> Result<Tensor> {
        let (rows, hidden_dim) = hidden.dims2()?;
        if hidden_dim != self.hidden_dim {
            bail!(
                "linear_out expected hidden dim {} but received {}",
                self.hidden_dim,
                hidden_dim
            );
        }
        let weight = self.weight.to_dtype(hidden.dtype())?;
        let logits = hidden.matmul(&weight.t()?)?;
        debug_assert_eq!(logits.dims(), &[rows, self.vocab_size]);
        Ok(logits)
    }

    fn ensure_id_range(&self, token_ids: &Tensor) -> Result<()> {
        if token_ids.elem_count() == 0 {
            return Ok(());
        }
        let ids = token_ids.to_dtype(DType::I64)?;
        let min_id = ids.min_all()?.to_scalar::<i64>()?;
        if min_id < 0 {
            bail!("encountered negative token id {}", min_id);
        }
        let max_id = ids.max_all()?.to_scalar::<i64>()?;
        if max_id >= self.vocab_size as i64 {
            bail!(
                "token id {} exceeds vocab size {}",
                max_id,
                self.vocab_size
            );
        }
        Ok(())
    }
}
