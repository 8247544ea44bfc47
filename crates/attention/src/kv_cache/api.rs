//! Public traits describing key/value cache behaviour.

use candle_core::Tensor;

use crate::core::AttentionError;

/// Per-sequence cache of projected keys and values, driven layer by layer
/// during one forward call.
///
/// A forward call runs `start_forward`, then for every layer in order
/// `set_layer`, `append`, `attend`, and finishes with either `commit` or
/// `rollback`.
pub trait KeyValueCache {
    /// Record the absolute positions of the rows about to be processed.
    ///
    /// Positions must be contiguous and continue directly after the newest
    /// cached position. Nothing is mutated when validation fails.
    fn start_forward(&mut self, positions: &[usize]) -> Result<(), AttentionError>;

    /// Select the layer subsequent `append`/`attend` calls operate on.
    ///
    /// During a forward call layers must be selected in order, each once.
    fn set_layer(&mut self, layer: usize) -> Result<(), AttentionError>;

    /// Append keys and values shaped `[rows, num_kv_heads, head_dim]` to the
    /// active layer.
    fn append(&mut self, key: &Tensor, value: &Tensor) -> Result<(), AttentionError>;

    /// Causal attention of `query` (`[rows, num_heads, head_dim]`) against every
    /// key stored for the active layer. Returns a tensor shaped like `query`.
    fn attend(&self, query: &Tensor, scale: f64) -> Result<Tensor, AttentionError>;

    /// Accept everything appended since `start_forward`.
    ///
    /// Fails, and rolls the call back, unless every layer received rows.
    fn commit(&mut self) -> Result<(), AttentionError>;

    /// Drop everything appended since `start_forward`.
    fn rollback(&mut self);
}

/// Re-encodes the rotary phase of cached keys.
///
/// Implemented by the model, which owns the rotary parameters used when the
/// keys were first encoded.
pub trait KeyShift {
    /// Rotate `key` (`[rows, num_kv_heads, head_dim]`) of `layer` by `delta`
    /// positions.
    fn shift(&self, layer: usize, key: &Tensor, delta: i64) -> Result<Tensor, AttentionError>;
}
