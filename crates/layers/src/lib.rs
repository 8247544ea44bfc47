//! Building blocks for decoder layers.
//!
//! Every layer here is a thin, stateless applier of loaded weight tensors to a
//! hidden state shaped `(batch, features)`, where `batch` counts the token
//! positions processed in one forward call. Weights are immutable after
//! construction and may be shared across concurrent forward calls.

pub mod activations;
pub mod checks;
pub mod linear;
pub mod mlp;
pub mod norm;

use thiserror::Error;

pub use linear::Linear;
pub use mlp::FeedForward;
pub use norm::RmsNorm;

/// Errors raised while assembling or applying a layer.
#[derive(Debug, Error)]
pub enum LayerError {
    /// A weight or input tensor does not have the layout the layer expects.
    #[error("{context}: expected shape {expected:?}, got {actual:?}")]
    Shape {
        context: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    /// The tensor dtype cannot be used by this layer.
    #[error("{context}: unsupported dtype {dtype:?}")]
    UnsupportedDType {
        context: &'static str,
        dtype: candle_core::DType,
    },
    /// Failure reported by the tensor backend.
    #[error(transparent)]
    Backend(#[from] candle_core::Error),
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, LayerError>;
