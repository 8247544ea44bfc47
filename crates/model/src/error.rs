use attention::AttentionError;
use layers::LayerError;
use thiserror::Error;

/// Errors raised while building or running a decoder model.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Unsupported family, missing scalar or tensor, or invalid hyperparameters.
    #[error("config error: {0}")]
    Config(String),
    /// Batch vectors or weight tensors disagree with the model geometry.
    #[error("shape error: {0}")]
    Shape(String),
    /// The cache was driven out of order or asked for a missing layer.
    #[error("cache state error: {0}")]
    CacheState(String),
    #[error(transparent)]
    Backend(#[from] candle_core::Error),
    #[error(transparent)]
    Attention(AttentionError),
    #[error(transparent)]
    Layer(#[from] LayerError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("metadata format error: {0}")]
    Format(#[from] serde_json::Error),
}

impl From<AttentionError> for ModelError {
    fn from(err: AttentionError) -> Self {
        match err {
            AttentionError::CacheState { context } => ModelError::CacheState(context),
            other => ModelError::Attention(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ModelError>;
