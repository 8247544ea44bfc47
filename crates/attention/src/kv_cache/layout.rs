//! Layout definitions for key/value caches.
//!
//! Cached tensors are stored per layer as `[len, num_kv_heads, head_dim]`,
//! ordered by position along the leading dimension.

use crate::core::AttentionError;

/// Declarative description of a cache layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLayout {
    /// Number of decoder layers holding their own key/value sequence.
    pub num_layers: usize,
    /// Number of key/value heads stored per row.
    pub num_kv_heads: usize,
    /// Dimensionality of each head.
    pub head_dim: usize,
}

impl CacheLayout {
    pub fn new(
        num_layers: usize,
        num_kv_heads: usize,
        head_dim: usize,
    ) -> Result<Self, AttentionError> {
        if num_layers == 0 || num_kv_heads == 0 || head_dim == 0 {
            return Err(AttentionError::InvalidShape {
                context: format!(
                    "cache layout requires non-zero sizes, got layers={num_layers} kv_heads={num_kv_heads} head_dim={head_dim}"
                ),
            });
        }
        Ok(Self {
            num_layers,
            num_kv_heads,
            head_dim,
        })
    }
}
