//! Core traits and types shared across attention implementations.
//!
//! Implementations operate on queries shaped `[q_len, num_heads, head_dim]`
//! and keys/values shaped `[k_len, num_kv_heads, head_dim]`. The output
//! mirrors the query layout and dtype, and reductions accumulate in `f32`.

pub mod errors;

use candle_core::Tensor;

pub use errors::{to_backend_err, AttentionError};

/// Unified interface for attention kernels.
///
/// * `num_heads` must be a multiple of `num_kv_heads`; each key/value head
///   serves a contiguous group of query heads.
/// * Masks, when present, are additive and shaped `[q_len, k_len]`; they are
///   shared by every head.
/// * A query row whose mask discards every key produces a zero output row.
pub trait Attention {
    /// Compute scaled-dot-product attention with an optional additive mask.
    fn attend(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        mask: Option<&Tensor>,
        scale: f64,
    ) -> Result<Tensor, AttentionError>;
}
