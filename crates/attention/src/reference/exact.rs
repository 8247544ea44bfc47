//! Reference CPU-friendly attention kernel.
//!
//! The exact path prioritises numerical fidelity and mirrors the semantics
//! described by the [`Attention`](crate::core::Attention) trait.

use std::sync::OnceLock;

use candle_core::{DType, Result as CandleResult, Tensor};
use candle_nn::ops::softmax_last_dim;

use crate::core::{to_backend_err, Attention, AttentionError};
use crate::masks::MASK_DTYPE;

/// Numerically stable, portable grouped-query attention kernel.
#[derive(Debug, Default)]
pub struct ExactAttention {
    first_call: OnceLock<()>,
}

impl ExactAttention {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalised attention weights shaped `[num_heads, q_len, k_len]`, in `f32`.
    ///
    /// Rows whose mask discards every key are returned as zeros instead of
    /// the NaNs a plain softmax would produce.
    pub fn weights(
        &self,
        q: &Tensor,
        k: &Tensor,
        mask: Option<&Tensor>,
        scale: f64,
    ) -> Result<Tensor, AttentionError> {
        let (q_len, heads, head_dim) = dims3(q, "q must have shape [q_len, heads, head_dim]")?;
        let (k_len, kv_heads, kd) = dims3(k, "k must have shape [k_len, kv_heads, head_dim]")?;
        if kd != head_dim {
            return Err(AttentionError::InvalidShape {
                context: format!("k head_dim {kd} does not match q head_dim {head_dim}"),
            });
        }
        let n_rep = group_size(heads, kv_heads)?;

        let q_work = q
            .to_dtype(DType::F32)
            .and_then(|t| t.transpose(0, 1))
            .and_then(|t| t.contiguous())
            .map_err(to_backend_err)?;
        let k_work = k
            .to_dtype(DType::F32)
            .and_then(|t| t.transpose(0, 1))
            .and_then(|t| repeat_kv(&t, n_rep))
            .map_err(to_backend_err)?;

        let scores = q_work
            .matmul(&k_work.t().map_err(to_backend_err)?)
            .and_then(|s| s.affine(scale, 0.0))
            .map_err(to_backend_err)?;

        let Some(mask) = mask else {
            return softmax_last_dim(&scores).map_err(to_backend_err);
        };

        if !q.device().same_device(mask.device()) {
            return Err(AttentionError::InvalidShape {
                context: "mask must reside on the same device as q".to_string(),
            });
        }
        if mask.dtype() != MASK_DTYPE {
            return Err(AttentionError::InvalidShape {
                context: format!("mask expects dtype {MASK_DTYPE:?}, got {:?}", mask.dtype()),
            });
        }
        let (mq, mk) = mask.dims2().map_err(|_| AttentionError::InvalidShape {
            context: "mask must have shape [q_len, k_len]".to_string(),
        })?;
        if mq != q_len || mk != k_len {
            return Err(AttentionError::InvalidShape {
                context: format!("mask shape mismatch: expected [{q_len}, {k_len}] got [{mq}, {mk}]"),
            });
        }

        let rows = mask.to_vec2::<f32>().map_err(to_backend_err)?;
        let live: Vec<f32> = rows
            .iter()
            .map(|row| {
                if row.iter().any(|v| *v != f32::NEG_INFINITY) {
                    1.0
                } else {
                    0.0
                }
            })
            .collect();

        if live.iter().all(|&l| l == 1.0) {
            let probs = scores
                .broadcast_add(mask)
                .and_then(|s| softmax_last_dim(&s))
                .map_err(to_backend_err)?;
            return Ok(probs);
        }

        // Neutralise fully masked rows before the softmax, then zero them.
        let sanitized: Vec<f32> = rows
            .iter()
            .zip(live.iter())
            .flat_map(|(row, &l)| row.iter().map(move |&v| if l == 1.0 { v } else { 0.0 }))
            .collect();
        let device = q.device();
        let sanitized = Tensor::from_vec(sanitized, (q_len, k_len), device).map_err(to_backend_err)?;
        let live = Tensor::from_vec(live, (1, q_len, 1), device).map_err(to_backend_err)?;
        scores
            .broadcast_add(&sanitized)
            .and_then(|s| softmax_last_dim(&s))
            .and_then(|p| p.broadcast_mul(&live))
            .map_err(to_backend_err)
    }
}

impl Attention for ExactAttention {
    fn attend(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        mask: Option<&Tensor>,
        scale: f64,
    ) -> Result<Tensor, AttentionError> {
        let device = q.device();
        if !device.same_device(k.device()) || !device.same_device(v.device()) {
            return Err(AttentionError::InvalidShape {
                context: "q, k, v must reside on the same device".to_string(),
            });
        }

        let dtype = q.dtype();
        if dtype != k.dtype() || dtype != v.dtype() {
            return Err(AttentionError::InvalidShape {
                context: "q, k, v must share the same dtype".to_string(),
            });
        }

        let (q_len, heads, head_dim) = dims3(q, "q must have shape [q_len, heads, head_dim]")?;
        let (k_len, kv_heads, kd) = dims3(k, "k must have shape [k_len, kv_heads, head_dim]")?;
        let (vk, vh, vd) = dims3(v, "v must have shape [k_len, kv_heads, head_dim]")?;
        if vk != k_len || vh != kv_heads || vd != kd {
            return Err(AttentionError::InvalidShape {
                context: format!(
                    "v shape mismatch: expected [{k_len}, {kv_heads}, {kd}] got [{vk}, {vh}, {vd}]"
                ),
            });
        }

        if self.first_call.set(()).is_ok() {
            log::info!(
                "attention::reference init heads={} kv_heads={} head_dim={} dtype={:?}",
                heads,
                kv_heads,
                head_dim,
                dtype
            );
        }

        if k_len == 0 {
            return Tensor::zeros((q_len, heads, head_dim), dtype, device).map_err(to_backend_err);
        }

        let probs = self.weights(q, k, mask, scale)?;
        let n_rep = group_size(heads, kv_heads)?;
        let v_work = v
            .to_dtype(DType::F32)
            .and_then(|t| t.transpose(0, 1))
            .and_then(|t| repeat_kv(&t, n_rep))
            .map_err(to_backend_err)?;

        probs
            .matmul(&v_work)
            .and_then(|o| o.transpose(0, 1))
            .and_then(|o| o.contiguous())
            .and_then(|o| o.to_dtype(dtype))
            .map_err(to_backend_err)
    }
}

/// Expand `[kv_heads, len, head_dim]` to `[kv_heads * n_rep, len, head_dim]`
/// so that head `h` reads key/value head `h / n_rep`.
pub fn repeat_kv(x: &Tensor, n_rep: usize) -> CandleResult<Tensor> {
    if n_rep == 1 {
        return x.contiguous();
    }
    let (kv_heads, len, head_dim) = x.dims3()?;
    x.unsqueeze(1)?
        .broadcast_as((kv_heads, n_rep, len, head_dim))?
        .contiguous()?
        .reshape((kv_heads * n_rep, len, head_dim))
}

fn dims3(t: &Tensor, context: &str) -> Result<(usize, usize, usize), AttentionError> {
    t.dims3().map_err(|_| AttentionError::InvalidShape {
        context: format!("{context}, got {:?}", t.dims()),
    })
}

fn group_size(heads: usize, kv_heads: usize) -> Result<usize, AttentionError> {
    if kv_heads == 0 || heads % kv_heads != 0 {
        return Err(AttentionError::InvalidShape {
            context: format!("num_heads {heads} must be a multiple of num_kv_heads {kv_heads}"),
        });
    }
    Ok(heads / kv_heads)
}
