//! Builders for causal attention masks.
//!
//! The resulting tensors have dtype [`MASK_DTYPE`](super::MASK_DTYPE) and shape
//! `[q_len, k_len]`. Entries are `0.0` where attention is permitted and
//! `f32::NEG_INFINITY` otherwise.

use candle_core::{Device, Result, Tensor};

/// Construct a causal mask from absolute token positions.
///
/// Query `i` may attend key `j` iff `key_positions[j] <= query_positions[i]`.
/// Keys that came from earlier calls therefore remain visible, and keys
/// appended in the same call are hidden from earlier rows.
pub fn build_causal_mask(
    device: &Device,
    query_positions: &[usize],
    key_positions: &[usize],
) -> Result<Tensor> {
    let q_len = query_positions.len();
    let k_len = key_positions.len();
    let mut data = vec![0f32; q_len * k_len];

    for (q, &q_pos) in query_positions.iter().enumerate() {
        let row_start = q * k_len;
        for (k, &k_pos) in key_positions.iter().enumerate() {
            if k_pos > q_pos {
                data[row_start + k] = f32::NEG_INFINITY;
            }
        }
    }

    Tensor::from_vec(data, (q_len, k_len), device)
}
