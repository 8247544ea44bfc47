//! Causal self-attention primitives and the decoding key/value cache.
//!
//! Queries are laid out `[rows, num_heads, head_dim]` and keys/values
//! `[rows, num_kv_heads, head_dim]`, where a row is one token position of the
//! current call. Reductions are performed in `f32` and the output mirrors the
//! query dtype.
//!
//! Masks are built from absolute token positions rather than row indices, so
//! a query only sees cached keys at or before its own position regardless of
//! how many calls produced them. Grouped-query attention maps query head `h`
//! onto key/value head `h / (num_heads / num_kv_heads)`.

pub mod core;
pub mod interop;
pub mod kv_cache;
pub mod masks;
pub mod reference;

pub use core::{Attention, AttentionError};
pub use interop::RopeAdapter;
pub use kv_cache::{CacheLayout, CausalCache, KeyShift, KeyValueCache};
