//! Portable, exact implementations of grouped-query attention.
//!
//! These paths favour clarity over absolute performance and serve as the
//! baseline the cache attends through.

pub mod exact;

pub use exact::{repeat_kv, ExactAttention};
