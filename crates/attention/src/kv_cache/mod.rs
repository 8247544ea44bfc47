//! Interfaces and helpers for key/value cache management.
//!
//! Attention implementations use these utilities to persist incremental
//! context across decoding steps.

pub mod api;
pub mod causal;
pub mod layout;

pub use api::{KeyShift, KeyValueCache};
pub use causal::CausalCache;
pub use layout::CacheLayout;
