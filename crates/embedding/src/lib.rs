//! Embedding crate
//!
//! `token` maps token ids to hidden vectors (and back, for tied read-out
//! heads); `positional` hosts the rotary position encoding applied to
//! attention queries and keys.

pub mod positional;
pub mod token;

pub use positional::*;
pub use token::*;
