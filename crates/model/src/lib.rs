//! Decoder-only transformer assembly.
//!
//! Weights and hyperparameters arrive through [`ConfigSource`] and
//! [`TensorSource`]; [`ModelRegistry`] picks the family from
//! `general.architecture`. A [`DecoderModel`] runs one [`Batch`] at a time
//! against a per-sequence [`attention::CausalCache`].

pub mod block;
pub mod config;
pub mod error;
pub mod input;
pub mod loader;
pub mod model;
pub mod registry;

pub use block::{DecoderLayer, SelfAttention};
pub use config::Options;
pub use error::{ModelError, Result};
pub use input::Batch;
pub use loader::{ConfigSource, Metadata, MetadataValue, TensorSource, WeightMap};
pub use model::{load_mistral, DecoderModel, Mistral};
pub use registry::{Constructor, ModelRegistry};
