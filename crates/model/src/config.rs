use embedding::positional::rope::RopeConfig;

use crate::error::{ModelError, Result};
use crate::loader::ConfigSource;

const DEFAULT_EPS: f64 = 1e-5;
const DEFAULT_ROPE_BASE: f32 = 10_000.0;
const DEFAULT_ROPE_SCALE: f32 = 1.0;

/// Hyperparameters shared by every layer of a decoder stack, fixed at
/// construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    pub block_count: usize,
    pub hidden_size: usize,
    pub num_heads: usize,
    pub num_kv_heads: usize,
    pub head_dim: usize,
    /// Whether `head_dim` came from `attention.key_length` rather than
    /// `hidden_size / num_heads`.
    pub explicit_head_dim: bool,
    pub eps: f64,
    pub rope_base: f32,
    pub rope_scale: f32,
    pub rope_dim: usize,
    /// Vocabulary size from the tokenizer list, zero when absent. Replaced by the
    /// embedding row count once weights are attached.
    pub vocab_size: usize,
}

impl Options {
    /// Resolves options from model metadata, applying defaults for optional
    /// keys, and validates the result.
    pub fn from_config(cfg: &dyn ConfigSource) -> Result<Self> {
        let block_count = require_uint(cfg, "block_count")?;
        let hidden_size = require_uint(cfg, "embedding_length")?;
        let num_heads = require_uint(cfg, "attention.head_count")?;
        let num_kv_heads = cfg
            .uint("attention.head_count_kv")
            .map(|v| v as usize)
            .unwrap_or(num_heads);

        let explicit = cfg
            .uint("attention.key_length")
            .map(|v| v as usize)
            .filter(|&v| v > 0);
        let head_dim = match explicit {
            Some(head_dim) => head_dim,
            None => {
                if num_heads == 0 || hidden_size % num_heads != 0 {
                    return Err(ModelError::Config(format!(
                        "embedding_length ({hidden_size}) must be divisible by attention.head_count ({num_heads}) when attention.key_length is absent"
                    )));
                }
                hidden_size / num_heads
            }
        };

        let rope_dim = cfg
            .uint("rope.dimension_count")
            .map(|v| v as usize)
            .filter(|&v| v > 0)
            .unwrap_or(head_dim);

        let options = Self {
            block_count,
            hidden_size,
            num_heads,
            num_kv_heads,
            head_dim,
            explicit_head_dim: explicit.is_some(),
            eps: cfg
                .float("attention.layer_norm_rms_epsilon")
                .unwrap_or(DEFAULT_EPS),
            rope_base: cfg
                .float("rope.freq_base")
                .map(|v| v as f32)
                .unwrap_or(DEFAULT_ROPE_BASE),
            rope_scale: cfg
                .float("rope.freq_scale")
                .map(|v| v as f32)
                .unwrap_or(DEFAULT_ROPE_SCALE),
            rope_dim,
            vocab_size: cfg
                .strings("tokenizer.ggml.tokens")
                .map_or(0, |tokens| tokens.len()),
        };
        options.validate()?;
        Ok(options)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.block_count == 0 {
            return Err(ModelError::Config("block_count must be greater than zero".into()));
        }
        if self.hidden_size == 0 {
            return Err(ModelError::Config(
                "embedding_length must be greater than zero".into(),
            ));
        }
        if self.num_heads == 0 {
            return Err(ModelError::Config(
                "attention.head_count must be greater than zero".into(),
            ));
        }
        if self.num_kv_heads == 0 {
            return Err(ModelError::Config(
                "attention.head_count_kv must be greater than zero".into(),
            ));
        }
        if self.num_heads % self.num_kv_heads != 0 {
            return Err(ModelError::Config(format!(
                "attention.head_count ({}) must be a multiple of attention.head_count_kv ({})",
                self.num_heads, self.num_kv_heads
            )));
        }
        if self.head_dim == 0 {
            return Err(ModelError::Config("head dim must be greater than zero".into()));
        }
        if self.rope_dim % 2 != 0 || self.rope_dim > self.head_dim {
            return Err(ModelError::Config(format!(
                "rope.dimension_count ({}) must be even and at most the head dim ({})",
                self.rope_dim, self.head_dim
            )));
        }
        if !(self.eps.is_finite() && self.eps > 0.0) {
            return Err(ModelError::Config(format!(
                "attention.layer_norm_rms_epsilon must be positive, got {}",
                self.eps
            )));
        }
        if !(self.rope_base.is_finite() && self.rope_base > 0.0) {
            return Err(ModelError::Config(format!(
                "rope.freq_base must be positive, got {}",
                self.rope_base
            )));
        }
        if !(self.rope_scale.is_finite() && self.rope_scale > 0.0) {
            return Err(ModelError::Config(format!(
                "rope.freq_scale must be positive, got {}",
                self.rope_scale
            )));
        }
        Ok(())
    }

    /// Width of the concatenated query heads.
    pub fn q_dim(&self) -> usize {
        self.num_heads * self.head_dim
    }

    /// Width of the concatenated key (or value) heads.
    pub fn kv_dim(&self) -> usize {
        self.num_kv_heads * self.head_dim
    }

    /// Query heads served by each key/value head.
    pub fn group_size(&self) -> usize {
        self.num_heads / self.num_kv_heads
    }

    pub fn rope_config(&self) -> RopeConfig {
        RopeConfig {
            head_dim: self.head_dim,
            rope_theta: self.rope_base,
            rotate_dim: Some(self.rope_dim),
            freq_scale: self.rope_scale,
        }
    }
}

fn require_uint(cfg: &dyn ConfigSource, key: &str) -> Result<usize> {
    cfg.uint(key)
        .map(|v| v as usize)
        .ok_or_else(|| ModelError::Config(format!("missing required key {key}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::Metadata;

    fn base() -> Metadata {
        Metadata::new()
            .with("block_count", 2usize)
            .with("embedding_length", 16usize)
            .with("attention.head_count", 4usize)
    }

    #[test]
    fn defaults_fill_optional_keys() -> Result<()> {
        let options = Options::from_config(&base())?;
        assert_eq!(options.num_kv_heads, 4);
        assert_eq!(options.head_dim, 4);
        assert!(!options.explicit_head_dim);
        assert_eq!(options.rope_dim, 4);
        assert_eq!(options.eps, 1e-5);
        assert_eq!(options.rope_base, 10_000.0);
        assert_eq!(options.rope_scale, 1.0);
        Ok(())
    }

    #[test]
    fn explicit_key_length_overrides_derived_head_dim() -> Result<()> {
        let meta = base()
            .with("attention.key_length", 8usize)
            .with("rope.dimension_count", 6usize);
        let options = Options::from_config(&meta)?;
        assert_eq!(options.head_dim, 8);
        assert!(options.explicit_head_dim);
        assert_eq!(options.q_dim(), 32);
        assert_eq!(options.rope_config().rotate_dim, Some(6));
        Ok(())
    }

    #[test]
    fn kv_heads_must_divide_heads() {
        let meta = base().with("attention.head_count_kv", 3usize);
        let err = Options::from_config(&meta).unwrap_err();
        assert!(matches!(err, ModelError::Config(_)));
        assert!(err.to_string().contains("multiple"));
    }

    #[test]
    fn derived_head_dim_requires_divisibility() {
        let meta = base().with("embedding_length", 18usize);
        assert!(Options::from_config(&meta).is_err());
    }

    #[test]
    fn odd_or_oversized_rope_dim_is_rejected() {
        assert!(Options::from_config(&base().with("rope.dimension_count", 3usize)).is_err());
        assert!(Options::from_config(&base().with("rope.dimension_count", 6usize)).is_err());
    }

    #[test]
    fn missing_required_key_names_the_key() {
        let mut meta = base();
        meta.remove("embedding_length");
        let err = Options::from_config(&meta).unwrap_err();
        assert!(err.to_string().contains("embedding_length"));
    }
}
