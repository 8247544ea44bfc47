use std::fmt;

use attention::{KeyValueCache, RopeAdapter};
use candle_core::Tensor;
use layers::{FeedForward, Linear, RmsNorm};

use crate::config::Options;
use crate::error::{ModelError, Result};
use crate::loader::TensorSource;

pub(crate) fn require(tensors: &dyn TensorSource, name: &str) -> Result<Tensor> {
    tensors
        .tensor(name)
        .ok_or_else(|| ModelError::Config(format!("missing tensor {name}")))
}

/// Loads `{prefix}.weight` and the optional `{prefix}.bias`.
pub(crate) fn load_linear(tensors: &dyn TensorSource, prefix: &str) -> Result<Linear> {
    let weight = require(tensors, &format!("{prefix}.weight"))?;
    let bias = tensors.tensor(&format!("{prefix}.bias"));
    Ok(Linear::new(weight, bias)?)
}

pub(crate) fn load_norm(tensors: &dyn TensorSource, name: &str, options: &Options) -> Result<RmsNorm> {
    let norm = RmsNorm::new(require(tensors, name)?, options.eps)?;
    if norm.hidden_size() != options.hidden_size {
        return Err(ModelError::Shape(format!(
            "{name} has {} elements but embedding_length is {}",
            norm.hidden_size(),
            options.hidden_size
        )));
    }
    Ok(norm)
}

fn expect_projection(name: &str, linear: &Linear, in_features: usize, out_features: usize) -> Result<()> {
    if linear.in_features() != in_features || linear.out_features() != out_features {
        return Err(ModelError::Shape(format!(
            "{name} expected [{out_features}, {in_features}] but weight is [{}, {}]",
            linear.out_features(),
            linear.in_features()
        )));
    }
    Ok(())
}

/// Grouped-query self-attention over the per-sequence cache.
pub struct SelfAttention {
    query: Linear,
    key: Linear,
    value: Linear,
    output: Linear,
    num_heads: usize,
    num_kv_heads: usize,
    head_dim: usize,
}

impl fmt::Debug for SelfAttention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelfAttention")
            .field("num_heads", &self.num_heads)
            .field("num_kv_heads", &self.num_kv_heads)
            .field("head_dim", &self.head_dim)
            .finish()
    }
}

impl SelfAttention {
    pub fn load(tensors: &dyn TensorSource, prefix: &str, options: &Options) -> Result<Self> {
        let query = load_linear(tensors, &format!("{prefix}.self_attn.q_proj"))?;
        let key = load_linear(tensors, &format!("{prefix}.self_attn.k_proj"))?;
        let value = load_linear(tensors, &format!("{prefix}.self_attn.v_proj"))?;
        let output = load_linear(tensors, &format!("{prefix}.self_attn.o_proj"))?;

        let hidden = options.hidden_size;
        expect_projection("self_attn.q_proj", &query, hidden, options.q_dim())?;
        expect_projection("self_attn.k_proj", &key, hidden, options.kv_dim())?;
        expect_projection("self_attn.v_proj", &value, hidden, options.kv_dim())?;
        expect_projection("self_attn.o_proj", &output, options.q_dim(), hidden)?;

        Ok(Self {
            query,
            key,
            value,
            output,
            num_heads: options.num_heads,
            num_kv_heads: options.num_kv_heads,
            head_dim: options.head_dim,
        })
    }

    /// Attends `hidden` (`[rows, hidden_size]`) at `positions` against the
    /// cache's active layer, appending this call's keys and values first.
    pub fn forward(
        &self,
        layer: usize,
        hidden: &Tensor,
        positions: &Tensor,
        rope: &RopeAdapter,
        cache: &mut dyn KeyValueCache,
    ) -> Result<Tensor> {
        let (rows, _) = hidden.dims2()?;

        let q = self
            .query
            .forward(hidden)?
            .reshape((rows, self.num_heads, self.head_dim))?;
        let q = rope.apply(layer, &q, positions)?;

        let k = self
            .key
            .forward(hidden)?
            .reshape((rows, self.num_kv_heads, self.head_dim))?;
        let k = rope.apply(layer, &k, positions)?;

        let v = self
            .value
            .forward(hidden)?
            .reshape((rows, self.num_kv_heads, self.head_dim))?;

        cache.append(&k, &v)?;
        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let attended = cache.attend(&q, scale)?;

        let merged = attended.reshape((rows, self.num_heads * self.head_dim))?;
        Ok(self.output.forward(&merged)?)
    }
}

/// One pre-norm decoder layer: attention then gated feed-forward, each with
/// a residual connection.
#[derive(Debug)]
pub struct DecoderLayer {
    attention_norm: RmsNorm,
    attention: SelfAttention,
    mlp_norm: RmsNorm,
    mlp: FeedForward,
}

impl DecoderLayer {
    pub fn load(tensors: &dyn TensorSource, index: usize, options: &Options) -> Result<Self> {
        let prefix = format!("blk.{index}");
        let attention_norm = load_norm(tensors, &format!("{prefix}.input_layernorm.weight"), options)?;
        let attention = SelfAttention::load(tensors, &prefix, options)?;
        let mlp_norm = load_norm(
            tensors,
            &format!("{prefix}.post_attention_layernorm.weight"),
            options,
        )?;
        let mlp = FeedForward::new(
            load_linear(tensors, &format!("{prefix}.mlp.gate_proj"))?,
            load_linear(tensors, &format!("{prefix}.mlp.up_proj"))?,
            load_linear(tensors, &format!("{prefix}.mlp.down_proj"))?,
        )?;
        if mlp.hidden_size() != options.hidden_size {
            return Err(ModelError::Shape(format!(
                "{prefix}.mlp expects hidden size {} but embedding_length is {}",
                mlp.hidden_size(),
                options.hidden_size
            )));
        }
        Ok(Self {
            attention_norm,
            attention,
            mlp_norm,
            mlp,
        })
    }

    /// `h' = h + attn(norm(h))`, `h'' = h' + mlp(norm(h'))`.
    ///
    /// When `outputs` is given (final layer only), the attention output and
    /// its residual are gathered to those rows before the first residual add,
    /// so the feed-forward runs on the requested rows alone.
    pub fn forward(
        &self,
        layer: usize,
        hidden: &Tensor,
        positions: &Tensor,
        outputs: Option<&Tensor>,
        rope: &RopeAdapter,
        cache: &mut dyn KeyValueCache,
    ) -> Result<Tensor> {
        let mut residual = hidden.clone();

        let normed = self.attention_norm.forward(hidden)?;
        let mut attended = self
            .attention
            .forward(layer, &normed, positions, rope, cache)?;

        if let Some(rows) = outputs {
            attended = attended.index_select(rows, 0)?;
            residual = residual.index_select(rows, 0)?;
        }

        let hidden = attended.add(&residual)?;
        let normed = self.mlp_norm.forward(&hidden)?;
        let mlp_out = self.mlp.forward(&normed)?;
        Ok(mlp_out.add(&hidden)?)
    }
}
