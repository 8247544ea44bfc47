use std::fmt;

use attention::{
    AttentionError, CacheLayout, CausalCache, KeyShift, KeyValueCache, RopeAdapter,
};
use candle_core::{Device, Tensor};
use embedding::positional::rope::{scaling_fingerprint, Rope};
use embedding::token::TokenEmbedding;
use layers::{Linear, RmsNorm};

use crate::block::{load_linear, load_norm, require, DecoderLayer};
use crate::config::Options;
use crate::error::{ModelError, Result};
use crate::input::Batch;
use crate::loader::{ConfigSource, TensorSource};

/// A decoder-only language model that turns a [`Batch`] into next-token
/// logits while growing a per-sequence cache.
///
/// Implementations are immutable after construction, so one model can serve
/// many sequences, each with its own cache.
pub trait DecoderModel: KeyShift + Send + Sync {
    /// Architecture family name, e.g. `"mistral"`.
    fn family(&self) -> &str;

    fn options(&self) -> &Options;

    /// Creates an empty cache shaped for this model.
    fn new_cache(&self) -> Result<CausalCache>;

    /// Runs one forward call and returns logits shaped
    /// `[batch.num_outputs(), vocab_size]`.
    ///
    /// The cache receives every row of the batch on success and is left
    /// untouched on failure.
    fn forward(&self, cache: &mut dyn KeyValueCache, batch: &Batch) -> Result<Tensor>;
}

enum OutputProjection {
    Dedicated(Linear),
    /// Reuses the token embedding matrix as the read-out head.
    Tied,
}

/// Mistral/Llama-style decoder stack.
pub struct Mistral {
    options: Options,
    device: Device,
    embedding: TokenEmbedding,
    layers: Vec<DecoderLayer>,
    output_norm: RmsNorm,
    output: OutputProjection,
    rope: RopeAdapter,
}

impl fmt::Debug for Mistral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mistral")
            .field("options", &self.options)
            .field("tied_output", &self.is_tied())
            .finish()
    }
}

impl Mistral {
    pub const FAMILY: &'static str = "mistral";

    /// Builds the model from metadata and weights already placed on `device`.
    pub fn new(config: &dyn ConfigSource, tensors: &dyn TensorSource, device: &Device) -> Result<Self> {
        let tokenizer = config.string("tokenizer.ggml.model").unwrap_or_default();
        if !tokenizer.eq_ignore_ascii_case("gpt2") {
            return Err(ModelError::Config(format!(
                "tokenizer {tokenizer} not yet supported"
            )));
        }

        let mut options = Options::from_config(config)?;

        let embedding = TokenEmbedding::new(require(tensors, "token_embd.weight")?)?;
        if embedding.hidden_dim() != options.hidden_size {
            return Err(ModelError::Shape(format!(
                "token_embd.weight has width {} but embedding_length is {}",
                embedding.hidden_dim(),
                options.hidden_size
            )));
        }
        if options.vocab_size != 0 && options.vocab_size != embedding.vocab_size() {
            log::warn!(
                "tokenizer lists {} tokens but token_embd.weight has {} rows",
                options.vocab_size,
                embedding.vocab_size()
            );
        }
        options.vocab_size = embedding.vocab_size();

        let mut layers = Vec::with_capacity(options.block_count);
        let mut factors = Vec::with_capacity(options.block_count);
        for index in 0..options.block_count {
            layers.push(DecoderLayer::load(tensors, index, &options)?);
            factors.push(
                tensors.tensor_or_alt(&format!("blk.{index}.rope_freqs.weight"), "rope_freqs.weight"),
            );
        }

        let output_norm = load_norm(tensors, "output_norm.weight", &options)?;
        let output = if tensors.tensor("output.weight").is_some() {
            let linear = load_linear(tensors, "output")?;
            if linear.in_features() != options.hidden_size {
                return Err(ModelError::Shape(format!(
                    "output.weight expects {} input features but embedding_length is {}",
                    linear.in_features(),
                    options.hidden_size
                )));
            }
            if linear.out_features() != embedding.vocab_size() {
                return Err(ModelError::Shape(format!(
                    "output.weight produces {} logits but token_embd.weight holds {} tokens",
                    linear.out_features(),
                    embedding.vocab_size()
                )));
            }
            OutputProjection::Dedicated(linear)
        } else {
            OutputProjection::Tied
        };

        let rope = Rope::new(options.rope_config())?;
        let rope = RopeAdapter::new(rope, factors);

        log::info!(
            "model parameters: model_type={:?} vocab_size={} hidden_size={} num_hidden_layers={} num_attention_heads={} num_key_value_heads={} head_dim={} rms_norm_eps={} rope_theta={} bos_token_id={} eos_token_id={} pad_token_id={} tied_output={}",
            tokenizer,
            options.vocab_size,
            options.hidden_size,
            options.block_count,
            options.num_heads,
            options.num_kv_heads,
            options.head_dim,
            options.eps,
            options.rope_base,
            config.uint("tokenizer.ggml.bos_token_id").unwrap_or(0),
            config.uint("tokenizer.ggml.eos_token_id").unwrap_or(0),
            config.uint("tokenizer.ggml.pad_token_id").unwrap_or(0),
            matches!(output, OutputProjection::Tied)
        );
        log::info!("rope: {}", scaling_fingerprint(rope.rope().config()));

        Ok(Self {
            options,
            device: device.clone(),
            embedding,
            layers,
            output_norm,
            output,
            rope,
        })
    }

    /// Whether logits are read out through the token embedding matrix.
    pub fn is_tied(&self) -> bool {
        matches!(self.output, OutputProjection::Tied)
    }

    pub fn vocab_size(&self) -> usize {
        self.embedding.vocab_size()
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    fn run(
        &self,
        cache: &mut dyn KeyValueCache,
        inputs: &Tensor,
        positions: &Tensor,
        outputs: Option<&Tensor>,
    ) -> Result<Tensor> {
        let mut hidden = self.embedding.forward(inputs)?;

        let last = self.layers.len() - 1;
        for (index, layer) in self.layers.iter().enumerate() {
            cache.set_layer(index)?;
            let layer_outputs = if index == last { outputs } else { None };
            hidden = layer.forward(index, &hidden, positions, layer_outputs, &self.rope, cache)?;
        }

        let hidden = self.output_norm.forward(&hidden)?;
        match &self.output {
            OutputProjection::Dedicated(linear) => Ok(linear.forward(&hidden)?),
            OutputProjection::Tied => Ok(self.embedding.linear_out(&hidden)?),
        }
    }
}

impl KeyShift for Mistral {
    fn shift(&self, layer: usize, key: &Tensor, delta: i64) -> std::result::Result<Tensor, AttentionError> {
        if layer >= self.layers.len() {
            return Err(AttentionError::CacheState {
                context: format!(
                    "layer {layer} out of range for model with {} layers",
                    self.layers.len()
                ),
            });
        }
        self.rope.shift(layer, key, delta)
    }
}

impl DecoderModel for Mistral {
    fn family(&self) -> &str {
        Self::FAMILY
    }

    fn options(&self) -> &Options {
        &self.options
    }

    fn new_cache(&self) -> Result<CausalCache> {
        let layout = CacheLayout::new(
            self.options.block_count,
            self.options.num_kv_heads,
            self.options.head_dim,
        )?;
        Ok(CausalCache::new(layout, self.device.clone()))
    }

    fn forward(&self, cache: &mut dyn KeyValueCache, batch: &Batch) -> Result<Tensor> {
        batch.validate()?;
        let inputs = batch.input_tensor(&self.device)?;
        let positions = batch.position_tensor(&self.device)?;
        let outputs = batch.output_tensor(&self.device)?;
        log::debug!(
            "forward: tokens={} outputs={} first_position={}",
            batch.len(),
            batch.num_outputs(),
            batch.positions[0]
        );

        cache.start_forward(&batch.positions)?;
        match self.run(cache, &inputs, &positions, outputs.as_ref()) {
            Ok(logits) => {
                cache.commit()?;
                Ok(logits)
            }
            Err(err) => {
                cache.rollback();
                Err(err)
            }
        }
    }
}

/// Registry constructor for [`Mistral`].
pub fn load_mistral(
    config: &dyn ConfigSource,
    tensors: &dyn TensorSource,
    device: &Device,
) -> Result<Box<dyn DecoderModel>> {
    Ok(Box::new(Mistral::new(config, tensors, device)?))
}
