#![allow(dead_code)]

use candle_core::{Device, Result, Tensor};
use model::{Metadata, WeightMap};

/// Geometry of a tiny test model.
#[derive(Debug, Clone, Copy)]
pub struct Tiny {
    pub layers: usize,
    pub hidden: usize,
    pub heads: usize,
    pub kv_heads: usize,
    pub head_dim: usize,
    pub rope_dim: usize,
    pub intermediate: usize,
    pub vocab: usize,
}

impl Default for Tiny {
    fn default() -> Self {
        Self {
            layers: 2,
            hidden: 8,
            heads: 2,
            kv_heads: 1,
            head_dim: 4,
            rope_dim: 4,
            intermediate: 16,
            vocab: 11,
        }
    }
}

impl Tiny {
    pub fn metadata(&self) -> Metadata {
        Metadata::new()
            .with("general.architecture", "mistral")
            .with("tokenizer.ggml.model", "gpt2")
            .with("block_count", self.layers)
            .with("embedding_length", self.hidden)
            .with("attention.head_count", self.heads)
            .with("attention.head_count_kv", self.kv_heads)
            .with("attention.key_length", self.head_dim)
            .with("rope.dimension_count", self.rope_dim)
            .with("rope.freq_base", 10_000.0f64)
            .with("attention.layer_norm_rms_epsilon", 1e-5f64)
    }

    /// Deterministic weights, including a dedicated `output.weight`.
    pub fn weights(&self) -> Result<WeightMap> {
        let device = Device::Cpu;
        let mut seed = 0usize;
        let mut next = |shape: (usize, usize)| -> Result<Tensor> {
            seed += 1;
            filled(shape, seed, &device)
        };

        let q_dim = self.heads * self.head_dim;
        let kv_dim = self.kv_heads * self.head_dim;

        let mut map = WeightMap::new();
        map.insert("token_embd.weight", next((self.vocab, self.hidden))?);
        map.insert("output.weight", next((self.vocab, self.hidden))?);
        map.insert("output_norm.weight", norm_weight(self.hidden, &device)?);
        for i in 0..self.layers {
            let p = format!("blk.{i}");
            map.insert(format!("{p}.input_layernorm.weight"), norm_weight(self.hidden, &device)?);
            map.insert(
                format!("{p}.post_attention_layernorm.weight"),
                norm_weight(self.hidden, &device)?,
            );
            map.insert(format!("{p}.self_attn.q_proj.weight"), next((q_dim, self.hidden))?);
            map.insert(format!("{p}.self_attn.k_proj.weight"), next((kv_dim, self.hidden))?);
            map.insert(format!("{p}.self_attn.v_proj.weight"), next((kv_dim, self.hidden))?);
            map.insert(format!("{p}.self_attn.o_proj.weight"), next((self.hidden, q_dim))?);
            map.insert(format!("{p}.mlp.gate_proj.weight"), next((self.intermediate, self.hidden))?);
            map.insert(format!("{p}.mlp.up_proj.weight"), next((self.intermediate, self.hidden))?);
            map.insert(format!("{p}.mlp.down_proj.weight"), next((self.hidden, self.intermediate))?);
        }
        Ok(map)
    }
}

/// Smooth pseudo-random values in roughly `[-0.5, 0.5]`.
pub fn filled(shape: (usize, usize), seed: usize, device: &Device) -> Result<Tensor> {
    let count = shape.0 * shape.1;
    let data: Vec<f32> = (0..count)
        .map(|i| {
            let v = (i as f32 * 12.9898 + seed as f32 * 78.233).sin() * 43_758.547;
            v - v.floor() - 0.5
        })
        .collect();
    Tensor::from_vec(data, shape, device)
}

fn norm_weight(hidden: usize, device: &Device) -> Result<Tensor> {
    let data: Vec<f32> = (0..hidden).map(|i| 1.0 + 0.05 * i as f32).collect();
    Tensor::from_vec(data, hidden, device)
}

pub fn max_abs_diff(a: &Tensor, b: &Tensor) -> Result<f32> {
    a.sub(b)?.abs()?.max_all()?.to_vec0::<f32>()
}
