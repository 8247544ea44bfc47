//! Rotary positional embedding applied to per-token query/key heads.
//!
//! Pairs of adjacent features `(2i, 2i + 1)` inside the leading `rotate_dim`
//! features of every head are rotated by an angle that depends on the token
//! position; features past `rotate_dim` pass through untouched. Positions are
//! arbitrary per row (not a contiguous range), which lets the same routine
//! re-rotate cached keys by a signed offset when the cache window slides.

use candle_core::{bail, DType, Result, Tensor};

/// Configuration for building rotary positional embeddings.
///
/// The angle for pair `i` at position `p` is
/// `p · freq_scale · rope_theta^(-2i / rotate_dim) / factor_i`, where the
/// optional per-pair `factor_i` comes from a checkpoint tensor and defaults to 1.
#[derive(Debug, Clone, PartialEq)]
pub struct RopeConfig {
    /// Per-head dimensionality of the representations being rotated.
    pub head_dim: usize,
    /// Base angle parameter θ controlling the frequency spectrum (defaults to 10k).
    pub rope_theta: f32,
    /// Optional override for how many dimensions to rotate; `None` implies the full `head_dim`.
    pub rotate_dim: Option<usize>,
    /// Linear multiplier applied to every position before rotation (defaults to 1).
    pub freq_scale: f32,
}

impl Default for RopeConfig {
    fn default() -> Self {
        Self {
            head_dim: 0,
            rope_theta: 10_000.0,
            rotate_dim: None,
            freq_scale: 1.0,
        }
    }
}

impl RopeConfig {
    /// Number of leading features rotated per head.
    pub fn effective_rotate_dim(&self) -> usize {
        self.rotate_dim.unwrap_or(self.head_dim)
    }
}

/// Produce a stable fingerprint describing the rotation parameters.
///
/// Emitted once when a model is built so logs capture the effective
/// configuration.
pub fn scaling_fingerprint(cfg: &RopeConfig) -> String {
    let rotate_segment = cfg
        .rotate_dim
        .map(|d| d.to_string())
        .unwrap_or_else(|| "all".to_owned());
    format!(
        "theta={:.6};rot={};head_dim={};freq_scale={:.6}",
        cfg.rope_theta, rotate_segment, cfg.head_dim, cfg.freq_scale
    )
}

/// Rotary positional embedding helper exposing construction and application entry points.
#[derive(Debug, Clone, PartialEq)]
pub struct Rope {
    config: RopeConfig,
}

impl Rope {
    /// Construct the rotary embedding helper from a configuration.
    pub fn new(config: RopeConfig) -> Result<Self> {
        if config.head_dim == 0 {
            bail!("head_dim must be non-zero");
        }
        let rotate_dim = config.effective_rotate_dim();
        if rotate_dim == 0 || rotate_dim > config.head_dim {
            bail!(
                "invalid rotate_dim {} for head_dim {}",
                rotate_dim,
                config.head_dim
            );
        }
        if rotate_dim % 2 != 0 {
            bail!("rotate_dim must be even, got {}", rotate_dim);
        }
        if !(config.rope_theta.is_finite() && config.rope_theta > 0.0) {
            bail!("rope_theta must be positive, got {}", config.rope_theta);
        }
        if !(config.freq_scale.is_finite() && config.freq_scale > 0.0) {
            bail!("freq_scale must be positive, got {}", config.freq_scale);
        }
        log::debug!("rope configured: {}", scaling_fingerprint(&config));
        Ok(Self { config })
    }

    pub fn config(&self) -> &RopeConfig {
        &self.config
    }

    pub fn rotate_dim(&self) -> usize {
        self.config.effective_rotate_dim()
    }

    /// Per-pair angular frequencies, with `freq_scale` and the optional
    /// frequency factors folded in.
    pub fn inv_freqs(&self, factors: Option<&Tensor>) -> Result<Vec<f64>> {
        let rotate_dim = self.rotate_dim();
        let half_dim = rotate_dim / 2;
        let factors = match factors {
            Some(tensor) => {
                let values = tensor.flatten_all()?.to_dtype(DType::F64)?.to_vec1::<f64>()?;
                if values.len() != half_dim {
                    bail!(
                        "rope frequency factors must have {} entries, got {}",
                        half_dim,
                        values.len()
                    );
                }
                if values.iter().any(|f| !(f.is_finite() && *f != 0.0)) {
                    bail!("rope frequency factors must be finite and non-zero");
                }
                Some(values)
            }
            None => None,
        };

        let base = self.config.rope_theta as f64;
        let scale = self.config.freq_scale as f64;
        let inv_freqs = (0..half_dim)
            .map(|idx| {
                let exponent = (2 * idx) as f64 / rotate_dim as f64;
                let factor = factors.as_ref().map_or(1.0, |f| f[idx]);
                scale * base.powf(-exponent) / factor
            })
            .collect();
        Ok(inv_freqs)
    }

    /// Rotate `x` shaped `[rows, heads, head_dim]`, where row `r` sits at
    /// `positions[r]`.
    ///
    /// `positions` is a 1-D tensor of any numeric dtype; fractional and
    /// negative values are allowed, which is how cached keys are re-rotated
    /// by a signed offset. The output mirrors the dtype of `x`; the rotation
    /// itself runs in f32.
    pub fn apply(&self, x: &Tensor, positions: &Tensor, factors: Option<&Tensor>) -> Result<Tensor> {
        let (rows, heads, head_dim) = x.dims3()?;
        if head_dim != self.config.head_dim {
            bail!(
                "rope expected head_dim {} but received {}",
                self.config.head_dim,
                head_dim
            );
        }
        if positions.rank() != 1 || positions.dim(0)? != rows {
            bail!(
                "positions must be 1-D with {} entries, got shape {:?}",
                rows,
                positions.dims()
            );
        }
        if rows == 0 {
            return Ok(x.clone());
        }

        let rotate_dim = self.rotate_dim();
        let half_dim = rotate_dim / 2;
        let inv_freqs = self.inv_freqs(factors)?;
        let positions = positions.to_dtype(DType::F64)?.to_vec1::<f64>()?;

        let mut sin_data = Vec::with_capacity(rows * half_dim);
        let mut cos_data = Vec::with_capacity(rows * half_dim);
        for &pos in &positions {
            for &inv_freq in &inv_freqs {
                let angle = pos * inv_freq;
                sin_data.push(angle.sin() as f32);
                cos_data.push(angle.cos() as f32);
            }
        }
        let device = x.device();
        let sin = Tensor::from_vec(sin_data, (rows, 1, half_dim), device)?
            .broadcast_as((rows, heads, half_dim))?;
        let cos = Tensor::from_vec(cos_data, (rows, 1, half_dim), device)?
            .broadcast_as((rows, heads, half_dim))?;

        let dtype = x.dtype();
        let main = x.narrow(2, 0, rotate_dim)?.to_dtype(DType::F32)?;
        let pairs = main.reshape((rows, heads, half_dim, 2))?;
        let chunks = pairs.chunk(2, 3)?;
        let even = chunks[0].squeeze(3)?;
        let odd = chunks[1].squeeze(3)?;

        let rotated_even = even.mul(&cos)?.sub(&odd.mul(&sin)?)?;
        let rotated_odd = odd.mul(&cos)?.add(&even.mul(&sin)?)?;
        let rotated = Tensor::cat(&[&rotated_even.unsqueeze(3)?, &rotated_odd.unsqueeze(3)?], 3)?
            .reshape((rows, heads, rotate_dim))?
            .to_dtype(dtype)?;

        let tail_dim = head_dim - rotate_dim;
        if tail_dim == 0 {
            Ok(rotated)
        } else {
            let tail = x.narrow(2, rotate_dim, tail_dim)?;
            Tensor::cat(&[&rotated, &tail], 2)
        }
    }
}
