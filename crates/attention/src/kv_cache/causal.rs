//! Growing causal key/value cache.
//!
//! Every layer owns an append-only run of `(position, key, value)` rows with
//! strictly increasing, contiguous positions. Rows are only dropped from the
//! front, by [`CausalCache::discard_oldest`], which re-rotates the surviving
//! keys so that their rotary phase matches their lowered positions.

use std::cell::Cell;
use std::marker::PhantomData;

use candle_core::{Device, Tensor};

use crate::core::{to_backend_err, Attention, AttentionError};
use crate::kv_cache::api::{KeyShift, KeyValueCache};
use crate::kv_cache::layout::CacheLayout;
use crate::masks::build_causal_mask;
use crate::reference::ExactAttention;

#[derive(Debug, Clone, Default)]
struct LayerCache {
    keys: Option<Tensor>,
    values: Option<Tensor>,
    positions: Vec<usize>,
}

#[derive(Debug)]
struct Snapshot {
    keys: Option<Tensor>,
    values: Option<Tensor>,
    len: usize,
}

#[derive(Debug)]
struct PendingForward {
    positions: Vec<usize>,
    snapshots: Vec<Snapshot>,
    appended: Vec<bool>,
}

/// Per-sequence cache for one decoder stack.
///
/// The cache is `Send` but not `Sync`: one sequence is driven by one caller at
/// a time, and sharing it requires external synchronisation.
#[derive(Debug)]
pub struct CausalCache {
    layout: CacheLayout,
    device: Device,
    layers: Vec<LayerCache>,
    active_layer: Option<usize>,
    pending: Option<PendingForward>,
    kernel: ExactAttention,
    _not_sync: PhantomData<Cell<()>>,
}

impl CausalCache {
    pub fn new(layout: CacheLayout, device: Device) -> Self {
        log::info!(
            "kv-cache init: layers={} kv_heads={} head_dim={}",
            layout.num_layers,
            layout.num_kv_heads,
            layout.head_dim
        );
        let layers = vec![LayerCache::default(); layout.num_layers];
        Self {
            layout,
            device,
            layers,
            active_layer: None,
            pending: None,
            kernel: ExactAttention::new(),
            _not_sync: PhantomData,
        }
    }

    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    pub fn num_layers(&self) -> usize {
        self.layout.num_layers
    }

    /// Number of rows stored for `layer`, or `None` when the layer does not exist.
    pub fn len(&self, layer: usize) -> Option<usize> {
        self.layers.get(layer).map(|l| l.positions.len())
    }

    pub fn is_empty(&self) -> bool {
        self.layers.iter().all(|l| l.positions.is_empty())
    }

    /// Positions stored for `layer`, oldest first.
    pub fn positions(&self, layer: usize) -> Option<&[usize]> {
        self.layers.get(layer).map(|l| l.positions.as_slice())
    }

    /// Keys stored for `layer`, shaped `[len, num_kv_heads, head_dim]`.
    pub fn keys(&self, layer: usize) -> Option<&Tensor> {
        self.layers.get(layer).and_then(|l| l.keys.as_ref())
    }

    /// Values stored for `layer`, shaped `[len, num_kv_heads, head_dim]`.
    pub fn values(&self, layer: usize) -> Option<&Tensor> {
        self.layers.get(layer).and_then(|l| l.values.as_ref())
    }

    /// Position the next forward call must start at, or `None` for an empty
    /// cache (which accepts any starting position).
    pub fn next_position(&self) -> Option<usize> {
        self.layers
            .first()
            .and_then(|l| l.positions.last())
            .map(|p| p + 1)
    }

    /// Drop every stored row.
    pub fn reset(&mut self) {
        for layer in &mut self.layers {
            *layer = LayerCache::default();
        }
        self.active_layer = None;
        self.pending = None;
        log::debug!("kv-cache reset");
    }

    /// Drop the `count` oldest rows of every layer and lower the remaining
    /// positions by `count`, re-rotating the surviving keys through `shifter`.
    ///
    /// Either every layer is compacted or, on error, none is.
    pub fn discard_oldest<S: KeyShift + ?Sized>(
        &mut self,
        count: usize,
        shifter: &S,
    ) -> Result<(), AttentionError> {
        if self.pending.is_some() {
            return Err(AttentionError::CacheState {
                context: "cannot discard entries during a forward call".to_string(),
            });
        }
        if count == 0 {
            return Ok(());
        }
        let shortest = self
            .layers
            .iter()
            .map(|l| l.positions.len())
            .min()
            .unwrap_or(0);
        if count > shortest {
            return Err(AttentionError::CacheState {
                context: format!("cannot discard {count} entries from a cache holding {shortest}"),
            });
        }

        let delta = -(count as i64);
        let mut compacted = Vec::with_capacity(self.layers.len());
        for (index, layer) in self.layers.iter().enumerate() {
            let remaining = layer.positions.len() - count;
            if remaining == 0 {
                compacted.push(LayerCache::default());
                continue;
            }
            let (Some(keys), Some(values)) = (&layer.keys, &layer.values) else {
                return Err(AttentionError::CacheState {
                    context: format!("layer {index} has positions but no tensors"),
                });
            };
            let kept_keys = keys.narrow(0, count, remaining).map_err(to_backend_err)?;
            let kept_values = values
                .narrow(0, count, remaining)
                .map_err(to_backend_err)?;
            let shifted = shifter.shift(index, &kept_keys, delta)?;
            if shifted.dims() != kept_keys.dims() {
                return Err(AttentionError::InvalidShape {
                    context: format!(
                        "key shift changed shape from {:?} to {:?}",
                        kept_keys.dims(),
                        shifted.dims()
                    ),
                });
            }
            compacted.push(LayerCache {
                keys: Some(shifted),
                values: Some(kept_values),
                positions: layer.positions[count..]
                    .iter()
                    .map(|p| p - count)
                    .collect(),
            });
        }

        self.layers = compacted;
        log::debug!("kv-cache discarded {} oldest entries per layer", count);
        Ok(())
    }

    fn active(&self) -> Result<usize, AttentionError> {
        self.active_layer.ok_or_else(|| AttentionError::CacheState {
            context: "no active layer; call set_layer first".to_string(),
        })
    }

    fn pending(&self) -> Result<&PendingForward, AttentionError> {
        self.pending.as_ref().ok_or_else(|| AttentionError::CacheState {
            context: "no forward call in progress; call start_forward first".to_string(),
        })
    }

    fn check_rows(&self, name: &str, tensor: &Tensor, rows: usize) -> Result<(), AttentionError> {
        let expected = [rows, self.layout.num_kv_heads, self.layout.head_dim];
        if tensor.dims() != expected {
            return Err(AttentionError::InvalidShape {
                context: format!(
                    "{name} expected {:?} but received {:?}",
                    expected,
                    tensor.dims()
                ),
            });
        }
        if !tensor.device().same_device(&self.device) {
            return Err(AttentionError::InvalidShape {
                context: format!("{name} must reside on the cache device"),
            });
        }
        Ok(())
    }
}

impl KeyValueCache for CausalCache {
    fn start_forward(&mut self, positions: &[usize]) -> Result<(), AttentionError> {
        if self.pending.is_some() {
            return Err(AttentionError::CacheState {
                context: "previous forward call was neither committed nor rolled back".to_string(),
            });
        }
        if positions.is_empty() {
            return Err(AttentionError::InvalidShape {
                context: "forward call requires at least one position".to_string(),
            });
        }
        if let Some(gap) = positions.windows(2).position(|w| w[1] != w[0] + 1) {
            return Err(AttentionError::CacheState {
                context: format!(
                    "positions must be contiguous, found {} followed by {}",
                    positions[gap],
                    positions[gap + 1]
                ),
            });
        }
        if let Some(next) = self.next_position() {
            if positions[0] != next {
                return Err(AttentionError::CacheState {
                    context: format!(
                        "positions must continue the cached sequence at {next}, got {}",
                        positions[0]
                    ),
                });
            }
        }

        let snapshots = self
            .layers
            .iter()
            .map(|l| Snapshot {
                keys: l.keys.clone(),
                values: l.values.clone(),
                len: l.positions.len(),
            })
            .collect();
        self.pending = Some(PendingForward {
            positions: positions.to_vec(),
            snapshots,
            appended: vec![false; self.layers.len()],
        });
        self.active_layer = None;
        log::debug!(
            "kv-cache forward start: rows={} first_position={}",
            positions.len(),
            positions[0]
        );
        Ok(())
    }

    fn set_layer(&mut self, layer: usize) -> Result<(), AttentionError> {
        if layer >= self.layers.len() {
            return Err(AttentionError::CacheState {
                context: format!(
                    "layer {layer} out of range for cache with {} layers",
                    self.layers.len()
                ),
            });
        }
        if let Some(pending) = &self.pending {
            let expected = pending.appended.iter().position(|done| !done);
            if expected != Some(layer) {
                return Err(AttentionError::CacheState {
                    context: match expected {
                        Some(next) => format!("layer {layer} selected out of order, expected layer {next}"),
                        None => format!("layer {layer} selected after every layer received rows"),
                    },
                });
            }
        }
        self.active_layer = Some(layer);
        Ok(())
    }

    fn append(&mut self, key: &Tensor, value: &Tensor) -> Result<(), AttentionError> {
        let layer = self.active()?;
        let pending = self.pending()?;
        if pending.appended[layer] {
            return Err(AttentionError::CacheState {
                context: format!("layer {layer} already received rows in this forward call"),
            });
        }
        let rows = pending.positions.len();
        self.check_rows("key", key, rows)?;
        self.check_rows("value", value, rows)?;

        let state = &self.layers[layer];
        let keys = match &state.keys {
            Some(existing) => Tensor::cat(&[existing, key], 0).map_err(to_backend_err)?,
            None => key.clone(),
        };
        let values = match &state.values {
            Some(existing) => Tensor::cat(&[existing, value], 0).map_err(to_backend_err)?,
            None => value.clone(),
        };

        let state = &mut self.layers[layer];
        state.keys = Some(keys);
        state.values = Some(values);
        if let Some(pending) = self.pending.as_mut() {
            state.positions.extend_from_slice(&pending.positions);
            pending.appended[layer] = true;
        }
        Ok(())
    }

    fn attend(&self, query: &Tensor, scale: f64) -> Result<Tensor, AttentionError> {
        let layer = self.active()?;
        let pending = self.pending()?;
        let (rows, heads, head_dim) = query.dims3().map_err(|_| AttentionError::InvalidShape {
            context: format!(
                "query must have shape [rows, heads, head_dim], got {:?}",
                query.dims()
            ),
        })?;
        if rows != pending.positions.len() || head_dim != self.layout.head_dim {
            return Err(AttentionError::InvalidShape {
                context: format!(
                    "query expected [{}, _, {}] but received {:?}",
                    pending.positions.len(),
                    self.layout.head_dim,
                    query.dims()
                ),
            });
        }

        let state = &self.layers[layer];
        let (Some(keys), Some(values)) = (&state.keys, &state.values) else {
            return Tensor::zeros((rows, heads, head_dim), query.dtype(), query.device())
                .map_err(to_backend_err);
        };
        let mask = build_causal_mask(&self.device, &pending.positions, &state.positions)
            .map_err(to_backend_err)?;
        self.kernel.attend(query, keys, values, Some(&mask), scale)
    }

    fn commit(&mut self) -> Result<(), AttentionError> {
        let Some(pending) = &self.pending else {
            return Err(AttentionError::CacheState {
                context: "no forward call in progress; call start_forward first".to_string(),
            });
        };
        if let Some(missing) = pending.appended.iter().position(|done| !done) {
            let rows = pending.positions.len();
            self.rollback();
            return Err(AttentionError::CacheState {
                context: format!(
                    "cannot commit {rows} rows: layer {missing} of {} received none",
                    self.layers.len()
                ),
            });
        }
        log::debug!(
            "kv-cache forward commit: rows={} len={}",
            pending.positions.len(),
            self.layers.first().map_or(0, |l| l.positions.len())
        );
        self.pending = None;
        self.active_layer = None;
        Ok(())
    }

    fn rollback(&mut self) {
        if let Some(pending) = self.pending.take() {
            for (layer, snapshot) in self.layers.iter_mut().zip(pending.snapshots) {
                layer.keys = snapshot.keys;
                layer.values = snapshot.values;
                layer.positions.truncate(snapshot.len);
            }
            log::warn!(
                "kv-cache forward rolled back: dropped {} rows",
                pending.positions.len()
            );
        }
        self.active_layer = None;
    }
}
