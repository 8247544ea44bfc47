//! Sources of hyperparameters and weights.
//!
//! A model is built from a [`ConfigSource`] (typed scalars keyed by name) and
//! a [`TensorSource`] (named weight tensors). [`Metadata`] and [`WeightMap`]
//! are the in-memory implementations; the former deserialises from JSON and
//! the latter loads safetensors files.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use candle_core::{Device, Tensor};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Typed scalar lookup. Callers supply defaults at the call site.
pub trait ConfigSource {
    fn string(&self, key: &str) -> Option<String>;
    fn uint(&self, key: &str) -> Option<u64>;
    fn float(&self, key: &str) -> Option<f64>;
    fn bool(&self, key: &str) -> Option<bool>;
    fn strings(&self, key: &str) -> Option<Vec<String>>;
}

/// Named weight lookup.
pub trait TensorSource {
    fn tensor(&self, name: &str) -> Option<Tensor>;

    /// Looks up `name`, falling back to `alt` when it is absent.
    fn tensor_or_alt(&self, name: &str, alt: &str) -> Option<Tensor> {
        self.tensor(name).or_else(|| self.tensor(alt))
    }
}

/// A single metadata value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Uint(u64),
    Float(f64),
    String(String),
    Strings(Vec<String>),
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        MetadataValue::Bool(value)
    }
}

impl From<u64> for MetadataValue {
    fn from(value: u64) -> Self {
        MetadataValue::Uint(value)
    }
}

impl From<usize> for MetadataValue {
    fn from(value: usize) -> Self {
        MetadataValue::Uint(value as u64)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        MetadataValue::Float(value)
    }
}

impl From<f32> for MetadataValue {
    fn from(value: f32) -> Self {
        MetadataValue::Float(value as f64)
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::String(value.to_owned())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::String(value)
    }
}

impl From<Vec<String>> for MetadataValue {
    fn from(value: Vec<String>) -> Self {
        MetadataValue::Strings(value)
    }
}

/// Key/value model metadata, e.g. `"attention.head_count": 32`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata {
    values: BTreeMap<String, MetadataValue>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<MetadataValue>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<MetadataValue> {
        self.values.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.values.get(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl ConfigSource for Metadata {
    fn string(&self, key: &str) -> Option<String> {
        match self.values.get(key)? {
            MetadataValue::String(value) => Some(value.clone()),
            _ => None,
        }
    }

    fn uint(&self, key: &str) -> Option<u64> {
        match self.values.get(key)? {
            MetadataValue::Uint(value) => Some(*value),
            _ => None,
        }
    }

    /// Integer values are widened, so `"rope.freq_base": 10000` reads as a float.
    fn float(&self, key: &str) -> Option<f64> {
        match self.values.get(key)? {
            MetadataValue::Float(value) => Some(*value),
            MetadataValue::Uint(value) => Some(*value as f64),
            _ => None,
        }
    }

    fn bool(&self, key: &str) -> Option<bool> {
        match self.values.get(key)? {
            MetadataValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    fn strings(&self, key: &str) -> Option<Vec<String>> {
        match self.values.get(key)? {
            MetadataValue::Strings(values) => Some(values.clone()),
            _ => None,
        }
    }
}

/// Named weights held in memory.
#[derive(Debug, Clone, Default)]
pub struct WeightMap {
    tensors: HashMap<String, Tensor>,
}

impl WeightMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor) {
        self.tensors.insert(name.into(), tensor);
    }

    pub fn remove(&mut self, name: &str) -> Option<Tensor> {
        self.tensors.remove(name)
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Tensor names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tensors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Loads every tensor of a safetensors file onto `device`.
    pub fn from_safetensors(path: impl AsRef<Path>, device: &Device) -> Result<Self> {
        let path = path.as_ref();
        let tensors = candle_core::safetensors::load(path, device)?;
        log::info!(
            "loaded {} tensors from {}",
            tensors.len(),
            path.display()
        );
        Ok(Self { tensors })
    }

    pub fn save_safetensors(&self, path: impl AsRef<Path>) -> Result<()> {
        candle_core::safetensors::save(&self.tensors, path)?;
        Ok(())
    }
}

impl From<HashMap<String, Tensor>> for WeightMap {
    fn from(tensors: HashMap<String, Tensor>) -> Self {
        Self { tensors }
    }
}

impl TensorSource for WeightMap {
    fn tensor(&self, name: &str) -> Option<Tensor> {
        self.tensors.get(name).cloned()
    }
}
