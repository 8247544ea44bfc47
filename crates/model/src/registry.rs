use std::collections::BTreeMap;

use candle_core::Device;

use crate::error::{ModelError, Result};
use crate::loader::{ConfigSource, TensorSource};
use crate::model::{load_mistral, DecoderModel, Mistral};

/// Builds a model of one family from metadata and weights.
pub type Constructor =
    fn(&dyn ConfigSource, &dyn TensorSource, &Device) -> Result<Box<dyn DecoderModel>>;

/// Maps architecture names (`general.architecture`) to constructors.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    constructors: BTreeMap<String, Constructor>,
}

impl ModelRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every family this crate implements.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry
            .constructors
            .insert(Mistral::FAMILY.to_owned(), load_mistral as Constructor);
        registry
    }

    /// Registers `constructor` under `name`; names are unique.
    pub fn register(&mut self, name: impl Into<String>, constructor: Constructor) -> Result<()> {
        let name = name.into();
        if self.constructors.contains_key(&name) {
            return Err(ModelError::Config(format!(
                "model family {name} is already registered"
            )));
        }
        self.constructors.insert(name, constructor);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Registered family names in sorted order.
    pub fn families(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }

    /// Builds the model named by `general.architecture`.
    pub fn load(
        &self,
        config: &dyn ConfigSource,
        tensors: &dyn TensorSource,
        device: &Device,
    ) -> Result<Box<dyn DecoderModel>> {
        let arch = config
            .string("general.architecture")
            .ok_or_else(|| ModelError::Config("missing required key general.architecture".into()))?;
        let constructor = self
            .constructors
            .get(&arch)
            .ok_or_else(|| ModelError::Config(format!("unsupported model architecture {arch}")))?;
        log::info!("loading model architecture {}", arch);
        constructor(config, tensors, device)
    }
}
