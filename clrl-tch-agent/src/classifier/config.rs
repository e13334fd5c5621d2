//! Configuration of [`Classifier`](super::Classifier).
use crate::{opt::OptimizerConfig, regularizer::RegularizerConfig, Device};
use anyhow::Result;
use log::info;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Configuration of [`Classifier`](super::Classifier).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct ClassifierConfig {
    /// Dimension of flattened inputs.
    pub in_dim: i64,
    pub hidden_units: i64,
    /// The number of classes over all tasks.
    pub classes: i64,
    pub opt_config: OptimizerConfig,
    pub regularizer_config: Option<RegularizerConfig>,
    pub device: Option<Device>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            in_dim: 784,
            hidden_units: 400,
            classes: 10,
            opt_config: OptimizerConfig::Adam { lr: 1e-3 },
            regularizer_config: None,
            device: None,
        }
    }
}

impl ClassifierConfig {
    /// Sets the input dimension and the number of classes.
    pub fn dims(mut self, in_dim: i64, classes: i64) -> Self {
        self.in_dim = in_dim;
        self.classes = classes;
        self
    }

    /// Sets the width of both hidden layers.
    pub fn hidden_units(mut self, v: i64) -> Self {
        self.hidden_units = v;
        self
    }

    /// Sets the optimizer.
    pub fn opt_config(mut self, v: OptimizerConfig) -> Self {
        self.opt_config = v;
        self
    }

    /// Enables a regularizer.
    pub fn regularizer_config(mut self, v: RegularizerConfig) -> Self {
        self.regularizer_config = Some(v);
        self
    }

    /// Device.
    pub fn device(mut self, device: tch::Device) -> Self {
        self.device = Some(device.into());
        self
    }

    /// Constructs [ClassifierConfig] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path_ = path.as_ref().to_owned();
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        info!("Load config of classifier from {}", path_.to_str().unwrap_or_default());
        Ok(b)
    }

    /// Saves [ClassifierConfig].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path_ = path.as_ref().to_owned();
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        info!("Save config of classifier into {}", path_.to_str().unwrap_or_default());
        Ok(())
    }
}
