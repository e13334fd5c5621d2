use crate::{encoder::EncoderConfig, opt::OptimizerConfig};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
/// Configuration of [`Critic`](super::Critic).
pub struct CriticConfig {
    /// Encoder shared by both action-value heads.
    pub encoder_config: EncoderConfig,

    /// Units of the hidden layers of each head.
    pub units: Vec<i64>,

    pub opt_config: OptimizerConfig,
}

impl Default for CriticConfig {
    fn default() -> Self {
        Self {
            encoder_config: EncoderConfig::default(),
            units: vec![256, 256],
            opt_config: OptimizerConfig::Adam { lr: 1e-3 },
        }
    }
}

impl CriticConfig {
    /// Sets the configuration of the encoder.
    pub fn encoder_config(mut self, v: EncoderConfig) -> Self {
        self.encoder_config = v;
        self
    }

    /// Sets the units of the hidden layers of the heads.
    pub fn units(mut self, v: Vec<i64>) -> Self {
        self.units = v;
        self
    }

    /// Sets optimizer configuration.
    pub fn opt_config(mut self, v: OptimizerConfig) -> Self {
        self.opt_config = v;
        self
    }

    /// Constructs [CriticConfig] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [CriticConfig].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}
