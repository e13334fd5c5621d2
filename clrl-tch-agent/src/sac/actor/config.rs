use crate::opt::OptimizerConfig;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
/// Configuration of [`Actor`](super::Actor).
pub struct ActorConfig {
    /// Units of the hidden layers of the policy head.
    pub units: Vec<i64>,

    /// Lower bound of the log standard deviation.
    pub log_std_min: f64,

    /// Upper bound of the log standard deviation.
    pub log_std_max: f64,

    pub opt_config: OptimizerConfig,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            units: vec![256, 256],
            log_std_min: -10.0,
            log_std_max: 2.0,
            opt_config: OptimizerConfig::Adam { lr: 1e-3 },
        }
    }
}

impl ActorConfig {
    /// Sets the units of the hidden layers.
    pub fn units(mut self, v: Vec<i64>) -> Self {
        self.units = v;
        self
    }

    /// Sets the range of the log standard deviation.
    pub fn log_std_range(mut self, min: f64, max: f64) -> Self {
        self.log_std_min = min;
        self.log_std_max = max;
        self
    }

    /// Sets optimizer configuration.
    pub fn opt_config(mut self, v: OptimizerConfig) -> Self {
        self.opt_config = v;
        self
    }

    /// Constructs [ActorConfig] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [ActorConfig].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}
