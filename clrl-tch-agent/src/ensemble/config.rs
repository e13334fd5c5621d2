use crate::opt::OptimizerConfig;
use anyhow::Result;
use log::info;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Configuration of [`SsEnsemble`](super::SsEnsemble).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct SsEnsembleConfig {
    /// The number of members `K`; the training batch is split into `K` slices.
    pub num_members: usize,

    /// Train forward dynamics predictors.
    pub use_fwd: bool,

    /// Train inverse dynamics predictors.
    pub use_inv: bool,

    /// Leading encoder layers tied to the critic encoder.
    pub num_shared_layers: usize,

    /// If `true`, only member 0 backpropagates into the shared layers.
    pub stop_shared_layers_grad: bool,

    /// Units of the hidden layers of the predictors.
    pub predictor_units: Vec<i64>,

    pub encoder_opt_config: OptimizerConfig,

    pub predictor_opt_config: OptimizerConfig,

    /// The ensemble is trained every `update_freq` steps.
    pub update_freq: usize,
}

impl Default for SsEnsembleConfig {
    fn default() -> Self {
        Self {
            num_members: 4,
            use_fwd: true,
            use_inv: true,
            num_shared_layers: 0,
            stop_shared_layers_grad: false,
            predictor_units: vec![256, 256],
            encoder_opt_config: OptimizerConfig::Adam { lr: 1e-3 },
            predictor_opt_config: OptimizerConfig::Adam { lr: 1e-3 },
            update_freq: 1,
        }
    }
}

impl SsEnsembleConfig {
    /// Sets the number of members.
    pub fn num_members(mut self, v: usize) -> Self {
        self.num_members = v;
        self
    }

    /// Enables or disables the forward and inverse predictors.
    pub fn predictors(mut self, use_fwd: bool, use_inv: bool) -> Self {
        self.use_fwd = use_fwd;
        self.use_inv = use_inv;
        self
    }

    /// Sets the number of encoder layers tied to the critic encoder.
    pub fn num_shared_layers(mut self, v: usize) -> Self {
        self.num_shared_layers = v;
        self
    }

    /// Sets gradient isolation of the shared layers.
    pub fn stop_shared_layers_grad(mut self, v: bool) -> Self {
        self.stop_shared_layers_grad = v;
        self
    }

    /// Sets the units of the hidden layers of the predictors.
    pub fn predictor_units(mut self, v: Vec<i64>) -> Self {
        self.predictor_units = v;
        self
    }

    /// Sets the optimizer of the encoders.
    pub fn encoder_opt_config(mut self, v: OptimizerConfig) -> Self {
        self.encoder_opt_config = v;
        self
    }

    /// Sets the optimizer of the predictors.
    pub fn predictor_opt_config(mut self, v: OptimizerConfig) -> Self {
        self.predictor_opt_config = v;
        self
    }

    /// Sets the update interval.
    pub fn update_freq(mut self, v: usize) -> Self {
        self.update_freq = v;
        self
    }

    /// Constructs [`SsEnsembleConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path_ = path.as_ref().to_owned();
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        info!("Load config of ensemble from {}", path_.to_str().unwrap_or_default());
        Ok(b)
    }

    /// Saves [`SsEnsembleConfig`].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path_ = path.as_ref().to_owned();
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        info!("Save config of ensemble into {}", path_.to_str().unwrap_or_default());
        Ok(())
    }
}
