//! Configuration of [`ContinualTrainer`](super::ContinualTrainer).
use anyhow::Result;
use log::info;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Configuration of [`ContinualTrainer`](super::ContinualTrainer).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct ContinualTrainerConfig {
    /// The number of environment steps spent on each task.
    pub train_steps_per_task: usize,

    /// Environment steps at the beginning of each task without optimization.
    pub init_steps: usize,

    /// Optimization steps per environment step after the warmup.
    pub num_train_iters: usize,

    /// Interval of flushing records in environment steps.
    pub flush_interval: usize,

    /// Interval of saving model parameters in environment steps.
    pub save_interval: usize,

    /// Where to save the trained model.
    pub model_dir: Option<String>,

    /// Seed of the environment of the first task. Task `t` uses `seed + t`.
    pub seed: i64,
}

impl Default for ContinualTrainerConfig {
    fn default() -> Self {
        Self {
            train_steps_per_task: 0,
            init_steps: 0,
            num_train_iters: 1,
            flush_interval: 1,
            save_interval: usize::MAX,
            model_dir: None,
            seed: 0,
        }
    }
}

impl ContinualTrainerConfig {
    /// Sets the number of environment steps per task.
    pub fn train_steps_per_task(mut self, v: usize) -> Self {
        self.train_steps_per_task = v;
        self
    }

    /// Sets the warmup period of each task in environment steps.
    pub fn init_steps(mut self, v: usize) -> Self {
        self.init_steps = v;
        self
    }

    /// Sets the number of optimization steps per environment step.
    pub fn num_train_iters(mut self, v: usize) -> Self {
        self.num_train_iters = v;
        self
    }

    /// Sets the interval of flushing records in environment steps.
    pub fn flush_interval(mut self, v: usize) -> Self {
        self.flush_interval = v;
        self
    }

    /// Sets the interval of saving in environment steps.
    pub fn save_interval(mut self, v: usize) -> Self {
        self.save_interval = v;
        self
    }

    /// Sets the directory where model parameters are saved.
    pub fn model_dir(mut self, model_dir: impl Into<String>) -> Self {
        self.model_dir = Some(model_dir.into());
        self
    }

    /// Sets the random seed of environments.
    pub fn seed(mut self, seed: i64) -> Self {
        self.seed = seed;
        self
    }

    /// Constructs [`ContinualTrainerConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path_ = path.as_ref().to_owned();
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        info!("Load config of trainer from {:?}", path_);
        Ok(b)
    }

    /// Saves [`ContinualTrainerConfig`].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path_ = path.as_ref().to_owned();
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        info!("Save config of trainer into {:?}", path_);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_serde_trainer_config() -> Result<()> {
        let config = ContinualTrainerConfig::default()
            .train_steps_per_task(1000)
            .init_steps(100)
            .num_train_iters(2)
            .model_dir("some/directory");

        let dir = TempDir::new("trainer_config")?;
        let path = dir.path().join("trainer_config.yaml");

        config.save(&path)?;
        let config_ = ContinualTrainerConfig::load(&path)?;
        assert_eq!(config, config_);
        Ok(())
    }
}
