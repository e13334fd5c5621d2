use super::{Agem, Ewc, ParamTable, Regularizer, Si};
use anyhow::Result;
use clrl_core::error::ClrlError;
use log::info;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Configuration of [`Ewc`].
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct EwcConfig {
    /// Coefficient of the penalty.
    pub lambda: f64,

    /// The number of rollouts for estimating the Fisher information.
    pub fisher_iters: usize,

    /// Steps of each rollout.
    pub rollout_steps: usize,

    /// If `true`, a single running Fisher is kept instead of one per task.
    pub online: bool,

    /// Decay of the running Fisher in online mode.
    pub online_gamma: f64,
}

impl Default for EwcConfig {
    fn default() -> Self {
        Self {
            lambda: 5000.0,
            fisher_iters: 100,
            rollout_steps: 1024,
            online: false,
            online_gamma: 1.0,
        }
    }
}

impl EwcConfig {
    /// Sets the coefficient of the penalty.
    pub fn lambda(mut self, v: f64) -> Self {
        self.lambda = v;
        self
    }

    /// Sets the number of rollouts of Fisher estimation.
    pub fn fisher_iters(mut self, v: usize) -> Self {
        self.fisher_iters = v;
        self
    }

    /// Sets the steps of each rollout.
    pub fn rollout_steps(mut self, v: usize) -> Self {
        self.rollout_steps = v;
        self
    }

    /// Switches to online EWC with decay `gamma`.
    pub fn online(mut self, gamma: f64) -> Self {
        self.online = true;
        self.online_gamma = gamma;
        self
    }
}

/// Configuration of [`Si`].
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct SiConfig {
    /// Coefficient of the surrogate loss.
    pub c: f64,

    /// Damping added to squared parameter displacements.
    pub epsilon: f64,
}

impl Default for SiConfig {
    fn default() -> Self {
        Self { c: 1.0, epsilon: 0.1 }
    }
}

impl SiConfig {
    /// Sets the coefficient of the surrogate loss.
    pub fn c(mut self, v: f64) -> Self {
        self.c = v;
        self
    }

    /// Sets the damping constant.
    pub fn epsilon(mut self, v: f64) -> Self {
        self.epsilon = v;
        self
    }
}

/// Configuration of [`Agem`].
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct AgemConfig {
    /// Total number of samples kept over all tasks.
    pub memory_budget: usize,

    /// Batch size of the reference gradient.
    pub ref_grad_batch_size: usize,
}

impl Default for AgemConfig {
    fn default() -> Self {
        Self {
            memory_budget: 2000,
            ref_grad_batch_size: 128,
        }
    }
}

impl AgemConfig {
    /// Sets the memory budget.
    pub fn memory_budget(mut self, v: usize) -> Self {
        self.memory_budget = v;
        self
    }

    /// Sets the batch size of the reference gradient.
    pub fn ref_grad_batch_size(mut self, v: usize) -> Self {
        self.ref_grad_batch_size = v;
        self
    }
}

/// Configuration of [`Regularizer`].
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub enum RegularizerConfig {
    Ewc(EwcConfig),
    Si(SiConfig),
    Agem(AgemConfig),
}

impl RegularizerConfig {
    /// Default configuration of the regularizer named `name`, one of `ewc`, `si` and `agem`.
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "ewc" => Ok(Self::Ewc(EwcConfig::default())),
            "si" => Ok(Self::Si(SiConfig::default())),
            "agem" => Ok(Self::Agem(AgemConfig::default())),
            _ => Err(ClrlError::Config(format!("Unknown regularizer: {}", name)).into()),
        }
    }

    /// Builds the regularizer over `params`.
    pub fn build(&self, params: ParamTable) -> Result<Regularizer> {
        let check = |ok: bool, msg: &str| -> Result<()> {
            if ok {
                Ok(())
            } else {
                Err(ClrlError::Config(msg.to_string()).into())
            }
        };

        match self {
            Self::Ewc(config) => {
                check(config.fisher_iters > 0, "fisher_iters must be positive")?;
                check(config.rollout_steps > 0, "rollout_steps must be positive")?;
                info!("Build EWC over {} variables", params.len());
                Ok(Regularizer::Ewc(Ewc::new(params, config.clone())))
            }
            Self::Si(config) => {
                check(config.epsilon > 0.0, "epsilon must be positive")?;
                info!("Build SI over {} variables", params.len());
                Ok(Regularizer::Si(Si::new(params, config.clone())))
            }
            Self::Agem(config) => {
                check(config.memory_budget > 0, "memory_budget must be positive")?;
                check(
                    config.ref_grad_batch_size > 0,
                    "ref_grad_batch_size must be positive",
                )?;
                info!("Build AGEM over {} variables", params.len());
                Ok(Regularizer::Agem(Agem::new(params, config.clone())))
            }
        }
    }

    /// Constructs [`RegularizerConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path_ = path.as_ref().to_owned();
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        info!("Load config of regularizer from {}", path_.to_str().unwrap_or_default());
        Ok(b)
    }

    /// Saves [`RegularizerConfig`].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path_ = path.as_ref().to_owned();
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        info!("Save config of regularizer into {}", path_.to_str().unwrap_or_default());
        Ok(())
    }
}
