//! Configuration of SAC agent.
use super::{ActorConfig, CriticConfig, EntCoefMode};
use crate::{ensemble::SsEnsembleConfig, regularizer::RegularizerConfig, Device};
use anyhow::Result;
use clrl_core::error::ClrlError;
use log::info;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Constructs [Sac](super::Sac).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct SacConfig {
    pub obs_dim: i64,
    pub act_dim: i64,
    pub actor_config: ActorConfig,
    /// The input dimension of the encoder is set to `obs_dim` at construction.
    pub critic_config: CriticConfig,
    pub gamma: f64,
    pub tau_critic: f64,
    pub tau_encoder: f64,
    pub actor_update_freq: usize,
    pub critic_target_update_freq: usize,
    pub batch_size: usize,
    pub ent_coef_mode: EntCoefMode,
    pub ensemble_config: Option<SsEnsembleConfig>,
    pub regularizer_config: Option<RegularizerConfig>,
    pub seed: Option<i64>,
    pub device: Option<Device>,
}

impl Default for SacConfig {
    fn default() -> Self {
        Self {
            obs_dim: 0,
            act_dim: 0,
            actor_config: Default::default(),
            critic_config: Default::default(),
            gamma: 0.99,
            tau_critic: 0.005,
            tau_encoder: 0.005,
            actor_update_freq: 2,
            critic_target_update_freq: 2,
            batch_size: 128,
            ent_coef_mode: EntCoefMode::Auto { init: 0.01, lr: 1e-3 },
            ensemble_config: None,
            regularizer_config: None,
            seed: None,
            device: None,
        }
    }
}

impl SacConfig {
    /// Sets the dimensions of observations and actions.
    pub fn dims(mut self, obs_dim: i64, act_dim: i64) -> Self {
        self.obs_dim = obs_dim;
        self.act_dim = act_dim;
        self
    }

    /// Sets the configuration of the actor.
    pub fn actor_config(mut self, v: ActorConfig) -> Self {
        self.actor_config = v;
        self
    }

    /// Sets the configuration of the critic.
    pub fn critic_config(mut self, v: CriticConfig) -> Self {
        self.critic_config = v;
        self
    }

    /// Discount factor.
    pub fn discount_factor(mut self, v: f64) -> Self {
        self.gamma = v;
        self
    }

    /// Sets the Polyak coefficients of the critic heads and of the encoder.
    pub fn tau(mut self, tau_critic: f64, tau_encoder: f64) -> Self {
        self.tau_critic = tau_critic;
        self.tau_encoder = tau_encoder;
        self
    }

    /// Sets the interval of actor and entropy coefficient updates.
    pub fn actor_update_freq(mut self, v: usize) -> Self {
        self.actor_update_freq = v;
        self
    }

    /// Sets the interval of target critic updates.
    pub fn critic_target_update_freq(mut self, v: usize) -> Self {
        self.critic_target_update_freq = v;
        self
    }

    /// Batch size.
    pub fn batch_size(mut self, v: usize) -> Self {
        self.batch_size = v;
        self
    }

    /// Mode of the entropy coefficient.
    pub fn ent_coef_mode(mut self, v: EntCoefMode) -> Self {
        self.ent_coef_mode = v;
        self
    }

    /// Enables the self-supervised ensemble.
    pub fn ensemble_config(mut self, v: SsEnsembleConfig) -> Self {
        self.ensemble_config = Some(v);
        self
    }

    /// Enables a regularizer on the actor.
    pub fn regularizer_config(mut self, v: RegularizerConfig) -> Self {
        self.regularizer_config = Some(v);
        self
    }

    /// Random seed.
    pub fn seed(mut self, seed: i64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Device.
    pub fn device(mut self, device: tch::Device) -> Self {
        self.device = Some(device.into());
        self
    }

    /// Checks the numeric conventions of the parameters.
    pub fn validate(&self) -> Result<()> {
        let check = |ok: bool, msg: String| -> Result<()> {
            if ok {
                Ok(())
            } else {
                Err(ClrlError::Config(msg).into())
            }
        };
        check(self.obs_dim > 0, format!("obs_dim = {}", self.obs_dim))?;
        check(self.act_dim > 0, format!("act_dim = {}", self.act_dim))?;
        check(
            (0.0..1.0).contains(&self.gamma),
            format!("gamma = {} is not in [0, 1)", self.gamma),
        )?;
        for tau in [self.tau_critic, self.tau_encoder].iter() {
            check(
                *tau > 0.0 && *tau <= 1.0,
                format!("tau = {} is not in (0, 1]", tau),
            )?;
        }
        check(self.batch_size > 0, "batch_size must be positive".into())?;
        check(
            self.actor_update_freq > 0 && self.critic_target_update_freq > 0,
            "update frequencies must be positive".into(),
        )?;
        if let Some(ensemble) = &self.ensemble_config {
            check(
                ensemble.update_freq > 0,
                "update_freq of the ensemble must be positive".into(),
            )?;
        }
        Ok(())
    }

    /// Constructs [SacConfig] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path_ = path.as_ref().to_owned();
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        info!("Load config of SAC agent from {}", path_.to_str().unwrap_or_default());
        Ok(b)
    }

    /// Saves [SacConfig].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path_ = path.as_ref().to_owned();
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        info!("Save config of SAC agent into {}", path_.to_str().unwrap_or_default());
        Ok(())
    }
}
