//! Entropy coefficient of SAC.
use crate::opt::{Optimizer, OptimizerConfig};
use anyhow::Result;
use log::{info, trace};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tch::{nn, Kind, Tensor};

/// Mode of the entropy coefficient of SAC.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub enum EntCoefMode {
    /// Use a constant as alpha.
    Fix(f64),

    /// Automatic tuning towards the target entropy `-act_dim`.
    Auto {
        /// Initial value of alpha.
        init: f64,
        /// Learning rate.
        lr: f64,
    },
}

impl Default for EntCoefMode {
    fn default() -> Self {
        Self::Auto { init: 0.01, lr: 1e-3 }
    }
}

/// The entropy coefficient of SAC, stored as `log_alpha`.
pub struct EntCoef {
    var_store: nn::VarStore,
    log_alpha: Tensor,
    target_entropy: f64,
    opt: Option<Optimizer>,
}

impl EntCoef {
    /// Constructs an instance of `EntCoef` for actions of dimension `act_dim`.
    pub fn build(mode: EntCoefMode, act_dim: i64, device: tch::Device) -> Result<Self> {
        let var_store = nn::VarStore::new(device);
        let path = var_store.root();
        let (log_alpha, opt) = match mode {
            EntCoefMode::Fix(alpha) => {
                let log_alpha = path.var("log_alpha", &[1], nn::Init::Const(alpha.ln()));
                (log_alpha, None)
            }
            EntCoefMode::Auto { init, lr } => {
                let log_alpha = path.var("log_alpha", &[1], nn::Init::Const(init.ln()));
                let opt = OptimizerConfig::Adam { lr }.build(&var_store)?;
                (log_alpha, Some(opt))
            }
        };

        Ok(Self {
            var_store,
            log_alpha,
            target_entropy: -(act_dim as f64),
            opt,
        })
    }

    /// Returns the entropy coefficient, detached from the graph.
    pub fn alpha(&self) -> Tensor {
        self.log_alpha.detach().exp()
    }

    /// Target entropy.
    pub fn target_entropy(&self) -> f64 {
        self.target_entropy
    }

    /// Updates `log_alpha` given log probabilities of sampled actions.
    ///
    /// Returns the loss, or `None` if the coefficient is fixed.
    pub fn update(&mut self, logp: &Tensor) -> Option<f32> {
        let opt = self.opt.as_mut()?;
        let alpha = self.log_alpha.exp();
        let loss = (alpha * (-logp - self.target_entropy).detach()).mean(Kind::Float);
        opt.backward_step(&loss);
        Some(loss.double_value(&[]) as f32)
    }

    /// Save the parameter into a file.
    pub fn save<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        self.var_store.save(&path)?;
        info!("Save entropy coefficient to {:?}", path.as_ref());
        let vs = self.var_store.variables();
        for (name, _) in vs.iter() {
            trace!("Save variable {}", name);
        }
        Ok(())
    }

    /// Load the parameter from a file.
    pub fn load<T: AsRef<Path>>(&mut self, path: T) -> Result<()> {
        self.var_store.load(&path)?;
        info!("Load entropy coefficient from {:?}", path.as_ref());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_alpha_and_target() -> Result<()> {
        let ent_coef = EntCoef::build(EntCoefMode::default(), 3, tch::Device::Cpu)?;
        assert!((ent_coef.alpha().double_value(&[0]) - 0.01).abs() < 1e-6);
        assert_eq!(ent_coef.target_entropy(), -3.0);
        Ok(())
    }

    #[test]
    fn test_alpha_grows_when_entropy_is_low() -> Result<()> {
        let mut ent_coef = EntCoef::build(
            EntCoefMode::Auto { init: 0.1, lr: 1e-2 },
            1,
            tch::Device::Cpu,
        )?;
        // Entropy estimate -logp = -5 is below the target -1.
        let logp = Tensor::from_slice(&[5f32, 5.0]);
        for _ in 0..10 {
            assert!(ent_coef.update(&logp).is_some());
        }
        assert!(ent_coef.alpha().double_value(&[0]) > 0.1);

        let mut fixed = EntCoef::build(EntCoefMode::Fix(0.2), 1, tch::Device::Cpu)?;
        assert!(fixed.update(&logp).is_none());
        Ok(())
    }
}
