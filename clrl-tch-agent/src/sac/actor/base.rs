use super::ActorConfig;
use crate::{
    mlp::{Mlp, MlpConfig},
    model::ModelBase,
    opt::Optimizer,
};
use anyhow::Result;
use log::{info, trace};
use std::path::Path;
use tch::{nn, Device, Kind, Tensor};

fn normal_logp(x: &Tensor) -> Tensor {
    let tmp: Tensor = Tensor::from(-0.5 * (2.0 * std::f32::consts::PI).ln() as f32)
        - 0.5 * x.pow_tensor_scalar(2);
    tmp.sum_dim_intlist(Some([-1].as_slice()), false, Kind::Float)
}

/// Squashed Gaussian policy on encoder features.
///
/// The head outputs the mean and a `tanh`-rescaled log standard deviation in
/// `[log_std_min, log_std_max]`. Actions are `tanh` of Gaussian samples.
pub struct Actor {
    var_store: nn::VarStore,
    pi: Mlp,
    act_dim: i64,
    log_std_min: f64,
    log_std_max: f64,
    opt: Optimizer,
}

impl Actor {
    /// Constructs [Actor] taking features of dimension `in_dim`.
    pub fn build(in_dim: i64, act_dim: i64, config: ActorConfig, device: Device) -> Result<Self> {
        let var_store = nn::VarStore::new(device);
        let pi_config = MlpConfig::new(in_dim, config.units.clone(), 2 * act_dim, false);
        let pi = Mlp::build(&(var_store.root() / "pi"), pi_config);
        let opt = config.opt_config.build(&var_store)?;

        Ok(Self {
            var_store,
            pi,
            act_dim,
            log_std_min: config.log_std_min,
            log_std_max: config.log_std_max,
            opt,
        })
    }

    /// Outputs the mean and the log standard deviation of the Gaussian given features.
    pub fn forward(&self, features: &Tensor) -> (Tensor, Tensor) {
        let out = self.pi.forward(features);
        let mean = out.narrow(-1, 0, self.act_dim);
        let log_std = out.narrow(-1, self.act_dim, self.act_dim).tanh();
        let log_std =
            self.log_std_min + 0.5 * (self.log_std_max - self.log_std_min) * (log_std + 1.0);
        (mean, log_std)
    }

    /// Draws squashed actions with the reparameterization trick.
    ///
    /// Returns the actions and their log probabilities, one per row.
    pub fn sample(&self, features: &Tensor) -> (Tensor, Tensor) {
        let (mean, log_std) = self.forward(features);
        let z = mean.randn_like();
        let a = (&mean + &z * log_std.exp()).tanh();
        let log_p = normal_logp(&z)
            - log_std.sum_dim_intlist(Some([-1].as_slice()), false, Kind::Float)
            - ((Tensor::from(1f32) - a.pow_tensor_scalar(2.0)).relu() + 1e-6)
                .log()
                .sum_dim_intlist(Some([-1].as_slice()), false, Kind::Float);
        (a, log_p)
    }

    /// Deterministic action, `tanh` of the mean.
    pub fn mean_action(&self, features: &Tensor) -> Tensor {
        self.forward(features).0.tanh()
    }

    /// Dimension of actions.
    pub fn act_dim(&self) -> i64 {
        self.act_dim
    }

    /// Clears the gradients of the policy.
    pub fn zero_grad(&mut self) {
        self.opt.zero_grad();
    }

    /// Applies the current gradients.
    pub fn step(&mut self) {
        self.opt.step();
    }
}

impl ModelBase for Actor {
    fn backward_step(&mut self, loss: &Tensor) {
        self.opt.backward_step(loss);
    }

    fn get_var_store_mut(&mut self) -> &mut nn::VarStore {
        &mut self.var_store
    }

    fn get_var_store(&self) -> &nn::VarStore {
        &self.var_store
    }

    fn save<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        self.var_store.save(&path)?;
        info!("Save actor to {:?}", path.as_ref());
        let vs = self.var_store.variables();
        for (name, _) in vs.iter() {
            trace!("Save variable {}", name);
        }
        Ok(())
    }

    fn load<T: AsRef<Path>>(&mut self, path: T) -> Result<()> {
        self.var_store.load(&path)?;
        info!("Load actor from {:?}", path.as_ref());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::kind::FLOAT_CPU;

    fn actor() -> Actor {
        let config = ActorConfig::default().units(vec![16]).log_std_range(-5.0, 1.0);
        Actor::build(4, 2, config, Device::Cpu).unwrap()
    }

    #[test]
    fn test_log_std_is_bounded() {
        let actor = actor();
        let x = Tensor::randn(&[32, 4], FLOAT_CPU) * 100.0;
        let (mean, log_std) = actor.forward(&x);
        assert_eq!(mean.size(), vec![32, 2]);
        assert!(log_std.min().double_value(&[]) >= -5.0);
        assert!(log_std.max().double_value(&[]) <= 1.0);
    }

    #[test]
    fn test_sample_shapes_and_range() {
        let actor = actor();
        let x = Tensor::randn(&[8, 4], FLOAT_CPU);
        let (a, log_p) = actor.sample(&x);
        assert_eq!(a.size(), vec![8, 2]);
        assert_eq!(log_p.size(), vec![8]);
        assert!(a.abs().max().double_value(&[]) <= 1.0);
    }
}
