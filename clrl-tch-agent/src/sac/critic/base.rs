use super::CriticConfig;
use crate::{
    encoder::Encoder,
    mlp::{Mlp, MlpConfig},
    opt::Optimizer,
    util::{hard_update, load_var_stores, save_var_stores, track},
};
use anyhow::Result;
use log::info;
use std::path::Path;
use tch::{nn, Device, Tensor};

/// Twin action-value functions `Q1`, `Q2` on a shared observation encoder.
///
/// Variables live in three var stores:
///
/// * `trunk`: the leading encoder layers that self-supervised ensemble members may tie to,
/// * `encoder`: the remaining encoder layers,
/// * `q`: both heads.
///
/// Encoder stores are tracked with `tau_encoder` and the heads with `tau_critic`
/// in [`Critic::soft_update_from`].
pub struct Critic {
    device: Device,
    config: CriticConfig,
    act_dim: i64,
    trunk_vs: nn::VarStore,
    encoder_vs: nn::VarStore,
    q_vs: nn::VarStore,
    encoder: Encoder,
    q1: Mlp,
    q2: Mlp,
    opts: Vec<Optimizer>,
}

impl Critic {
    /// Constructs [Critic] with `num_trunk_layers` encoder layers in the trunk.
    pub fn build(
        config: CriticConfig,
        act_dim: i64,
        num_trunk_layers: usize,
        device: Device,
    ) -> Result<Self> {
        let trunk_vs = nn::VarStore::new(device);
        let encoder_vs = nn::VarStore::new(device);
        let q_vs = nn::VarStore::new(device);

        let encoder = Encoder::build_with_trunk(
            &(trunk_vs.root() / "encoder"),
            &(encoder_vs.root() / "encoder"),
            config.encoder_config.clone(),
            num_trunk_layers,
        )?;
        let q_config = MlpConfig::new(
            encoder.feature_dim() + act_dim,
            config.units.clone(),
            1,
            false,
        );
        let q1 = Mlp::build(&(q_vs.root() / "q1"), q_config.clone());
        let q2 = Mlp::build(&(q_vs.root() / "q2"), q_config);

        let opts = vec![
            config.opt_config.build(&trunk_vs)?,
            config.opt_config.build(&encoder_vs)?,
            config.opt_config.build(&q_vs)?,
        ];

        Ok(Self {
            device,
            config,
            act_dim,
            trunk_vs,
            encoder_vs,
            q_vs,
            encoder,
            q1,
            q2,
            opts,
        })
    }

    /// Constructs a critic of the same architecture holding a copy of the variables.
    pub fn try_clone(&self) -> Result<Self> {
        let mut critic = Self::build(
            self.config.clone(),
            self.act_dim,
            self.encoder.num_shared_layers(),
            self.device,
        )?;
        critic.hard_update_from(self)?;
        Ok(critic)
    }

    /// Features of observations.
    pub fn encode(&self, obs: &Tensor) -> Tensor {
        self.encoder.forward(obs, false)
    }

    /// Action values of both heads given features, one per row.
    pub fn q(&self, features: &Tensor, act: &Tensor) -> (Tensor, Tensor) {
        let q1 = self.q1.forward2(features, act).squeeze_dim(-1);
        let q2 = self.q2.forward2(features, act).squeeze_dim(-1);
        (q1, q2)
    }

    /// Action values of both heads given observations.
    pub fn forward(&self, obs: &Tensor, act: &Tensor) -> (Tensor, Tensor) {
        self.q(&self.encode(obs), act)
    }

    /// Minimum of both heads given features.
    pub fn q_min(&self, features: &Tensor, act: &Tensor) -> Tensor {
        let (q1, q2) = self.q(features, act);
        q1.minimum(&q2)
    }

    /// Clears gradients, backpropagates `loss` and updates all variables.
    pub fn backward_step(&mut self, loss: &Tensor) {
        for opt in self.opts.iter_mut() {
            opt.zero_grad();
        }
        loss.backward();
        for opt in self.opts.iter_mut() {
            opt.step();
        }
    }

    /// Polyak averaging of the variables of `src` into `self`.
    pub fn soft_update_from(&mut self, src: &Critic, tau_critic: f64, tau_encoder: f64) -> Result<()> {
        track(&self.q_vs, &src.q_vs, tau_critic)?;
        track(&self.trunk_vs, &src.trunk_vs, tau_encoder)?;
        track(&self.encoder_vs, &src.encoder_vs, tau_encoder)?;
        Ok(())
    }

    /// Copies all variables of `src` into `self`.
    pub fn hard_update_from(&mut self, src: &Critic) -> Result<()> {
        hard_update(&mut self.q_vs, &src.q_vs)?;
        hard_update(&mut self.trunk_vs, &src.trunk_vs)?;
        hard_update(&mut self.encoder_vs, &src.encoder_vs)?;
        Ok(())
    }

    /// The encoder.
    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    /// Var store of the encoder layers shared with ensemble members.
    pub fn trunk_var_store(&self) -> &nn::VarStore {
        &self.trunk_vs
    }

    /// Save parameters of the critic.
    pub fn save<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        save_var_stores(&self.named_var_stores(), &path)?;
        info!("Save critic to {:?}", path.as_ref());
        Ok(())
    }

    /// Load parameters of the critic.
    pub fn load<T: AsRef<Path>>(&mut self, path: T) -> Result<()> {
        load_var_stores(&self.named_var_stores(), &path)?;
        info!("Load critic from {:?}", path.as_ref());
        Ok(())
    }

    fn named_var_stores(&self) -> [(&str, &nn::VarStore); 3] {
        [
            ("trunk", &self.trunk_vs),
            ("encoder", &self.encoder_vs),
            ("q", &self.q_vs),
        ]
    }
}
