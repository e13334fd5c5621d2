use super::SsEnsembleConfig;
use crate::{
    encoder::Encoder,
    mlp::{Mlp, MlpConfig},
    opt::Optimizer,
    sac::Critic,
    util::{load_var_stores, save_var_stores},
};
use anyhow::Result;
use clrl_core::{
    error::ClrlError,
    record::{Record, RecordValue},
};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tch::{nn, Kind, Reduction, Tensor};

/// Predictor whose outputs are compared across members.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone, Copy)]
pub enum PredictorKind {
    /// Predicts next features from features and action.
    Forward,

    /// Predicts the action from features of consecutive observations.
    Inverse,
}

struct Member {
    encoder: Encoder,
    fwd: Option<Mlp>,
    inv: Option<Mlp>,
}

impl Member {
    fn predictor(&self, kind: PredictorKind) -> Option<&Mlp> {
        match kind {
            PredictorKind::Forward => self.fwd.as_ref(),
            PredictorKind::Inverse => self.inv.as_ref(),
        }
    }
}

/// Ensemble of `K` self-supervised dynamics models.
///
/// Member encoders tie their first `num_shared_layers` layers to the trunk of the
/// critic encoder. The ensemble keeps its own optimizer over that trunk, so the
/// self-supervised losses shape the critic's representation.
pub struct SsEnsemble {
    config: SsEnsembleConfig,
    obs_dim: i64,
    act_dim: i64,
    encoder_vs: nn::VarStore,
    predictor_vs: nn::VarStore,
    members: Vec<Member>,
    encoder_opt: Optimizer,
    trunk_opt: Optimizer,
    predictor_opt: Optimizer,
}

impl SsEnsemble {
    /// Builds the ensemble on top of the encoder of `critic`.
    ///
    /// `batch_size` is the size of training batches, which must split evenly into members.
    pub fn build(
        config: SsEnsembleConfig,
        critic: &Critic,
        act_dim: i64,
        batch_size: usize,
    ) -> Result<Self> {
        let k = config.num_members;
        if k == 0 {
            return Err(ClrlError::Config("num_members must be positive".into()).into());
        }
        if batch_size % k != 0 {
            return Err(ClrlError::Config(format!(
                "batch size {} is not divisible by the number of members {}",
                batch_size, k
            ))
            .into());
        }
        if !config.use_fwd && !config.use_inv {
            return Err(ClrlError::Config(
                "at least one of forward and inverse predictors must be enabled".into(),
            )
            .into());
        }
        if config.num_shared_layers != critic.encoder().num_shared_layers() {
            return Err(ClrlError::Config(format!(
                "the critic encoder has {} trunk layers, the ensemble shares {}",
                critic.encoder().num_shared_layers(),
                config.num_shared_layers
            ))
            .into());
        }

        let src = critic.encoder();
        let device = critic.trunk_var_store().device();
        let encoder_vs = nn::VarStore::new(device);
        let predictor_vs = nn::VarStore::new(device);
        let feature_dim = src.feature_dim();

        let mut members = vec![];
        for i in 0..k {
            let encoder = Encoder::build_sharing(
                &(encoder_vs.root() / format!("member{}", i)),
                src,
                config.num_shared_layers,
            )?;
            let fwd = if config.use_fwd {
                let c = MlpConfig::new(
                    feature_dim + act_dim,
                    config.predictor_units.clone(),
                    feature_dim,
                    false,
                );
                Some(Mlp::build(&(predictor_vs.root() / format!("fwd{}", i)), c))
            } else {
                None
            };
            let inv = if config.use_inv {
                let c = MlpConfig::new(
                    2 * feature_dim,
                    config.predictor_units.clone(),
                    act_dim,
                    false,
                );
                Some(Mlp::build(&(predictor_vs.root() / format!("inv{}", i)), c))
            } else {
                None
            };
            members.push(Member { encoder, fwd, inv });
        }

        let encoder_opt = config.encoder_opt_config.build(&encoder_vs)?;
        let trunk_opt = config.encoder_opt_config.build(critic.trunk_var_store())?;
        let predictor_opt = config.predictor_opt_config.build(&predictor_vs)?;
        info!(
            "Build ensemble of {} members (fwd = {}, inv = {}, shared layers = {})",
            k, config.use_fwd, config.use_inv, config.num_shared_layers
        );

        Ok(Self {
            obs_dim: src.config().in_dim,
            act_dim,
            config,
            encoder_vs,
            predictor_vs,
            members,
            encoder_opt,
            trunk_opt,
            predictor_opt,
        })
    }

    /// Configuration.
    pub fn config(&self) -> &SsEnsembleConfig {
        &self.config
    }

    /// The number of members.
    pub fn num_members(&self) -> usize {
        self.members.len()
    }

    /// Returns `true` if the ensemble is trained at `step`.
    pub fn is_update_step(&self, step: usize) -> bool {
        step % self.config.update_freq.max(1) == 0
    }

    fn detach_shared(&self, k: usize) -> bool {
        self.config.stop_shared_layers_grad && k != 0
    }

    fn step(&mut self, loss: &Tensor) {
        self.encoder_opt.zero_grad();
        self.trunk_opt.zero_grad();
        self.predictor_opt.zero_grad();
        loss.backward();
        self.encoder_opt.step();
        self.trunk_opt.step();
        self.predictor_opt.step();
    }

    /// Per-member losses of `kind`, member `k` on the `k`-th slice of the batch.
    fn member_losses(
        &self,
        kind: PredictorKind,
        obs: &Tensor,
        act: &Tensor,
        next_obs: &Tensor,
    ) -> Vec<Tensor> {
        let n = obs.size()[0] / self.members.len() as i64;

        self.members
            .iter()
            .enumerate()
            .filter_map(|(k, m)| {
                let predictor = m.predictor(kind)?;
                let start = k as i64 * n;
                let (o, a, o_next) = (
                    obs.narrow(0, start, n),
                    act.narrow(0, start, n),
                    next_obs.narrow(0, start, n),
                );
                let detach = self.detach_shared(k);
                let h = m.encoder.forward(&o, detach);

                let loss = match kind {
                    PredictorKind::Forward => {
                        let h_next = m.encoder.forward(&o_next, false).detach();
                        predictor
                            .forward2(&h, &a)
                            .mse_loss(&h_next, Reduction::Mean)
                    }
                    PredictorKind::Inverse => {
                        let h_next = m.encoder.forward(&o_next, detach);
                        predictor
                            .forward2(&h, &h_next)
                            .mse_loss(&a.to_device(h.device()), Reduction::Mean)
                    }
                };
                Some(loss)
            })
            .collect()
    }

    /// Trains the members on a batch.
    ///
    /// The forward and the inverse losses, each averaged over members, are applied
    /// in two consecutive optimizer steps.
    pub fn update(&mut self, obs: &Tensor, act: &Tensor, next_obs: &Tensor) -> Result<Record> {
        let b = obs.size()[0];
        if b % self.members.len() as i64 != 0 {
            return Err(ClrlError::ShapeMismatch(format!(
                "batch of {} transitions for {} members",
                b,
                self.members.len()
            ))
            .into());
        }

        let mut record = Record::empty();
        let kinds = [(PredictorKind::Forward, "fwd"), (PredictorKind::Inverse, "inv")];
        for (kind, tag) in kinds.iter() {
            let losses = self.member_losses(*kind, obs, act, next_obs);
            if losses.is_empty() {
                continue;
            }
            for (k, loss) in losses.iter().enumerate() {
                record.insert(
                    format!("ss_loss_{}_{}", tag, k),
                    RecordValue::Scalar(loss.double_value(&[]) as f32),
                );
            }
            let loss = Tensor::stack(&losses, 0).mean(Kind::Float);
            self.step(&loss);
        }
        debug!("Ensemble update: {:?}", record.keys().collect::<Vec<_>>());
        Ok(record)
    }

    /// Variance of the members' predictions, summed over output features.
    ///
    /// Inputs are batches, or single transitions without the leading axis. Returns one
    /// value per transition; the population variance is used, so a single member
    /// gives zero.
    pub fn predictive_variance(
        &self,
        obs: &Tensor,
        next_obs: &Tensor,
        act: &Tensor,
        kind: PredictorKind,
    ) -> Result<Tensor> {
        let batched = |t: &Tensor| if t.dim() == 1 { t.unsqueeze(0) } else { t.shallow_clone() };
        let (obs, next_obs, act) = (batched(obs), batched(next_obs), batched(act));

        if obs.size() != next_obs.size()
            || obs.size().last() != Some(&self.obs_dim)
            || act.size().last() != Some(&self.act_dim)
            || obs.size()[0] != act.size()[0]
        {
            return Err(ClrlError::ShapeMismatch(format!(
                "obs {:?}, next_obs {:?}, act {:?} for obs_dim {} and act_dim {}",
                obs.size(),
                next_obs.size(),
                act.size(),
                self.obs_dim,
                self.act_dim
            ))
            .into());
        }

        tch::no_grad(|| -> Result<Tensor> {
            let mut preds = vec![];
            for m in self.members.iter() {
                let predictor = m.predictor(kind).ok_or_else(|| {
                    ClrlError::Config(format!("{:?} predictors are disabled", kind))
                })?;
                let h = m.encoder.forward(&obs, false);
                let pred = match kind {
                    PredictorKind::Forward => predictor.forward2(&h, &act),
                    PredictorKind::Inverse => {
                        predictor.forward2(&h, &m.encoder.forward(&next_obs, false))
                    }
                };
                preds.push(pred);
            }

            let preds = Tensor::stack(&preds, 0);
            let mean = preds.mean_dim(Some([0i64].as_slice()), true, Kind::Float);
            let var = (&preds - mean)
                .square()
                .mean_dim(Some([0i64].as_slice()), false, Kind::Float);
            Ok(var.sum_dim_intlist(Some([-1i64].as_slice()), false, Kind::Float))
        })
    }

    /// Predictor used for the uncertainty of training batches: forward if enabled.
    pub fn default_kind(&self) -> PredictorKind {
        if self.config.use_fwd {
            PredictorKind::Forward
        } else {
            PredictorKind::Inverse
        }
    }

    /// Save parameters of the ensemble.
    ///
    /// Shared layers belong to the critic and are not included.
    pub fn save<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        save_var_stores(
            &[("encoder", &self.encoder_vs), ("predictor", &self.predictor_vs)],
            &path,
        )?;
        info!("Save ensemble to {:?}", path.as_ref());
        Ok(())
    }

    /// Load parameters of the ensemble.
    pub fn load<T: AsRef<Path>>(&mut self, path: T) -> Result<()> {
        load_var_stores(
            &[("encoder", &self.encoder_vs), ("predictor", &self.predictor_vs)],
            &path,
        )?;
        info!("Load ensemble from {:?}", path.as_ref());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{encoder::EncoderConfig, sac::CriticConfig};
    use tch::{kind::FLOAT_CPU, Device};

    const OBS_DIM: i64 = 3;
    const ACT_DIM: i64 = 2;

    fn critic(num_trunk_layers: usize) -> Critic {
        let encoder_config = EncoderConfig::default()
            .in_dim(OBS_DIM)
            .hidden_dim(16)
            .feature_dim(6);
        let config = CriticConfig::default()
            .encoder_config(encoder_config)
            .units(vec![16]);
        Critic::build(config, ACT_DIM, num_trunk_layers, Device::Cpu).unwrap()
    }

    fn ensemble(critic: &Critic, k: usize) -> SsEnsemble {
        let config = SsEnsembleConfig::default()
            .num_members(k)
            .num_shared_layers(critic.encoder().num_shared_layers())
            .predictor_units(vec![16]);
        SsEnsemble::build(config, critic, ACT_DIM, 8).unwrap()
    }

    fn inputs(b: i64) -> (Tensor, Tensor, Tensor) {
        (
            Tensor::randn(&[b, OBS_DIM], FLOAT_CPU),
            Tensor::randn(&[b, OBS_DIM], FLOAT_CPU),
            Tensor::randn(&[b, ACT_DIM], FLOAT_CPU),
        )
    }

    /// Copies the variables of member 0 into every other member.
    fn make_identical(ensemble: &SsEnsemble) {
        for vs in [&ensemble.encoder_vs, &ensemble.predictor_vs].iter() {
            let vars = vs.variables();
            tch::no_grad(|| {
                for (name, t) in vars.iter() {
                    let dot = name.find('.').unwrap();
                    let prefix = name[..dot].trim_end_matches(|c: char| c.is_ascii_digit());
                    let src = &vars[&format!("{}0{}", prefix, &name[dot..])];
                    t.shallow_clone().copy_(src);
                }
            });
        }
    }

    fn sorted_copy(vs: &nn::VarStore) -> Vec<(String, Tensor)> {
        let mut vars = vs
            .variables()
            .into_iter()
            .map(|(n, t)| (n, t.copy()))
            .collect::<Vec<_>>();
        vars.sort_by(|a, b| a.0.cmp(&b.0));
        vars
    }

    #[test]
    fn test_single_member_has_zero_variance() -> Result<()> {
        let critic = critic(0);
        let ensemble = ensemble(&critic, 1);
        let (obs, next_obs, act) = inputs(5);
        for kind in [PredictorKind::Forward, PredictorKind::Inverse].iter() {
            let var = ensemble.predictive_variance(&obs, &next_obs, &act, *kind)?;
            assert_eq!(var.size(), vec![5]);
            assert_eq!(var.abs().max().double_value(&[]), 0.0);
        }
        Ok(())
    }

    #[test]
    fn test_identical_members_have_zero_variance() -> Result<()> {
        let critic = critic(1);
        let ensemble = ensemble(&critic, 4);
        make_identical(&ensemble);
        let (obs, next_obs, act) = inputs(5);
        let var = ensemble.predictive_variance(&obs, &next_obs, &act, PredictorKind::Forward)?;
        assert_eq!(var.abs().max().double_value(&[]), 0.0);
        Ok(())
    }

    #[test]
    fn test_divergent_members_have_positive_variance() -> Result<()> {
        let critic = critic(1);
        let ensemble = ensemble(&critic, 2);
        let (obs, next_obs, act) = inputs(4);
        let var = ensemble.predictive_variance(&obs, &next_obs, &act, PredictorKind::Inverse)?;
        assert!(var.min().double_value(&[]) > 0.0);

        // A single transition without the batch axis.
        let var = ensemble.predictive_variance(
            &obs.get(0),
            &next_obs.get(0),
            &act.get(0),
            PredictorKind::Forward,
        )?;
        assert_eq!(var.size(), vec![1]);
        Ok(())
    }

    #[test]
    fn test_shape_and_config_errors() {
        let critic = critic(0);
        let ensemble = ensemble(&critic, 2);
        let (obs, _, act) = inputs(4);
        let err = ensemble
            .predictive_variance(&obs, &obs.narrow(0, 0, 3), &act, PredictorKind::Forward)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ClrlError>(),
            Some(ClrlError::ShapeMismatch(_))
        ));

        let config = SsEnsembleConfig::default().num_members(3);
        let err = SsEnsemble::build(config, &critic, ACT_DIM, 8).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<ClrlError>(),
            Some(ClrlError::Config(_))
        ));

        let config = SsEnsembleConfig::default().num_members(2).num_shared_layers(3);
        assert!(SsEnsemble::build(config, &critic, ACT_DIM, 8).is_err());
    }

    #[test]
    fn test_update_trains_shared_trunk() -> Result<()> {
        let critic = critic(1);
        let mut ensemble = ensemble(&critic, 2);
        let trunk_before = sorted_copy(critic.trunk_var_store());

        let (obs, next_obs, act) = inputs(8);
        let record = ensemble.update(&obs, &act, &next_obs)?;
        for k in 0..2 {
            assert!(record.get_scalar(&format!("ss_loss_fwd_{}", k)).is_ok());
            assert!(record.get_scalar(&format!("ss_loss_inv_{}", k)).is_ok());
        }

        let trunk_after = sorted_copy(critic.trunk_var_store());
        assert_eq!(trunk_before.len(), trunk_after.len());
        assert!(trunk_before
            .iter()
            .zip(trunk_after.iter())
            .any(|((_, a), (_, b))| !a.equal(b)));
        Ok(())
    }

    fn grad_sum<'a>(vars: impl Iterator<Item = &'a Tensor>) -> f64 {
        vars.map(|t| {
            let g = t.grad();
            if g.defined() {
                g.abs().sum(Kind::Float).double_value(&[])
            } else {
                0.0
            }
        })
        .sum()
    }

    fn trunk_grad(critic: &Critic) -> f64 {
        grad_sum(critic.trunk_var_store().variables().values())
    }

    fn member_encoder_grad(ensemble: &SsEnsemble, k: usize) -> f64 {
        let prefix = format!("member{}.", k);
        let vars = ensemble.encoder_vs.variables();
        grad_sum(
            vars.iter()
                .filter(|(n, _)| n.starts_with(&prefix))
                .map(|(_, t)| t),
        )
    }

    #[test]
    fn test_only_first_member_trains_shared_layers() -> Result<()> {
        for kind in [PredictorKind::Forward, PredictorKind::Inverse].iter() {
            let critic = critic(1);
            let config = SsEnsembleConfig::default()
                .num_members(2)
                .num_shared_layers(1)
                .stop_shared_layers_grad(true)
                .predictor_units(vec![16]);
            let ensemble = SsEnsemble::build(config, &critic, ACT_DIM, 8)?;
            let (obs, next_obs, act) = inputs(8);
            let losses = ensemble.member_losses(*kind, &obs, &act, &next_obs);
            assert_eq!(losses.len(), 2);

            // Member 1 trains its own layers but not the trunk.
            losses[1].backward();
            assert_eq!(trunk_grad(&critic), 0.0, "{:?}", kind);
            assert!(member_encoder_grad(&ensemble, 1) > 0.0, "{:?}", kind);

            losses[0].backward();
            assert!(trunk_grad(&critic) > 0.0, "{:?}", kind);
        }
        Ok(())
    }

    #[test]
    fn test_all_members_train_shared_layers_without_isolation() -> Result<()> {
        for kind in [PredictorKind::Forward, PredictorKind::Inverse].iter() {
            let critic = critic(1);
            let ensemble = ensemble(&critic, 2);
            let (obs, next_obs, act) = inputs(8);
            let losses = ensemble.member_losses(*kind, &obs, &act, &next_obs);

            losses[1].backward();
            assert!(trunk_grad(&critic) > 0.0, "{:?}", kind);
        }
        Ok(())
    }
}
