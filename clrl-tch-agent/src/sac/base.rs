use super::{Actor, Critic, EntCoef, SacConfig};
use crate::{
    ensemble::SsEnsemble,
    model::ModelBase,
    regularizer::{GradientSource, ParamTable, Regularizer, Sample, TaskContext},
    util::scalar,
};
use anyhow::Result;
use clrl_core::{
    error::ClrlError,
    record::{Record, RecordValue},
    Agent, Env, Policy, ReplayBufferBase, TransitionBatch,
};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    marker::PhantomData,
    path::Path,
};
use tch::{no_grad, Device, Kind, Tensor};

/// Counters saved next to the parameters.
#[derive(Debug, Deserialize, Serialize, PartialEq)]
struct SacState {
    n_updates: usize,
}

/// Actor loss `mean(alpha * log_pi(a|s) - min(Q1, Q2)(s, a))` with `a ~ pi(s)`.
///
/// Features come from the critic encoder and are detached, so the loss reaches
/// the policy only.
fn actor_loss(actor: &Actor, critic: &Critic, alpha: &Tensor, obs: &Tensor) -> (Tensor, Tensor) {
    let features = critic.encode(obs).detach();
    let (act, logp) = actor.sample(&features);
    let q = critic.q_min(&features, &act);
    let loss = (alpha * &logp - q).mean(Kind::Float);
    (loss, logp)
}

/// The actor loss seen by a regularizer.
struct ActorObjective<'a> {
    actor: &'a Actor,
    critic: &'a Critic,
    alpha: Tensor,
}

impl<'a> GradientSource for ActorObjective<'a> {
    fn loss(&self, sample: &Sample) -> Tensor {
        actor_loss(self.actor, self.critic, &self.alpha, &sample.x).0
    }
}

/// Access to the environment and the buffer of the task just finished.
struct SacTaskContext<'a, E, R> {
    objective: ActorObjective<'a>,
    env: &'a mut E,
    buffer: &'a mut R,
    device: Device,
}

impl<'a, E, R> GradientSource for SacTaskContext<'a, E, R>
where
    E: Env,
{
    fn loss(&self, sample: &Sample) -> Tensor {
        self.objective.loss(sample)
    }
}

impl<'a, E, R> TaskContext for SacTaskContext<'a, E, R>
where
    E: Env,
    E::Obs: Into<Tensor>,
    E::Act: From<Tensor>,
    R: ReplayBufferBase,
    R::Batch: TransitionBatch<ObsBatch = Tensor, ActBatch = Tensor>,
{
    /// Rollouts with stochastic actions. The environment is reset at the start and
    /// whenever an episode ends.
    fn rollouts(&mut self, n_iters: usize, n_steps: usize) -> Result<Vec<Sample>> {
        let mut obs = self.env.reset()?;
        let mut rollouts = Vec::with_capacity(n_iters);

        for _ in 0..n_iters {
            let mut xs = Vec::with_capacity(n_steps);
            for _ in 0..n_steps {
                let x: Tensor = obs.clone().into();
                let x = x.to_device(self.device).to_kind(Kind::Float);
                let act = no_grad(|| {
                    let features = self.objective.critic.encode(&x.unsqueeze(0));
                    self.objective.actor.sample(&features).0
                });
                xs.push(x);

                let step = self.env.step(&act.to_device(Device::Cpu).into())?;
                obs = if step.is_done() {
                    self.env.reset()?
                } else {
                    step.obs
                };
            }
            if !xs.is_empty() {
                rollouts.push(Sample::new(Tensor::stack(&xs, 0), None));
            }
        }
        Ok(rollouts)
    }

    fn task_samples(&mut self, n: usize) -> Result<Sample> {
        let batch = self.buffer.batch_without_replacement(n)?;
        Ok(Sample::new(batch.obs().to_device(self.device), None))
    }

    fn policy_stats(&self, x: &Tensor) -> Option<(Tensor, Tensor)> {
        let features = self.objective.critic.encode(x);
        Some(self.objective.actor.forward(&features))
    }
}

/// Soft actor critic (SAC) agent for continual learning.
///
/// The agent optionally trains a self-supervised dynamics ensemble on the critic
/// encoder and regularizes the actor against forgetting.
///
/// # Update
///
/// Every call of [`Agent::update`] with the global step `step`:
///
/// 1. Regresses both critics on `r + (1 - terminated) * gamma * V_target(s')`.
/// 2. If `step % actor_update_freq == 0`, updates the actor with the regularizer
///    and then the entropy coefficient.
/// 3. If `step % critic_target_update_freq == 0`, Polyak-averages the critic into
///    the target critic.
/// 4. If the ensemble is enabled and `step % update_freq == 0`, updates the ensemble
///    on the same batch.
pub struct Sac<E, R>
where
    E: Env,
    R: ReplayBufferBase,
{
    config: SacConfig,
    device: Device,
    actor: Actor,
    critic: Critic,
    critic_tgt: Critic,
    ent_coef: EntCoef,
    ensemble: Option<SsEnsemble>,
    regularizer: Option<Regularizer>,
    n_updates: usize,
    train: bool,
    phantom: PhantomData<(E, R)>,
}

impl<E, R> Sac<E, R>
where
    E: Env,
    E::Obs: Into<Tensor>,
    E::Act: From<Tensor>,
    R: ReplayBufferBase,
    R::Batch: TransitionBatch<ObsBatch = Tensor, ActBatch = Tensor>,
{
    /// Constructs SAC agent.
    pub fn build(config: SacConfig) -> Result<Self> {
        config.validate()?;
        if let Some(seed) = config.seed {
            tch::manual_seed(seed);
        }
        let device: Device = config
            .device
            .map(|d| d.into())
            .unwrap_or_else(Device::cuda_if_available);

        let mut critic_config = config.critic_config.clone();
        critic_config.encoder_config.in_dim = config.obs_dim;
        let num_trunk_layers = config
            .ensemble_config
            .as_ref()
            .map(|c| c.num_shared_layers)
            .unwrap_or(0);
        let critic = Critic::build(critic_config, config.act_dim, num_trunk_layers, device)?;
        let critic_tgt = critic.try_clone()?;

        let feature_dim = critic.encoder().feature_dim();
        let actor = Actor::build(
            feature_dim,
            config.act_dim,
            config.actor_config.clone(),
            device,
        )?;
        let ent_coef = EntCoef::build(config.ent_coef_mode.clone(), config.act_dim, device)?;

        let ensemble = match &config.ensemble_config {
            Some(c) => Some(SsEnsemble::build(
                c.clone(),
                &critic,
                config.act_dim,
                config.batch_size,
            )?),
            None => None,
        };
        let regularizer = match &config.regularizer_config {
            Some(c) => Some(c.build(ParamTable::from_var_store(actor.get_var_store()))?),
            None => None,
        };
        info!(
            "Build SAC agent: obs_dim = {}, act_dim = {}, ensemble = {}, regularizer = {:?}",
            config.obs_dim,
            config.act_dim,
            ensemble.is_some(),
            config.regularizer_config
        );

        Ok(Self {
            config,
            device,
            actor,
            critic,
            critic_tgt,
            ent_coef,
            ensemble,
            regularizer,
            n_updates: 0,
            train: false,
            phantom: PhantomData,
        })
    }

    /// The number of optimization steps done so far.
    pub fn n_updates(&self) -> usize {
        self.n_updates
    }

    /// The self-supervised ensemble, if enabled.
    pub fn ensemble(&self) -> Option<&SsEnsemble> {
        self.ensemble.as_ref()
    }

    /// The regularizer, if enabled.
    pub fn regularizer(&self) -> Option<&Regularizer> {
        self.regularizer.as_ref()
    }

    /// The critic.
    pub fn critic(&self) -> &Critic {
        &self.critic
    }

    /// The target critic.
    pub fn critic_tgt(&self) -> &Critic {
        &self.critic_tgt
    }

    /// The actor.
    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    /// Mean KL divergence from the policy stored at the boundary of `task` to the
    /// current policy.
    ///
    /// Available with the EWC regularizer only.
    pub fn kl_with_stored_policy(&self, task: usize) -> Option<f32> {
        match &self.regularizer {
            Some(Regularizer::Ewc(ewc)) => no_grad(|| {
                let stats = |x: &Tensor| self.actor.forward(&self.critic.encode(x));
                ewc.kl_with_stored_policy(task, &stats)
            }),
            _ => None,
        }
    }

    /// Predictive variance of the ensemble on a set of transitions, one value per row.
    pub fn predictive_variance(
        &self,
        obs: &Tensor,
        next_obs: &Tensor,
        act: &Tensor,
    ) -> Result<Option<Tensor>> {
        match &self.ensemble {
            Some(ensemble) => {
                let kind = ensemble.default_kind();
                let (obs, next_obs, act) = (
                    obs.to_device(self.device),
                    next_obs.to_device(self.device),
                    act.to_device(self.device),
                );
                Ok(Some(ensemble.predictive_variance(&obs, &next_obs, &act, kind)?))
            }
            None => Ok(None),
        }
    }

    fn check_batch(&self, obs: &Tensor, act: &Tensor, next_obs: &Tensor, n: usize) -> Result<()> {
        let b = n as i64;
        let expected_obs = vec![b, self.config.obs_dim];
        let expected_act = vec![b, self.config.act_dim];
        if obs.size() != expected_obs || next_obs.size() != expected_obs {
            return Err(ClrlError::ShapeMismatch(format!(
                "observations {:?} and {:?}, expected {:?}",
                obs.size(),
                next_obs.size(),
                expected_obs
            ))
            .into());
        }
        if act.size() != expected_act {
            return Err(ClrlError::ShapeMismatch(format!(
                "actions {:?}, expected {:?}",
                act.size(),
                expected_act
            ))
            .into());
        }
        Ok(())
    }

    fn update_critic(
        &mut self,
        obs: &Tensor,
        act: &Tensor,
        next_obs: &Tensor,
        reward: &Tensor,
        not_done: &Tensor,
    ) -> f32 {
        let tgt = no_grad(|| {
            let next_features = self.critic.encode(next_obs);
            let (next_act, next_logp) = self.actor.sample(&next_features);
            let tgt_features = self.critic_tgt.encode(next_obs);
            let target_v = self.critic_tgt.q_min(&tgt_features, &next_act)
                - self.ent_coef.alpha() * next_logp;
            reward + not_done * self.config.gamma * target_v
        });

        let (q1, q2) = self.critic.forward(obs, act);
        let loss = q1.mse_loss(&tgt, tch::Reduction::Mean) + q2.mse_loss(&tgt, tch::Reduction::Mean);
        self.critic.backward_step(&loss);
        scalar(&loss)
    }

    fn update_actor_and_alpha(&mut self, obs: &Tensor) -> Result<Record> {
        let mut record = Record::empty();
        self.actor.zero_grad();

        let (loss, logp) = {
            let objective = ActorObjective {
                actor: &self.actor,
                critic: &self.critic,
                alpha: self.ent_coef.alpha(),
            };
            let (loss, logp) = actor_loss(objective.actor, objective.critic, &objective.alpha, obs);
            let total = match self.regularizer.as_mut() {
                Some(reg) => {
                    reg.before_backward(&objective)?;
                    let penalty = reg.penalty();
                    record.insert("penalty", RecordValue::Scalar(scalar(&penalty)));
                    &loss + reg.strength() * penalty
                }
                None => loss.shallow_clone(),
            };
            total.backward();
            (loss, logp)
        };

        if let Some(reg) = self.regularizer.as_mut() {
            let projected = reg.adjust_gradient();
            if let Regularizer::Agem(_) = reg {
                record.insert(
                    "agem_projected",
                    RecordValue::Scalar(if projected { 1.0 } else { 0.0 }),
                );
            }
        }
        self.actor.step();
        if let Some(reg) = self.regularizer.as_mut() {
            reg.after_step();
        }
        record.insert("loss_actor", RecordValue::Scalar(scalar(&loss)));

        if let Some(loss_alpha) = self.ent_coef.update(&logp) {
            record.insert("loss_alpha", RecordValue::Scalar(loss_alpha));
        }
        record.insert(
            "alpha",
            RecordValue::Scalar(self.ent_coef.alpha().double_value(&[0]) as f32),
        );
        Ok(record)
    }

    fn update_ensemble(&mut self, obs: &Tensor, act: &Tensor, next_obs: &Tensor) -> Result<Record> {
        let ensemble = match self.ensemble.as_mut() {
            Some(ensemble) => ensemble,
            None => return Ok(Record::empty()),
        };
        let mut record = ensemble.update(obs, act, next_obs)?;
        let var = no_grad(|| {
            ensemble.predictive_variance(obs, next_obs, act, ensemble.default_kind())
        })?;
        record.insert(
            "batch_ss_preds_var",
            RecordValue::Scalar(scalar(&var.mean(Kind::Float))),
        );
        Ok(record)
    }
}

impl<E, R> Policy<E> for Sac<E, R>
where
    E: Env,
    E::Obs: Into<Tensor>,
    E::Act: From<Tensor>,
    R: ReplayBufferBase,
    R::Batch: TransitionBatch<ObsBatch = Tensor, ActBatch = Tensor>,
{
    fn sample(&mut self, obs: &E::Obs) -> E::Act {
        let obs: Tensor = obs.clone().into();
        let obs = obs.to_device(self.device).to_kind(Kind::Float).unsqueeze(0);
        let act = no_grad(|| {
            let features = self.critic.encode(&obs);
            if self.train {
                self.actor.sample(&features).0
            } else {
                self.actor.mean_action(&features)
            }
        });
        act.to_device(Device::Cpu).into()
    }
}

impl<E, R> Agent<E, R> for Sac<E, R>
where
    E: Env,
    E::Obs: Into<Tensor>,
    E::Act: From<Tensor>,
    R: ReplayBufferBase,
    R::Batch: TransitionBatch<ObsBatch = Tensor, ActBatch = Tensor>,
{
    fn train(&mut self) {
        self.train = true;
    }

    fn eval(&mut self) {
        self.train = false;
    }

    fn is_train(&self) -> bool {
        self.train
    }

    fn update(&mut self, buffer: &mut R, step: usize) -> Result<Record> {
        let batch = buffer.batch(self.config.batch_size)?;
        let (obs, act, next_obs, reward, is_terminated) = batch.unpack();
        self.check_batch(&obs, &act, &next_obs, reward.len())?;
        if is_terminated.len() != reward.len() {
            return Err(ClrlError::ShapeMismatch(format!(
                "{} rewards and {} termination flags",
                reward.len(),
                is_terminated.len()
            ))
            .into());
        }

        let obs = obs.to_device(self.device);
        let act = act.to_device(self.device);
        let next_obs = next_obs.to_device(self.device);
        let reward = Tensor::from_slice(&reward).to_device(self.device);
        let not_done =
            1.0 - Tensor::from_slice(&is_terminated).to_kind(Kind::Float).to_device(self.device);

        let mut record = Record::from_scalar("batch_reward", scalar(&reward.mean(Kind::Float)));
        let loss_critic = self.update_critic(&obs, &act, &next_obs, &reward, &not_done);
        record.insert("loss_critic", RecordValue::Scalar(loss_critic));

        if step % self.config.actor_update_freq == 0 {
            record.merge_inplace(self.update_actor_and_alpha(&obs)?);
        }

        if step % self.config.critic_target_update_freq == 0 {
            self.critic_tgt.soft_update_from(
                &self.critic,
                self.config.tau_critic,
                self.config.tau_encoder,
            )?;
        }

        let ensemble_step = self
            .ensemble
            .as_ref()
            .map(|e| e.is_update_step(step))
            .unwrap_or(false);
        if ensemble_step {
            record.merge_inplace(self.update_ensemble(&obs, &act, &next_obs)?);
        }

        self.n_updates += 1;
        debug!("step {}: critic loss {}", step, loss_critic);
        Ok(record)
    }

    fn on_task_boundary(&mut self, env: &mut E, buffer: &mut R) -> Result<Record> {
        let reg = match self.regularizer.as_mut() {
            Some(reg) => reg,
            None => return Ok(Record::empty()),
        };
        let mut ctx = SacTaskContext {
            objective: ActorObjective {
                actor: &self.actor,
                critic: &self.critic,
                alpha: self.ent_coef.alpha(),
            },
            env,
            buffer,
            device: self.device,
        };
        let record = reg.on_task_boundary(&mut ctx)?;
        info!("Consolidated task {}", reg.task_count() - 1);
        Ok(record)
    }

    fn reset_target(&mut self) -> Result<()> {
        self.critic_tgt.hard_update_from(&self.critic)?;
        info!("Reset the target critic");
        Ok(())
    }

    fn save_params(&self, path: &Path) -> Result<()> {
        std::fs::create_dir_all(path)?;
        self.actor.save(path.join("actor.pt.tch"))?;
        self.critic.save(path.join("critic.pt.tch"))?;
        self.critic_tgt.save(path.join("critic_tgt.pt.tch"))?;
        self.ent_coef.save(path.join("ent_coef.pt.tch"))?;
        if let Some(ensemble) = &self.ensemble {
            ensemble.save(path.join("ensemble.pt.tch"))?;
        }
        if let Some(reg) = &self.regularizer {
            reg.save(path.join("regularizer.pt.tch"))?;
        }

        let state = SacState {
            n_updates: self.n_updates,
        };
        let mut file = File::create(path.join("state.yaml"))?;
        file.write_all(serde_yaml::to_string(&state)?.as_bytes())?;
        Ok(())
    }

    fn load_params(&mut self, path: &Path) -> Result<()> {
        self.actor.load(path.join("actor.pt.tch"))?;
        self.critic.load(path.join("critic.pt.tch"))?;
        self.critic_tgt.load(path.join("critic_tgt.pt.tch"))?;
        self.ent_coef.load(path.join("ent_coef.pt.tch"))?;
        if let Some(ensemble) = self.ensemble.as_mut() {
            ensemble.load(path.join("ensemble.pt.tch"))?;
        }
        if let Some(reg) = self.regularizer.as_mut() {
            reg.load(path.join("regularizer.pt.tch"))?;
        }

        let file = File::open(path.join("state.yaml"))?;
        let state: SacState = serde_yaml::from_reader(BufReader::new(file))?;
        self.n_updates = state.n_updates;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        encoder::EncoderConfig,
        ensemble::SsEnsembleConfig,
        obs_act::{ArrayAct, ArrayObs},
        regularizer::{AgemConfig, EwcConfig, RegularizerConfig},
        replay_buffer::{ReplayBuffer, ReplayBufferConfig},
        sac::{ActorConfig, CriticConfig},
    };
    use clrl_core::{ExperienceBufferBase, Step, Transition};

    // Observation is `[x, 1]`; reward is `-|a - x|`, episodes last 5 steps.
    struct LineEnv {
        x: f32,
        t: usize,
    }

    impl Env for LineEnv {
        type Config = f32;
        type Obs = ArrayObs;
        type Act = ArrayAct;
        type Info = ();

        fn build(config: &Self::Config, _seed: i64) -> Result<Self> {
            Ok(Self { x: *config, t: 0 })
        }

        fn reset(&mut self) -> Result<ArrayObs> {
            self.t = 0;
            Ok(ArrayObs(vec![self.x, 1.0]))
        }

        fn step(&mut self, a: &ArrayAct) -> Result<Step<Self>> {
            self.t += 1;
            let reward = -(a.0[0] - self.x).abs();
            let obs = ArrayObs(vec![self.x, 1.0]);
            Ok(Step::new(obs, a.clone(), reward, false, self.t >= 5, ()))
        }
    }

    type Buffer = ReplayBuffer<ArrayObs, ArrayAct>;
    type Agent_ = Sac<LineEnv, Buffer>;

    fn config() -> SacConfig {
        let encoder_config = EncoderConfig::default().hidden_dim(8).feature_dim(4);
        SacConfig::default()
            .dims(2, 1)
            .actor_config(ActorConfig::default().units(vec![8]))
            .critic_config(
                CriticConfig::default()
                    .encoder_config(encoder_config)
                    .units(vec![8]),
            )
            .batch_size(8)
            .actor_update_freq(1)
            .critic_target_update_freq(1)
            .seed(42)
            .device(Device::Cpu)
    }

    fn filled_buffer(env: &mut LineEnv, n: usize) -> Result<Buffer> {
        let mut buffer = Buffer::build(
            &ReplayBufferConfig::default()
                .capacity(64)
                .obs_dim(2)
                .act_dim(1)
                .seed(1),
        );
        let mut obs = env.reset()?;
        for i in 0..n {
            let act = ArrayAct(vec![(i as f32 * 0.37).sin()]);
            let step = env.step(&act)?;
            buffer.push(Transition::from_step(obs.clone(), &step))?;
            obs = if step.is_done() { env.reset()? } else { step.obs };
        }
        Ok(buffer)
    }

    #[test]
    fn test_update_records_losses() -> Result<()> {
        let config = config().ensemble_config(
            SsEnsembleConfig::default()
                .num_members(2)
                .predictor_units(vec![8]),
        );
        let mut agent = Agent_::build(config)?;
        let mut env = LineEnv::build(&0.5, 0)?;
        let mut buffer = filled_buffer(&mut env, 20)?;
        agent.train();

        let record = agent.update(&mut buffer, 0)?;
        for key in [
            "batch_reward",
            "loss_critic",
            "loss_actor",
            "loss_alpha",
            "alpha",
            "ss_loss_fwd_0",
            "ss_loss_inv_1",
            "batch_ss_preds_var",
        ]
        .iter()
        {
            assert!(record.get(key).is_some(), "{} is missing", key);
        }
        assert_eq!(agent.n_updates(), 1);
        Ok(())
    }

    #[test]
    fn test_actor_update_is_delayed() -> Result<()> {
        let mut agent = Agent_::build(config().actor_update_freq(2))?;
        let mut env = LineEnv::build(&0.5, 0)?;
        let mut buffer = filled_buffer(&mut env, 10)?;

        assert!(agent.update(&mut buffer, 1)?.get("loss_actor").is_none());
        assert!(agent.update(&mut buffer, 2)?.get("loss_actor").is_some());
        Ok(())
    }

    #[test]
    fn test_reset_target_copies_critic() -> Result<()> {
        let mut agent = Agent_::build(config().critic_target_update_freq(100))?;
        let mut env = LineEnv::build(&0.5, 0)?;
        let mut buffer = filled_buffer(&mut env, 10)?;
        for step in 1..4 {
            agent.update(&mut buffer, step)?;
        }

        let obs = Tensor::from_slice(&[0.5f32, 1.0]).unsqueeze(0);
        let act = Tensor::from_slice(&[0.1f32]).unsqueeze(0);
        let q = agent.critic().forward(&obs, &act).0;
        assert!(!q.equal(&agent.critic_tgt().forward(&obs, &act).0));

        agent.reset_target()?;
        assert!(q.equal(&agent.critic_tgt().forward(&obs, &act).0));
        Ok(())
    }

    #[test]
    fn test_ewc_boundary_and_kl() -> Result<()> {
        let reg = RegularizerConfig::Ewc(EwcConfig::default().fisher_iters(2).rollout_steps(3));
        let mut agent = Agent_::build(config().regularizer_config(reg))?;
        let mut env = LineEnv::build(&0.5, 0)?;
        let mut buffer = filled_buffer(&mut env, 10)?;
        agent.train();

        assert!(agent.kl_with_stored_policy(0).is_none());
        let record = agent.on_task_boundary(&mut env, &mut buffer)?;
        assert!(record.get("fisher_mean").is_some());

        let kl = agent.kl_with_stored_policy(0).unwrap_or(f32::NAN);
        assert!(kl.abs() < 1e-6);

        let record = agent.update(&mut buffer, 0)?;
        assert!(record.get("penalty").is_some());
        Ok(())
    }

    #[test]
    fn test_agem_stores_task_samples() -> Result<()> {
        let reg = RegularizerConfig::Agem(AgemConfig::default().memory_budget(6).ref_grad_batch_size(4));
        let mut agent = Agent_::build(config().regularizer_config(reg))?;
        let mut env = LineEnv::build(&0.5, 0)?;
        let mut buffer = filled_buffer(&mut env, 10)?;

        let record = agent.on_task_boundary(&mut env, &mut buffer)?;
        assert_eq!(record.get("memory_size"), Some(&RecordValue::Scalar(6.0)));
        let record = agent.update(&mut buffer, 0)?;
        assert!(record.get("agem_projected").is_some());
        Ok(())
    }

    #[test]
    fn test_shape_mismatch_is_an_error() -> Result<()> {
        let mut agent = Sac::<LineEnv, Buffer>::build(config().dims(3, 1))?;
        let mut env = LineEnv::build(&0.5, 0)?;
        let mut buffer = filled_buffer(&mut env, 10)?;

        let err = match agent.update(&mut buffer, 0) {
            Ok(_) => panic!("update must fail"),
            Err(e) => e,
        };
        assert!(matches!(
            err.downcast_ref::<ClrlError>(),
            Some(ClrlError::ShapeMismatch(_))
        ));
        Ok(())
    }

    #[test]
    fn test_save_load_params() -> Result<()> {
        let reg = RegularizerConfig::Ewc(EwcConfig::default().fisher_iters(1).rollout_steps(2));
        let config = config()
            .regularizer_config(reg)
            .ensemble_config(SsEnsembleConfig::default().num_members(2).predictor_units(vec![8]));
        let mut agent = Agent_::build(config.clone())?;
        let mut env = LineEnv::build(&0.5, 0)?;
        let mut buffer = filled_buffer(&mut env, 10)?;
        agent.update(&mut buffer, 0)?;
        agent.on_task_boundary(&mut env, &mut buffer)?;

        let tmp = tempdir::TempDir::new("sac")?;
        agent.save_params(tmp.path())?;

        let mut agent2 = Agent_::build(config)?;
        agent2.load_params(tmp.path())?;
        assert_eq!(agent2.n_updates(), 1);
        assert_eq!(agent2.regularizer().map(|r| r.task_count()), Some(1));

        agent.eval();
        agent2.eval();
        let obs = ArrayObs(vec![0.5, 1.0]);
        assert_eq!(agent.sample(&obs), agent2.sample(&obs));
        Ok(())
    }
}
