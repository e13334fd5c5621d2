//! Runs an [`Agent`] through a sequence of tasks.
mod config;
use crate::{
    error::ClrlError,
    record::{AggregateRecorder, Record, RecordValue},
    Agent, Env, ExperienceBufferBase, ReplayBufferBase, Transition,
};
use anyhow::Result;
pub use config::ContinualTrainerConfig;
use log::{debug, info, warn};
use std::path::Path;

/// Phase of [`ContinualTrainer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPhase {
    /// Interacting with the environment of the current task and optimizing the agent.
    Collecting,

    /// Consolidating the agent after the last step of a task.
    Consolidating,
}

#[cfg_attr(doc, aquamarine::aquamarine)]
/// Task boundary controller.
///
/// # Training loop
///
/// For every task `t` of the sequence given to [`ContinualTrainer::build`]:
///
/// 1. Build the environment of task `t` with seed `seed + t` and reset it.
/// 2. Repeat `train_steps_per_task` times (phase [`TaskPhase::Collecting`]):
///     1. If `task_step >= init_steps` and the buffer is not empty, call [`Agent::update`]
///        `num_train_iters` times with the global step counter.
///     2. Sample an action, step the environment and push the transition into the
///        replay buffer. Reset the environment when the episode ends.
///     3. `task_step += 1`, `total_steps += 1`.
/// 3. Phase [`TaskPhase::Consolidating`]: call [`Agent::on_task_boundary`], reset the
///    target networks with [`Agent::reset_target`] and clear the replay buffer.
/// 4. `task_index += 1`, `task_step = 0`, back to [`TaskPhase::Collecting`].
///
/// ```mermaid
/// stateDiagram-v2
///     [*] --> Collecting
///     Collecting --> Collecting: task_step < train_steps_per_task
///     Collecting --> Consolidating: task_step == train_steps_per_task
///     Consolidating --> Collecting: next task
/// ```
///
/// The counters are fields of the trainer, so independent runs can live in one process.
pub struct ContinualTrainer<E, R>
where
    E: Env,
    R: ExperienceBufferBase<Item = Transition<E::Obs, E::Act>> + ReplayBufferBase,
{
    config: ContinualTrainerConfig,
    task_configs: Vec<E::Config>,
    replay_buffer_config: R::Config,
    phase: TaskPhase,
    task_index: usize,
    task_step: usize,
    total_steps: usize,
    episode_reward: f32,
}

impl<E, R> ContinualTrainer<E, R>
where
    E: Env,
    R: ExperienceBufferBase<Item = Transition<E::Obs, E::Act>> + ReplayBufferBase,
{
    /// Constructs a trainer over a sequence of task configurations.
    pub fn build(
        config: ContinualTrainerConfig,
        task_configs: Vec<E::Config>,
        replay_buffer_config: R::Config,
    ) -> Result<Self> {
        if config.train_steps_per_task == 0 {
            return Err(ClrlError::Config("train_steps_per_task must be positive".into()).into());
        }
        if config.flush_interval == 0 || config.save_interval == 0 {
            return Err(ClrlError::Config("intervals must be positive".into()).into());
        }
        if config.init_steps >= config.train_steps_per_task {
            warn!(
                "init_steps ({}) covers the whole task, no update will be done",
                config.init_steps
            );
        }

        Ok(Self {
            config,
            task_configs,
            replay_buffer_config,
            phase: TaskPhase::Collecting,
            task_index: 0,
            task_step: 0,
            total_steps: 0,
            episode_reward: 0.0,
        })
    }

    /// Current phase.
    pub fn phase(&self) -> TaskPhase {
        self.phase
    }

    /// Index of the current task.
    pub fn task_index(&self) -> usize {
        self.task_index
    }

    /// Environment steps done in the current task.
    pub fn task_step(&self) -> usize {
        self.task_step
    }

    /// Environment steps done since the trainer was built.
    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    /// The number of tasks in the sequence.
    pub fn num_tasks(&self) -> usize {
        self.task_configs.len()
    }

    fn save_model<A: Agent<E, R>>(agent: &A, model_dir: &Path) {
        match agent.save_params(model_dir) {
            Ok(()) => info!("Saved the model in {:?}", model_dir),
            Err(e) => warn!("Failed to save model in {:?}: {}", model_dir, e),
        }
    }

    /// Performs a training step on the current task.
    ///
    /// Optimization steps come first, then an environment step. Returns the next
    /// observation and the records of the step.
    pub fn train_step<A>(
        &mut self,
        agent: &mut A,
        env: &mut E,
        buffer: &mut R,
        obs: E::Obs,
    ) -> Result<(E::Obs, Record)>
    where
        A: Agent<E, R>,
    {
        debug_assert_eq!(self.phase, TaskPhase::Collecting);
        let mut record = Record::empty();

        if self.task_step >= self.config.init_steps && buffer.len() > 0 {
            for _ in 0..self.config.num_train_iters {
                record.merge_inplace(agent.update(buffer, self.total_steps)?);
            }
        }

        let act = agent.sample(&obs);
        let step = env.step(&act)?;
        self.episode_reward += step.reward;
        let is_done = step.is_done();
        let transition = Transition::from_step(obs, &step);
        buffer.push(transition)?;

        let next_obs = if is_done {
            record.insert("episode_reward", RecordValue::Scalar(self.episode_reward));
            debug!(
                "task {} step {}: episode reward {}",
                self.task_index, self.task_step, self.episode_reward
            );
            self.episode_reward = 0.0;
            env.reset()?
        } else {
            step.obs
        };

        self.task_step += 1;
        self.total_steps += 1;

        if self.total_steps % self.config.save_interval == 0 {
            if let Some(model_dir) = &self.config.model_dir {
                let path = Path::new(model_dir).join(self.total_steps.to_string());
                Self::save_model(agent, &path);
            }
        }

        Ok((next_obs, record))
    }

    /// Consolidates the agent at the end of the current task.
    pub fn consolidate<A>(&mut self, agent: &mut A, env: &mut E, buffer: &mut R) -> Result<Record>
    where
        A: Agent<E, R>,
    {
        self.phase = TaskPhase::Consolidating;
        info!(
            "Consolidating task {} after {} steps",
            self.task_index, self.task_step
        );

        let mut record = agent.on_task_boundary(env, buffer)?;
        agent.reset_target()?;
        buffer.clear();

        if let Some(model_dir) = &self.config.model_dir {
            let path = Path::new(model_dir).join(format!("task_{}", self.task_index));
            Self::save_model(agent, &path);
        }

        record.insert("task_index", RecordValue::Scalar(self.task_index as f32));
        self.task_index += 1;
        self.task_step = 0;
        self.episode_reward = 0.0;
        self.phase = TaskPhase::Collecting;
        Ok(record)
    }

    /// Trains the agent on every task of the sequence.
    pub fn train<A>(&mut self, agent: &mut A, recorder: &mut dyn AggregateRecorder) -> Result<()>
    where
        A: Agent<E, R>,
    {
        let mut buffer = R::build(&self.replay_buffer_config);
        agent.train();

        while self.task_index < self.task_configs.len() {
            let seed = self.config.seed + self.task_index as i64;
            let mut env = E::build(&self.task_configs[self.task_index], seed)?;
            let mut obs = env.reset()?;
            info!("Start task {}", self.task_index);

            while self.task_step < self.config.train_steps_per_task {
                let (next_obs, record) = self.train_step(agent, &mut env, &mut buffer, obs)?;
                obs = next_obs;
                recorder.store(record);

                if self.total_steps % self.config.flush_interval == 0 {
                    recorder.flush(self.total_steps as i64);
                }
            }

            let record = self.consolidate(agent, &mut env, &mut buffer)?;
            recorder.store(record);
            recorder.flush(self.total_steps as i64);
        }

        info!("Finished {} tasks", self.task_configs.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{record::BufferedRecorder, Act, Obs, Policy, Step};

    #[derive(Clone, Debug)]
    struct MockObs(f32);

    impl Obs for MockObs {}

    #[derive(Clone, Debug)]
    struct MockAct(f32);

    impl Act for MockAct {}

    // Episodes end every `episode_len` steps; reward is 1 per step.
    struct MockEnv {
        t: usize,
        episode_len: usize,
    }

    impl Env for MockEnv {
        type Config = usize;
        type Obs = MockObs;
        type Act = MockAct;
        type Info = ();

        fn build(config: &Self::Config, _seed: i64) -> Result<Self> {
            Ok(Self {
                t: 0,
                episode_len: *config,
            })
        }

        fn reset(&mut self) -> Result<Self::Obs> {
            self.t = 0;
            Ok(MockObs(0.0))
        }

        fn step(&mut self, a: &Self::Act) -> Result<Step<Self>> {
            self.t += 1;
            let done = self.t >= self.episode_len;
            Ok(Step::new(MockObs(self.t as f32), a.clone(), 1.0, done, false, ()))
        }
    }

    #[derive(Default)]
    struct MockBuffer {
        items: Vec<Transition<MockObs, MockAct>>,
        cleared: usize,
    }

    impl ExperienceBufferBase for MockBuffer {
        type Item = Transition<MockObs, MockAct>;

        fn push(&mut self, tr: Self::Item) -> Result<()> {
            self.items.push(tr);
            Ok(())
        }

        fn len(&self) -> usize {
            self.items.len()
        }
    }

    impl ReplayBufferBase for MockBuffer {
        type Config = ();
        type Batch = ();

        fn build(_config: &Self::Config) -> Self {
            Self::default()
        }

        fn batch(&mut self, _size: usize) -> Result<Self::Batch> {
            Ok(())
        }

        fn batch_without_replacement(&mut self, _size: usize) -> Result<Self::Batch> {
            Ok(())
        }

        fn clear(&mut self) {
            self.items.clear();
            self.cleared += 1;
        }
    }

    #[derive(Default)]
    struct MockAgent {
        update_steps: Vec<usize>,
        boundary_buffer_lens: Vec<usize>,
        target_resets: usize,
        train: bool,
    }

    impl Policy<MockEnv> for MockAgent {
        fn sample(&mut self, obs: &MockObs) -> MockAct {
            MockAct(obs.0)
        }
    }

    impl Agent<MockEnv, MockBuffer> for MockAgent {
        fn train(&mut self) {
            self.train = true;
        }

        fn eval(&mut self) {
            self.train = false;
        }

        fn is_train(&self) -> bool {
            self.train
        }

        fn update(&mut self, _buffer: &mut MockBuffer, step: usize) -> Result<Record> {
            self.update_steps.push(step);
            Ok(Record::from_scalar("loss", step as f32))
        }

        fn on_task_boundary(
            &mut self,
            _env: &mut MockEnv,
            buffer: &mut MockBuffer,
        ) -> Result<Record> {
            self.boundary_buffer_lens.push(buffer.len());
            Ok(Record::empty())
        }

        fn reset_target(&mut self) -> Result<()> {
            self.target_resets += 1;
            Ok(())
        }

        fn save_params(&self, _path: &Path) -> Result<()> {
            Ok(())
        }

        fn load_params(&mut self, _path: &Path) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_task_sequence() -> Result<()> {
        let _ = env_logger::builder().is_test(true).try_init();
        let config = ContinualTrainerConfig::default()
            .train_steps_per_task(5)
            .init_steps(2)
            .num_train_iters(1);
        let mut trainer = ContinualTrainer::<MockEnv, MockBuffer>::build(config, vec![3, 3], ())?;
        let mut agent = MockAgent::default();
        let mut recorder = BufferedRecorder::new();

        trainer.train(&mut agent, &mut recorder)?;

        // No updates during the first two steps of each task.
        assert_eq!(agent.update_steps, vec![2, 3, 4, 7, 8, 9]);
        // The buffer still holds the whole task at the boundary.
        assert_eq!(agent.boundary_buffer_lens, vec![5, 5]);
        assert_eq!(agent.target_resets, 2);
        assert!(agent.train);
        assert_eq!(trainer.task_index(), 2);
        assert_eq!(trainer.task_step(), 0);
        assert_eq!(trainer.total_steps(), 10);
        assert_eq!(trainer.phase(), TaskPhase::Collecting);

        let rewards = recorder.scalars("episode_reward");
        assert_eq!(rewards.len(), 2);
        assert!(rewards.iter().all(|(_, r)| *r == 3.0));
        Ok(())
    }

    #[test]
    fn test_consolidate_resets_counters() -> Result<()> {
        let config = ContinualTrainerConfig::default().train_steps_per_task(3);
        let mut trainer = ContinualTrainer::<MockEnv, MockBuffer>::build(config, vec![10], ())?;
        let mut agent = MockAgent::default();
        let mut env = MockEnv::build(&10, 0)?;
        let mut buffer = MockBuffer::default();

        let mut obs = env.reset()?;
        for _ in 0..3 {
            obs = trainer.train_step(&mut agent, &mut env, &mut buffer, obs)?.0;
        }
        assert_eq!(buffer.len(), 3);
        assert_eq!(trainer.task_step(), 3);

        let record = trainer.consolidate(&mut agent, &mut env, &mut buffer)?;
        assert_eq!(record.get_scalar("task_index")?, 0.0);
        assert_eq!(buffer.len(), 0);
        assert_eq!(buffer.cleared, 1);
        assert_eq!(trainer.task_index(), 1);
        assert_eq!(trainer.task_step(), 0);
        assert_eq!(trainer.total_steps(), 3);
        Ok(())
    }

    #[test]
    fn test_zero_steps_per_task_is_config_error() {
        let config = ContinualTrainerConfig::default();
        let err = ContinualTrainer::<MockEnv, MockBuffer>::build(config, vec![1], ())
            .err()
            .unwrap();
        assert!(matches!(
            err.downcast_ref::<ClrlError>(),
            Some(ClrlError::Config(_))
        ));
    }
}
