use super::{count_tensor, lookup, AgemConfig, GradientSource, ParamTable, Sample, TaskContext};
use anyhow::Result;
use clrl_core::record::{Record, RecordValue};
use log::{debug, info};
use std::collections::HashMap;
use tch::{Kind, Tensor};

/// Fixed-budget memory of samples of past tasks.
///
/// Each task keeps at most `budget / num_tasks` samples; adding a task truncates
/// the stored tasks to the new share.
pub struct EpisodicMemory {
    budget: usize,
    tasks: Vec<Sample>,
}

impl EpisodicMemory {
    /// Creates an empty memory.
    pub fn new(budget: usize) -> Self {
        Self {
            budget,
            tasks: vec![],
        }
    }

    /// Share of each task once the next task is added.
    pub fn per_task_size(&self) -> usize {
        self.budget / (self.tasks.len() + 1)
    }

    /// The number of stored tasks.
    pub fn num_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Stored samples of each task.
    pub fn tasks(&self) -> &[Sample] {
        &self.tasks
    }

    /// Total number of stored samples.
    pub fn len(&self) -> usize {
        self.tasks.iter().map(|s| s.len()).sum()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Adds a random subset of `sample`, without replacement, as a new task.
    pub fn push(&mut self, sample: Sample) {
        let size = self.per_task_size();
        for task in self.tasks.iter_mut() {
            let n = task.len().min(size);
            *task = task.narrow(0, n);
        }

        let n = sample.len().min(size);
        let ixs = Tensor::randperm(sample.len() as i64, (Kind::Int64, sample.x.device()))
            .narrow(0, 0, n as i64);
        self.tasks.push(sample.index_select(&ixs));
    }

    /// Draws `n` samples uniformly, with replacement, from all stored tasks.
    pub fn sample(&self, n: usize) -> Option<Sample> {
        if self.is_empty() {
            return None;
        }
        let pool = Sample::cat(&self.tasks);
        let ixs = Tensor::randint(
            pool.len() as i64,
            &[n as i64],
            (Kind::Int64, pool.x.device()),
        );
        Some(pool.index_select(&ixs))
    }
}

/// Projects `grad` so that it does not increase the loss whose gradient is `ref_grad`.
///
/// If `grad . ref_grad < 0`, returns `grad - (grad . ref_grad) / (ref_grad . ref_grad) * ref_grad`
/// and `true`; otherwise `grad` unchanged and `false`.
pub fn project_gradient(grad: &Tensor, ref_grad: &Tensor) -> (Tensor, bool) {
    let angle = (grad * ref_grad).sum(Kind::Float).double_value(&[]);
    if angle < 0.0 {
        let ref_norm2 = (ref_grad * ref_grad).sum(Kind::Float).double_value(&[]);
        (grad - ref_grad * (angle / ref_norm2), true)
    } else {
        (grad.shallow_clone(), false)
    }
}

/// Averaged gradient episodic memory.
pub struct Agem {
    params: ParamTable,
    config: AgemConfig,
    memory: EpisodicMemory,
    ref_grad: Option<Tensor>,
    task_count: usize,
}

impl Agem {
    pub(super) fn new(params: ParamTable, config: AgemConfig) -> Self {
        let memory = EpisodicMemory::new(config.memory_budget);
        Self {
            params,
            config,
            memory,
            ref_grad: None,
            task_count: 0,
        }
    }

    /// Configuration.
    pub fn config(&self) -> &AgemConfig {
        &self.config
    }

    /// The regularized variables.
    pub fn params(&self) -> &ParamTable {
        &self.params
    }

    /// The number of consolidated tasks.
    pub fn task_count(&self) -> usize {
        self.task_count
    }

    /// Episodic memory.
    pub fn memory(&self) -> &EpisodicMemory {
        &self.memory
    }

    /// Computes the reference gradient on a replay batch, then clears the gradients.
    ///
    /// Without memory the reference gradient is unset and [`Agem::project`] is a no-op.
    pub(super) fn compute_ref_grad(&mut self, src: &dyn GradientSource) -> Result<()> {
        self.ref_grad = None;
        let sample = match self.memory.sample(self.config.ref_grad_batch_size) {
            Some(sample) => sample,
            None => return Ok(()),
        };

        self.params.zero_grad();
        src.loss(&sample).backward();
        self.ref_grad = Some(self.params.flat_grad());
        self.params.zero_grad();
        Ok(())
    }

    /// Projects the current gradients against the reference gradient.
    pub(super) fn project(&mut self) -> bool {
        let ref_grad = match self.ref_grad.take() {
            Some(ref_grad) => ref_grad,
            None => return false,
        };
        let (grad, projected) = project_gradient(&self.params.flat_grad(), &ref_grad);
        if projected {
            self.params.scatter_grad(&grad);
        }
        projected
    }

    pub(super) fn on_task_boundary(&mut self, ctx: &mut dyn TaskContext) -> Result<Record> {
        let sample = ctx.task_samples(self.memory.per_task_size())?;
        self.memory.push(sample);
        self.task_count += 1;
        info!(
            "AGEM stored task {}, memory size = {}",
            self.task_count - 1,
            self.memory.len()
        );

        let mut record = Record::from_scalar("memory_size", self.memory.len() as f32);
        record.insert("task_count", RecordValue::Scalar(self.task_count as f32));
        Ok(record)
    }

    pub(super) fn named_state(&self) -> Vec<(String, Tensor)> {
        let mut named = vec![
            ("agem.task_count".to_string(), count_tensor(self.task_count)),
            (
                "agem.num_memories".to_string(),
                count_tensor(self.memory.num_tasks()),
            ),
        ];
        for (t, sample) in self.memory.tasks().iter().enumerate() {
            named.push((format!("agem.x.{}", t), sample.x.shallow_clone()));
            if let Some(y) = &sample.y {
                named.push((format!("agem.y.{}", t), y.shallow_clone()));
            }
        }
        named
    }

    pub(super) fn restore(&mut self, named: &HashMap<String, Tensor>) -> Result<()> {
        let num_memories = lookup(named, "agem.num_memories")?.int64_value(&[]) as usize;
        let mut memory = EpisodicMemory::new(self.config.memory_budget);
        for t in 0..num_memories {
            let x = lookup(named, &format!("agem.x.{}", t))?;
            let y = named.get(&format!("agem.y.{}", t)).map(|y| y.shallow_clone());
            memory.tasks.push(Sample::new(x, y));
        }
        debug!("Restored AGEM memory of {} tasks", num_memories);

        self.memory = memory;
        self.task_count = lookup(named, "agem.task_count")?.int64_value(&[]) as usize;
        self.ref_grad = None;
        Ok(())
    }
}
