//! Regularizers against catastrophic forgetting.
//!
//! A [`Regularizer`] works on the variables of one network, collected in a
//! [`ParamTable`]. The optimization step of the owner looks like
//!
//! 1. `zero_grad`, then [`Regularizer::before_backward`],
//! 2. backward of `loss + strength * penalty`,
//! 3. [`Regularizer::adjust_gradient`], the optimizer step, then [`Regularizer::after_step`].
//!
//! At the end of a task the owner calls [`Regularizer::on_task_boundary`] with a
//! [`TaskContext`] giving access to the task just finished.
mod agem;
mod config;
mod ewc;
mod param_table;
mod si;
use anyhow::Result;
pub use agem::{project_gradient, Agem, EpisodicMemory};
use clrl_core::record::Record;
pub use config::{AgemConfig, EwcConfig, RegularizerConfig, SiConfig};
pub use ewc::{gaussian_kl, Ewc};
pub use param_table::ParamTable;
pub use si::Si;
use std::{collections::HashMap, path::Path};
use tch::{Kind, Tensor};

/// Inputs and optional labels, stacked on the first axis.
#[derive(Debug)]
pub struct Sample {
    pub x: Tensor,
    pub y: Option<Tensor>,
}

impl Sample {
    /// Constructs a sample.
    pub fn new(x: Tensor, y: Option<Tensor>) -> Self {
        Self { x, y }
    }

    /// The number of rows.
    pub fn len(&self) -> usize {
        self.x.size()[0] as usize
    }

    /// Returns `true` if there is no row.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The `i`-th row, keeping the leading axis.
    pub fn row(&self, i: usize) -> Self {
        self.narrow(i, 1)
    }

    /// The rows `start..start + len`.
    pub fn narrow(&self, start: usize, len: usize) -> Self {
        let (start, len) = (start as i64, len as i64);
        Self {
            x: self.x.narrow(0, start, len),
            y: self.y.as_ref().map(|y| y.narrow(0, start, len)),
        }
    }

    /// The rows at `ixs`, copied.
    pub fn index_select(&self, ixs: &Tensor) -> Self {
        Self {
            x: self.x.index_select(0, &ixs.to(self.x.device())),
            y: self
                .y
                .as_ref()
                .map(|y| y.index_select(0, &ixs.to(y.device()))),
        }
    }

    /// Concatenates samples along the first axis.
    ///
    /// Labels are kept only if every sample has them.
    pub fn cat(samples: &[Sample]) -> Self {
        let xs = samples.iter().map(|s| s.x.shallow_clone()).collect::<Vec<_>>();
        let ys = samples
            .iter()
            .map(|s| s.y.as_ref().map(|y| y.shallow_clone()))
            .collect::<Option<Vec<_>>>();
        Self {
            x: Tensor::cat(&xs, 0),
            y: ys.map(|ys| Tensor::cat(&ys, 0)),
        }
    }
}

impl Clone for Sample {
    fn clone(&self) -> Self {
        Self {
            x: self.x.copy(),
            y: self.y.as_ref().map(|y| y.copy()),
        }
    }
}

/// A differentiable loss of the regularized network.
pub trait GradientSource {
    /// Loss on `sample`, connected to the graph of the network's variables.
    fn loss(&self, sample: &Sample) -> Tensor;
}

/// Access to the task just finished, given to [`Regularizer::on_task_boundary`].
pub trait TaskContext: GradientSource {
    /// Runs `n_iters` rollouts of `n_steps` steps with the current policy and
    /// returns their inputs.
    fn rollouts(&mut self, n_iters: usize, n_steps: usize) -> Result<Vec<Sample>>;

    /// Draws up to `n` samples of the task without replacement.
    fn task_samples(&mut self, n: usize) -> Result<Sample>;

    /// Parameters `(mean, log_std)` of the policy on `x`, if the network is a policy.
    fn policy_stats(&self, _x: &Tensor) -> Option<(Tensor, Tensor)> {
        None
    }
}

/// Regularizer plugged into an optimization step.
pub enum Regularizer {
    /// Elastic weight consolidation.
    Ewc(Ewc),

    /// Synaptic intelligence.
    Si(Si),

    /// Averaged gradient episodic memory.
    Agem(Agem),
}

impl Regularizer {
    /// Penalty on the current variables, exactly zero before the first boundary.
    pub fn penalty(&self) -> Tensor {
        match self {
            Self::Ewc(r) => r.penalty(),
            Self::Si(r) => r.penalty(),
            Self::Agem(r) => zero(r.params()),
        }
    }

    /// Coefficient of the penalty in the total loss.
    pub fn strength(&self) -> f64 {
        match self {
            Self::Ewc(r) => r.config().lambda,
            Self::Si(r) => r.config().c,
            Self::Agem(_) => 0.0,
        }
    }

    /// Called after the gradients were cleared and before the backward pass of the loss.
    pub fn before_backward(&mut self, src: &dyn GradientSource) -> Result<()> {
        match self {
            Self::Agem(r) => r.compute_ref_grad(src),
            _ => Ok(()),
        }
    }

    /// Called between the backward pass and the optimizer step.
    ///
    /// Returns `true` if the gradients were modified.
    pub fn adjust_gradient(&mut self) -> bool {
        match self {
            Self::Agem(r) => r.project(),
            _ => false,
        }
    }

    /// Called after the optimizer step.
    pub fn after_step(&mut self) {
        if let Self::Si(r) = self {
            r.accumulate();
        }
    }

    /// Consolidates the task just finished.
    pub fn on_task_boundary(&mut self, ctx: &mut dyn TaskContext) -> Result<Record> {
        match self {
            Self::Ewc(r) => r.on_task_boundary(ctx),
            Self::Si(r) => r.on_task_boundary(),
            Self::Agem(r) => r.on_task_boundary(ctx),
        }
    }

    /// The number of consolidated tasks.
    pub fn task_count(&self) -> usize {
        match self {
            Self::Ewc(r) => r.task_count(),
            Self::Si(r) => r.task_count(),
            Self::Agem(r) => r.task_count(),
        }
    }

    /// The regularized variables.
    pub fn params(&self) -> &ParamTable {
        match self {
            Self::Ewc(r) => r.params(),
            Self::Si(r) => r.params(),
            Self::Agem(r) => r.params(),
        }
    }

    /// Saves the per-task state.
    pub fn save<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        let named = match self {
            Self::Ewc(r) => r.named_state(),
            Self::Si(r) => r.named_state(),
            Self::Agem(r) => r.named_state(),
        };
        Tensor::save_multi(&named, &path)?;
        log::info!("Save regularizer state to {:?}", path.as_ref());
        Ok(())
    }

    /// Loads the per-task state saved with [`Regularizer::save`].
    pub fn load<T: AsRef<Path>>(&mut self, path: T) -> Result<()> {
        let named = Tensor::load_multi(&path)?
            .into_iter()
            .collect::<HashMap<_, _>>();
        match self {
            Self::Ewc(r) => r.restore(&named)?,
            Self::Si(r) => r.restore(&named)?,
            Self::Agem(r) => r.restore(&named)?,
        }
        log::info!("Load regularizer state from {:?}", path.as_ref());
        Ok(())
    }
}

fn zero(params: &ParamTable) -> Tensor {
    Tensor::from(0f32).to_device(params.device())
}

fn count_tensor(n: usize) -> Tensor {
    Tensor::from(n as i64)
}

fn lookup(named: &HashMap<String, Tensor>, key: &str) -> Result<Tensor> {
    named
        .get(key)
        .map(|t| t.shallow_clone())
        .ok_or_else(|| anyhow::anyhow!("{} not found in regularizer state", key))
}

fn mean_of(ts: &[Tensor]) -> f32 {
    if ts.is_empty() {
        return 0.0;
    }
    let flat = ts.iter().map(|t| t.flatten(0, -1)).collect::<Vec<_>>();
    Tensor::cat(&flat, 0).mean(Kind::Float).double_value(&[]) as f32
}

/// Mean of each tensor, in table order.
fn means_per_param(ts: &[Tensor]) -> Vec<f32> {
    ts.iter()
        .map(|t| t.mean(Kind::Float).double_value(&[]) as f32)
        .collect()
}
