use super::{
    count_tensor, lookup, mean_of, means_per_param, zero, EwcConfig, ParamTable, TaskContext,
};
use anyhow::Result;
use clrl_core::record::{Record, RecordValue};
use log::{debug, info};
use std::collections::HashMap;
use tch::{Kind, Tensor};

/// Reference values and Fisher diagonals of a consolidated task, in table order.
struct Anchor {
    means: Vec<Tensor>,
    fishers: Vec<Tensor>,
}

/// Policy on the rollout inputs of a task at its boundary.
struct PolicySnapshot {
    obs: Tensor,
    mean: Tensor,
    log_std: Tensor,
}

/// Elastic weight consolidation.
///
/// In multi-task mode one [`Anchor`] is kept per task. In online mode a single
/// anchor is kept and its Fisher is decayed by `online_gamma` before the Fisher
/// of a new task is added.
pub struct Ewc {
    params: ParamTable,
    config: EwcConfig,
    anchors: Vec<Anchor>,
    snapshots: Vec<Vec<PolicySnapshot>>,
    task_count: usize,
}

impl Ewc {
    pub(super) fn new(params: ParamTable, config: EwcConfig) -> Self {
        Self {
            params,
            config,
            anchors: vec![],
            snapshots: vec![],
            task_count: 0,
        }
    }

    /// Configuration.
    pub fn config(&self) -> &EwcConfig {
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

    /// `sum_task sum_param F * (p - m)^2 / 2`, without the coefficient `lambda`.
    pub fn penalty(&self) -> Tensor {
        if self.task_count == 0 {
            return zero(&self.params);
        }

        let mut total = zero(&self.params);
        for anchor in self.anchors.iter() {
            for ((_, p), (m, f)) in self
                .params
                .iter()
                .zip(anchor.means.iter().zip(anchor.fishers.iter()))
            {
                total = total + (f * (p - m).square()).sum(Kind::Float);
            }
        }
        total / 2.0
    }

    /// Estimates the diagonal Fisher information of the task just finished.
    ///
    /// The squared gradient of the loss on every single rollout step is accumulated
    /// over all rollouts, then divided by the number of rollouts.
    fn estimate_fisher(&mut self, ctx: &mut dyn TaskContext) -> Result<Vec<Tensor>> {
        let rollouts = ctx.rollouts(self.config.fisher_iters, self.config.rollout_steps)?;
        let mut fishers = self.params.zeros_like();
        let mut snapshots = vec![];

        for rollout in rollouts.iter() {
            if let Some((mean, log_std)) = tch::no_grad(|| ctx.policy_stats(&rollout.x)) {
                snapshots.push(PolicySnapshot {
                    obs: rollout.x.detach().copy(),
                    mean: mean.detach(),
                    log_std: log_std.detach(),
                });
            }

            for i in 0..rollout.len() {
                self.params.zero_grad();
                ctx.loss(&rollout.row(i)).backward();
                tch::no_grad(|| {
                    for (f, g) in fishers.iter_mut().zip(self.params.grads()) {
                        let _ = f.g_add_(&g.square());
                    }
                });
            }
        }
        self.params.zero_grad();
        self.snapshots.push(snapshots);

        let n = self.config.fisher_iters as f64;
        Ok(fishers.into_iter().map(|f| f / n).collect())
    }

    /// Stores the current variables with `fishers` as the anchor of a new task.
    pub fn consolidate(&mut self, fishers: Vec<Tensor>) {
        let means = self.params.snapshot();

        if self.config.online {
            let gamma = self.config.online_gamma;
            let fishers = match self.anchors.pop() {
                Some(old) => fishers
                    .iter()
                    .zip(old.fishers.iter())
                    .map(|(new, old)| new + old * gamma)
                    .collect(),
                None => fishers,
            };
            self.anchors.push(Anchor { means, fishers });
        } else {
            self.anchors.push(Anchor { means, fishers });
        }
        self.task_count += 1;
    }

    pub(super) fn on_task_boundary(&mut self, ctx: &mut dyn TaskContext) -> Result<Record> {
        let fishers = self.estimate_fisher(ctx)?;
        let fisher_mean = mean_of(&fishers);
        let fisher_per_param = means_per_param(&fishers);
        self.consolidate(fishers);
        info!(
            "EWC consolidated task {}, mean Fisher = {}",
            self.task_count - 1,
            fisher_mean
        );

        let mut record = Record::from_scalar("fisher_mean", fisher_mean);
        record.insert("fisher_per_param", RecordValue::Array1(fisher_per_param));
        record.insert("task_count", RecordValue::Scalar(self.task_count as f32));
        Ok(record)
    }

    /// Mean KL divergence from the policy stored at the boundary of `task` to the
    /// policy given by `stats`, on the rollout inputs of that task.
    ///
    /// Returns `None` if `task` has not been consolidated or no policy was stored.
    pub fn kl_with_stored_policy(
        &self,
        task: usize,
        stats: &dyn Fn(&Tensor) -> (Tensor, Tensor),
    ) -> Option<f32> {
        let snapshots = self.snapshots.get(task)?;
        if snapshots.is_empty() {
            return None;
        }

        tch::no_grad(|| {
            let kls = snapshots
                .iter()
                .map(|s| {
                    let (mean, log_std) = stats(&s.obs);
                    gaussian_kl(&s.mean, &s.log_std, &mean, &log_std)
                })
                .collect::<Vec<_>>();
            let kl = Tensor::cat(&kls, 0).mean(Kind::Float);
            Some(kl.double_value(&[]) as f32)
        })
    }

    pub(super) fn named_state(&self) -> Vec<(String, Tensor)> {
        let names = self.params.names();
        let mut named = vec![("ewc.task_count".to_string(), count_tensor(self.task_count))];
        named.push((
            "ewc.num_anchors".to_string(),
            count_tensor(self.anchors.len()),
        ));

        for (t, anchor) in self.anchors.iter().enumerate() {
            for (i, name) in names.iter().enumerate() {
                named.push((format!("ewc.mean.{}.{}", t, name), anchor.means[i].shallow_clone()));
                named.push((
                    format!("ewc.fisher.{}.{}", t, name),
                    anchor.fishers[i].shallow_clone(),
                ));
            }
        }

        for (t, snapshots) in self.snapshots.iter().enumerate() {
            named.push((
                format!("ewc.num_snapshots.{}", t),
                count_tensor(snapshots.len()),
            ));
            for (r, s) in snapshots.iter().enumerate() {
                named.push((format!("ewc.kl_obs.{}.{}", t, r), s.obs.shallow_clone()));
                named.push((format!("ewc.kl_mean.{}.{}", t, r), s.mean.shallow_clone()));
                named.push((
                    format!("ewc.kl_log_std.{}.{}", t, r),
                    s.log_std.shallow_clone(),
                ));
            }
        }
        named
    }

    pub(super) fn restore(&mut self, named: &HashMap<String, Tensor>) -> Result<()> {
        let device = self.params.device();
        let names = self.params.names();
        let task_count = lookup(named, "ewc.task_count")?.int64_value(&[]) as usize;
        let num_anchors = lookup(named, "ewc.num_anchors")?.int64_value(&[]) as usize;

        let mut anchors = vec![];
        for t in 0..num_anchors {
            let mut means = vec![];
            let mut fishers = vec![];
            for name in names.iter() {
                means.push(lookup(named, &format!("ewc.mean.{}.{}", t, name))?.to_device(device));
                fishers
                    .push(lookup(named, &format!("ewc.fisher.{}.{}", t, name))?.to_device(device));
            }
            anchors.push(Anchor { means, fishers });
        }

        let mut snapshots = vec![];
        for t in 0..task_count {
            let n = match named.get(&format!("ewc.num_snapshots.{}", t)) {
                Some(n) => n.int64_value(&[]) as usize,
                None => 0,
            };
            let mut task = vec![];
            for r in 0..n {
                task.push(PolicySnapshot {
                    obs: lookup(named, &format!("ewc.kl_obs.{}.{}", t, r))?,
                    mean: lookup(named, &format!("ewc.kl_mean.{}.{}", t, r))?,
                    log_std: lookup(named, &format!("ewc.kl_log_std.{}.{}", t, r))?,
                });
            }
            snapshots.push(task);
        }

        debug!("Restored EWC state of {} tasks", task_count);
        self.anchors = anchors;
        self.snapshots = snapshots;
        self.task_count = task_count;
        Ok(())
    }
}

/// KL divergence between diagonal Gaussians `p = N(mean0, exp(log_std0))` and
/// `q = N(mean1, exp(log_std1))`, summed over the last axis.
pub fn gaussian_kl(mean0: &Tensor, log_std0: &Tensor, mean1: &Tensor, log_std1: &Tensor) -> Tensor {
    let var0 = (log_std0 * 2.0).exp();
    let var1 = (log_std1 * 2.0).exp();
    let kl = (log_std1 - log_std0) + (var0 + (mean0 - mean1).square()) / (var1 * 2.0) - 0.5;
    kl.sum_dim_intlist(Some([-1i64].as_slice()), false, Kind::Float)
}
