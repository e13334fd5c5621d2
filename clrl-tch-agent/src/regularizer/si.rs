use super::{count_tensor, lookup, mean_of, means_per_param, zero, ParamTable, SiConfig};
use anyhow::Result;
use clrl_core::record::{Record, RecordValue};
use log::info;
use std::collections::HashMap;
use tch::{Kind, Tensor};

/// Synaptic intelligence.
///
/// Every optimizer step adds `-grad * (p - p_prev)` to the path integral `w`.
/// At a task boundary `w` is converted into the importance
/// `omega += w / ((p - p_task)^2 + epsilon)`, where `p_task` is the value at the
/// previous boundary.
pub struct Si {
    params: ParamTable,
    config: SiConfig,
    w: Vec<Tensor>,
    omegas: Vec<Tensor>,
    prev: Vec<Tensor>,
    prev_task: Vec<Tensor>,
    task_count: usize,
}

impl Si {
    pub(super) fn new(params: ParamTable, config: SiConfig) -> Self {
        let w = params.zeros_like();
        let omegas = params.zeros_like();
        let prev = params.snapshot();
        let prev_task = params.snapshot();

        Self {
            params,
            config,
            w,
            omegas,
            prev,
            prev_task,
            task_count: 0,
        }
    }

    /// Configuration.
    pub fn config(&self) -> &SiConfig {
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

    /// Importance of each variable, in table order.
    pub fn omegas(&self) -> &[Tensor] {
        &self.omegas
    }

    /// `sum_param omega * (p - p_task)^2`, without the coefficient `c`.
    pub fn penalty(&self) -> Tensor {
        if self.task_count == 0 {
            return zero(&self.params);
        }

        let mut total = zero(&self.params);
        for ((_, p), (omega, p_task)) in self
            .params
            .iter()
            .zip(self.omegas.iter().zip(self.prev_task.iter()))
        {
            total = total + (omega * (p - p_task).square()).sum(Kind::Float);
        }
        total
    }

    /// Accumulates the path integral of the last optimizer step.
    ///
    /// Must be called after the step while the gradients of the step are still in place.
    pub(super) fn accumulate(&mut self) {
        let grads = self.params.grads();
        tch::no_grad(|| {
            for (i, ((_, p), g)) in self.params.iter().zip(grads.iter()).enumerate() {
                let p = p.detach();
                let _ = self.w[i].g_add_(&(-g * (&p - &self.prev[i])));
                self.prev[i] = p.copy();
            }
        });
    }

    pub(super) fn on_task_boundary(&mut self) -> Result<Record> {
        let current = self.params.snapshot();
        tch::no_grad(|| {
            for i in 0..current.len() {
                let delta = &current[i] - &self.prev_task[i];
                let omega = &self.w[i] / (delta.square() + self.config.epsilon);
                let _ = self.omegas[i].g_add_(&omega);
                let _ = self.w[i].zero_();
            }
        });
        self.prev = current.iter().map(|t| t.copy()).collect();
        self.prev_task = current;
        self.task_count += 1;

        let omega_mean = mean_of(&self.omegas);
        info!(
            "SI consolidated task {}, mean importance = {}",
            self.task_count - 1,
            omega_mean
        );
        let mut record = Record::from_scalar("omega_mean", omega_mean);
        record.insert(
            "omega_per_param",
            RecordValue::Array1(means_per_param(&self.omegas)),
        );
        record.insert("task_count", RecordValue::Scalar(self.task_count as f32));
        Ok(record)
    }

    pub(super) fn named_state(&self) -> Vec<(String, Tensor)> {
        let mut named = vec![("si.task_count".to_string(), count_tensor(self.task_count))];
        for (i, name) in self.params.names().iter().enumerate() {
            named.push((format!("si.omega.{}", name), self.omegas[i].shallow_clone()));
            named.push((format!("si.w.{}", name), self.w[i].shallow_clone()));
            named.push((format!("si.prev.{}", name), self.prev[i].shallow_clone()));
            named.push((
                format!("si.prev_task.{}", name),
                self.prev_task[i].shallow_clone(),
            ));
        }
        named
    }

    pub(super) fn restore(&mut self, named: &HashMap<String, Tensor>) -> Result<()> {
        let device = self.params.device();
        let names = self.params.names();
        let get = |kind: &str, name: &str| -> Result<Tensor> {
            Ok(lookup(named, &format!("si.{}.{}", kind, name))?.to_device(device))
        };

        self.omegas = names.iter().map(|n| get("omega", n)).collect::<Result<_>>()?;
        self.w = names.iter().map(|n| get("w", n)).collect::<Result<_>>()?;
        self.prev = names.iter().map(|n| get("prev", n)).collect::<Result<_>>()?;
        self.prev_task = names
            .iter()
            .map(|n| get("prev_task", n))
            .collect::<Result<_>>()?;
        self.task_count = lookup(named, "si.task_count")?.int64_value(&[]) as usize;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{nn, nn::OptimizerConfig, nn::VarStore, Device};

    /// Runs plain gradient descent on `loss` and accumulates the path integral.
    fn descend(si: &mut Si, vs: &VarStore, loss: impl Fn() -> Tensor, steps: usize) {
        let mut opt = nn::Sgd::default().build(vs, 0.1).unwrap();
        for _ in 0..steps {
            opt.zero_grad();
            loss().backward();
            opt.step();
            si.accumulate();
        }
    }

    #[test]
    fn test_static_parameter_has_zero_importance() -> Result<()> {
        let vs = VarStore::new(Device::Cpu);
        let root = vs.root();
        let moving = root.var("moving", &[1], nn::Init::Const(0.0));
        let fixed = root.var("fixed", &[1], nn::Init::Const(1.0));
        let mut si = Si::new(ParamTable::from_var_store(&vs), SiConfig::default());

        // `fixed` enters the loss with a zero coefficient and never moves.
        let loss = || (&moving - 3.0).square().sum(Kind::Float) + (&fixed * 0.0).sum(Kind::Float);
        descend(&mut si, &vs, loss, 20);
        let record = si.on_task_boundary()?;

        let names = si.params().names();
        let i_fixed = names.iter().position(|n| n == "fixed").unwrap();
        let i_moving = names.iter().position(|n| n == "moving").unwrap();
        let per_param = record.get_array1("omega_per_param")?;
        assert_eq!(per_param.len(), 2);
        assert_eq!(per_param[i_fixed], 0.0);
        assert!(per_param[i_moving] > 0.0);
        assert_eq!(si.omegas()[i_fixed].double_value(&[0]), 0.0);
        assert!(si.omegas()[i_moving].double_value(&[0]) > 0.0);

        // The static parameter contributes nothing to the penalty wherever it goes.
        let before = si.penalty().double_value(&[]);
        tch::no_grad(|| {
            let _ = fixed.shallow_clone().fill_(100.0);
        });
        assert_eq!(si.penalty().double_value(&[]), before);
        Ok(())
    }

    #[test]
    fn test_penalty_zero_before_first_boundary() {
        let vs = VarStore::new(Device::Cpu);
        let p = vs.root().var("p", &[1], nn::Init::Const(0.0));
        let mut si = Si::new(ParamTable::from_var_store(&vs), SiConfig::default());
        descend(&mut si, &vs, || (&p - 1.0).square().sum(Kind::Float), 5);
        assert_eq!(si.penalty().double_value(&[]), 0.0);
    }
}
