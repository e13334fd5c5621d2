use super::ReplayBufferConfig;
use crate::TensorBatch;
use anyhow::Result;
use clrl_core::{error::ClrlError, ExperienceBufferBase, ReplayBufferBase, Transition};
use log::{info, trace};
use std::marker::PhantomData;
use tch::{kind::FLOAT_CPU, Tensor};

/// Ring buffer of transitions stored in CPU tensors.
///
/// Batches are gathered with `index_select`, so they never alias the storage.
pub struct ReplayBuffer<O, A> {
    obs: Tensor,
    next_obs: Tensor,
    act: Tensor,
    reward: Vec<f32>,
    is_terminated: Vec<i8>,
    capacity: usize,
    len: usize,
    i: usize,
    phantom: PhantomData<(O, A)>,
}

impl<O, A> ReplayBuffer<O, A> {
    fn check_row(t: &Tensor, dim: i64, what: &str) -> Result<()> {
        if t.size() != [dim] {
            return Err(ClrlError::ShapeMismatch(format!(
                "{} of shape {:?} pushed into a buffer of dimension {}",
                what,
                t.size(),
                dim
            ))
            .into());
        }
        Ok(())
    }

    fn gather(&self, ixs: Vec<i64>) -> TensorBatch {
        let reward = ixs.iter().map(|&i| self.reward[i as usize]).collect();
        let is_terminated = ixs.iter().map(|&i| self.is_terminated[i as usize]).collect();
        let ixs = Tensor::from_slice(&ixs);

        TensorBatch {
            obs: self.obs.index_select(0, &ixs),
            act: self.act.index_select(0, &ixs),
            next_obs: self.next_obs.index_select(0, &ixs),
            reward,
            is_terminated,
        }
    }

    fn ensure_not_empty(&self) -> Result<()> {
        if self.len == 0 {
            return Err(anyhow::anyhow!("Sampling from an empty replay buffer"));
        }
        Ok(())
    }
}

impl<O, A> ExperienceBufferBase for ReplayBuffer<O, A>
where
    O: Into<Tensor>,
    A: Into<Tensor>,
{
    type Item = Transition<O, A>;

    fn push(&mut self, tr: Self::Item) -> Result<()> {
        let obs: Tensor = tr.obs.into();
        let next_obs: Tensor = tr.next_obs.into();
        let act: Tensor = tr.act.into();
        Self::check_row(&obs, self.obs.size()[1], "Observation")?;
        Self::check_row(&next_obs, self.obs.size()[1], "Next observation")?;
        Self::check_row(&act, self.act.size()[1], "Action")?;

        let i = self.i as i64;
        self.obs.get(i).copy_(&obs);
        self.next_obs.get(i).copy_(&next_obs);
        self.act.get(i).copy_(&act);
        self.reward[self.i] = tr.reward;
        self.is_terminated[self.i] = tr.is_terminated as i8;

        self.i = (self.i + 1) % self.capacity;
        self.len = self.capacity.min(self.len + 1);
        Ok(())
    }

    fn len(&self) -> usize {
        self.len
    }
}

impl<O, A> ReplayBufferBase for ReplayBuffer<O, A> {
    type Config = ReplayBufferConfig;
    type Batch = TensorBatch;

    fn build(config: &Self::Config) -> Self {
        info!(
            "Construct replay buffer with capacity = {}",
            config.capacity
        );
        if let Some(seed) = config.seed {
            fastrand::seed(seed);
        }
        let capacity = config.capacity.max(1);

        Self {
            obs: Tensor::zeros(&[capacity as i64, config.obs_dim], FLOAT_CPU),
            next_obs: Tensor::zeros(&[capacity as i64, config.obs_dim], FLOAT_CPU),
            act: Tensor::zeros(&[capacity as i64, config.act_dim], FLOAT_CPU),
            reward: vec![0.0; capacity],
            is_terminated: vec![0; capacity],
            capacity,
            len: 0,
            i: 0,
            phantom: PhantomData,
        }
    }

    fn batch(&mut self, size: usize) -> Result<Self::Batch> {
        self.ensure_not_empty()?;
        let ixs = (0..size)
            .map(|_| fastrand::usize(..self.len) as i64)
            .collect::<Vec<_>>();
        Ok(self.gather(ixs))
    }

    fn batch_without_replacement(&mut self, size: usize) -> Result<Self::Batch> {
        self.ensure_not_empty()?;
        let mut ixs = (0..self.len as i64).collect::<Vec<_>>();
        fastrand::shuffle(&mut ixs);
        ixs.truncate(size.min(self.len));
        Ok(self.gather(ixs))
    }

    fn clear(&mut self) {
        trace!("Clear replay buffer of {} transitions", self.len);
        self.len = 0;
        self.i = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obs_act::{ArrayAct, ArrayObs};
    use clrl_core::TransitionBatch;
    use std::convert::TryFrom;

    type Buffer = ReplayBuffer<ArrayObs, ArrayAct>;

    fn transition(v: f32) -> Transition<ArrayObs, ArrayAct> {
        Transition {
            obs: ArrayObs(vec![v, v]),
            act: ArrayAct(vec![v]),
            next_obs: ArrayObs(vec![v + 1.0, v + 1.0]),
            reward: v,
            is_terminated: false,
        }
    }

    fn buffer(capacity: usize) -> Buffer {
        let config = ReplayBufferConfig::default()
            .capacity(capacity)
            .obs_dim(2)
            .act_dim(1)
            .seed(42);
        Buffer::build(&config)
    }

    #[test]
    fn test_ring_overwrites_oldest() -> Result<()> {
        let mut buffer = buffer(3);
        for v in 0..5 {
            buffer.push(transition(v as f32))?;
        }
        assert_eq!(buffer.len(), 3);

        let batch = buffer.batch_without_replacement(10)?;
        assert_eq!(batch.len(), 3);
        let mut rewards = batch.reward.clone();
        rewards.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(rewards, vec![2.0, 3.0, 4.0]);

        // Each row keeps obs, act and next_obs of the same transition.
        let (obs, act, next_obs, reward, _) = batch.unpack();
        let obs0 = Vec::<f32>::try_from(&obs.select(1, 0))?;
        let act0 = Vec::<f32>::try_from(&act.select(1, 0))?;
        let next0 = Vec::<f32>::try_from(&next_obs.select(1, 0))?;
        assert_eq!(obs0, reward);
        assert_eq!(act0, reward);
        assert_eq!(next0, reward.iter().map(|r| r + 1.0).collect::<Vec<_>>());
        Ok(())
    }

    #[test]
    fn test_clear_and_shape_errors() -> Result<()> {
        let mut buffer = buffer(4);
        buffer.push(transition(1.0))?;
        buffer.clear();
        assert_eq!(buffer.len(), 0);
        assert!(buffer.batch(2).is_err());

        let bad = Transition {
            obs: ArrayObs(vec![0.0; 3]),
            act: ArrayAct(vec![0.0]),
            next_obs: ArrayObs(vec![0.0; 3]),
            reward: 0.0,
            is_terminated: true,
        };
        let err = buffer.push(bad).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ClrlError>(),
            Some(ClrlError::ShapeMismatch(_))
        ));
        Ok(())
    }
}
