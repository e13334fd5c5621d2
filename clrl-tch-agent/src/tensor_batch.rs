use clrl_core::TransitionBatch;
use tch::Tensor;

/// A batch of transitions stored as tensors.
///
/// The first axis of every tensor indexes the transitions.
pub struct TensorBatch {
    pub obs: Tensor,
    pub act: Tensor,
    pub next_obs: Tensor,
    pub reward: Vec<f32>,
    pub is_terminated: Vec<i8>,
}

impl TransitionBatch for TensorBatch {
    type ObsBatch = Tensor;
    type ActBatch = Tensor;

    fn unpack(self) -> (Tensor, Tensor, Tensor, Vec<f32>, Vec<i8>) {
        (
            self.obs,
            self.act,
            self.next_obs,
            self.reward,
            self.is_terminated,
        )
    }

    fn len(&self) -> usize {
        self.reward.len()
    }

    fn obs(&self) -> &Tensor {
        &self.obs
    }

    fn act(&self) -> &Tensor {
        &self.act
    }

    fn next_obs(&self) -> &Tensor {
        &self.next_obs
    }
}
