//! Flat observation and action types for environments with vector spaces.
use clrl_core::{Act, Obs};
use std::convert::TryFrom;
use tch::Tensor;

/// Observation as a vector of `f32`.
#[derive(Clone, Debug, PartialEq)]
pub struct ArrayObs(pub Vec<f32>);

impl Obs for ArrayObs {}

impl From<Vec<f32>> for ArrayObs {
    fn from(v: Vec<f32>) -> Self {
        Self(v)
    }
}

impl From<ArrayObs> for Tensor {
    fn from(obs: ArrayObs) -> Tensor {
        Tensor::from_slice(&obs.0)
    }
}

/// Continuous action as a vector of `f32`.
#[derive(Clone, Debug, PartialEq)]
pub struct ArrayAct(pub Vec<f32>);

impl Act for ArrayAct {}

impl From<Vec<f32>> for ArrayAct {
    fn from(v: Vec<f32>) -> Self {
        Self(v)
    }
}

impl From<ArrayAct> for Tensor {
    fn from(act: ArrayAct) -> Tensor {
        Tensor::from_slice(&act.0)
    }
}

impl From<Tensor> for ArrayAct {
    /// Flattens the tensor, which is expected to hold a single action.
    fn from(t: Tensor) -> Self {
        let t = t.to_device(tch::Device::Cpu).to_kind(tch::Kind::Float).flatten(0, -1);
        Self(Vec::<f32>::try_from(&t).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_act_from_batched_tensor() {
        let t = Tensor::from_slice(&[0.5f32, -0.25]).unsqueeze(0);
        let act = ArrayAct::from(t);
        assert_eq!(act, ArrayAct(vec![0.5, -0.25]));
    }
}
