//! Continual soft actor-critic agents implemented with [tch](https://crates.io/crates/tch).
//!
//! * [`sac::Sac`] trains a policy, twin critics and an entropy temperature, optionally
//!   together with a self-supervised dynamics ensemble ([`ensemble::SsEnsemble`]) and a
//!   forgetting regularizer ([`regularizer::Regularizer`]).
//! * [`classifier::Classifier`] reuses the regularizers on multi-task classification.
pub mod classifier;
pub mod encoder;
pub mod ensemble;
pub mod mlp;
pub mod model;
pub mod obs_act;
pub mod opt;
pub mod regularizer;
pub mod replay_buffer;
pub mod sac;
mod tensor_batch;
pub mod util;
use serde::{Deserialize, Serialize};
pub use tensor_batch::TensorBatch;

#[derive(Clone, Debug, Copy, Deserialize, Serialize, PartialEq)]
/// Device for using tch.
///
/// This enum is added because [`tch::Device`] does not support serialization.
pub enum Device {
    /// The main CPU device.
    Cpu,

    /// The main GPU device.
    Cuda(usize),
}

impl From<tch::Device> for Device {
    fn from(device: tch::Device) -> Self {
        match device {
            tch::Device::Cuda(n) => Self::Cuda(n),
            _ => Self::Cpu,
        }
    }
}

impl From<Device> for tch::Device {
    fn from(device: Device) -> Self {
        match device {
            Device::Cpu => tch::Device::Cpu,
            Device::Cuda(n) => tch::Device::Cuda(n),
        }
    }
}
