#![warn(missing_docs)]
//! Core traits of a continual reinforcement learning library.
//!
//! The crate is backend independent. It defines how environments, agents and
//! replay buffers talk to each other, and provides [`ContinualTrainer`], which
//! runs an agent through a sequence of tasks and consolidates the agent at
//! every task boundary.
pub mod error;
pub mod record;

mod base;
pub use base::{
    Act, Agent, Env, ExperienceBufferBase, Info, Obs, Policy, ReplayBufferBase, Step, Transition,
    TransitionBatch,
};

mod trainer;
pub use trainer::{ContinualTrainer, ContinualTrainerConfig, TaskPhase};
