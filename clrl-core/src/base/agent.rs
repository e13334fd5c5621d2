//! Agent.
use super::{Env, Policy, ReplayBufferBase};
use crate::record::Record;
use anyhow::Result;
use std::path::Path;

/// Represents a trainable policy on a sequence of environments.
pub trait Agent<E: Env, R: ReplayBufferBase>: Policy<E> {
    /// Set the policy to training mode.
    fn train(&mut self);

    /// Set the policy to evaluation mode.
    fn eval(&mut self);

    /// Return if it is in training mode.
    fn is_train(&self) -> bool;

    /// Performs an optimization step.
    ///
    /// `step` is the global step counter owned by the caller; update frequencies
    /// of the agent are evaluated against it. A step either completes or returns
    /// an error, in which case the caller must not continue training.
    fn update(&mut self, buffer: &mut R, step: usize) -> Result<Record>;

    /// Consolidates the agent at the end of a task.
    ///
    /// `env` is the environment of the task just finished and `buffer` still holds
    /// its experiences.
    fn on_task_boundary(&mut self, env: &mut E, buffer: &mut R) -> Result<Record>;

    /// Makes target networks identical to the live networks.
    fn reset_target(&mut self) -> Result<()>;

    /// Save the parameters of the agent in the given directory.
    fn save_params(&self, path: &Path) -> Result<()>;

    /// Load the parameters of the agent from the given directory.
    fn load_params(&mut self, path: &Path) -> Result<()>;
}
