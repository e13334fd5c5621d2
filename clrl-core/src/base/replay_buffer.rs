//! Replay buffer interface.
//!
//! Storage of experiences is split into two traits: [`ExperienceBufferBase`] receives
//! transitions from the training loop and [`ReplayBufferBase`] hands out batches to
//! agents.
use anyhow::Result;

/// Interface for buffers that store experiences from environments.
pub trait ExperienceBufferBase {
    /// The type of items stored in the buffer.
    type Item;

    /// Pushes a new experience into the buffer.
    fn push(&mut self, tr: Self::Item) -> Result<()>;

    /// Returns the current number of experiences in the buffer.
    fn len(&self) -> usize;
}

/// Interface for replay buffers that generate batches for training.
pub trait ReplayBufferBase {
    /// Configuration parameters for the replay buffer.
    type Config: Clone;

    /// The type of batch generated for training.
    type Batch;

    /// Builds a new replay buffer from the given configuration.
    fn build(config: &Self::Config) -> Self;

    /// Samples a batch of `size` experiences uniformly with replacement.
    ///
    /// The returned batch owns its data: it never aliases the storage of the buffer.
    fn batch(&mut self, size: usize) -> Result<Self::Batch>;

    /// Samples a batch of `min(size, len)` distinct experiences.
    fn batch_without_replacement(&mut self, size: usize) -> Result<Self::Batch>;

    /// Removes every stored experience.
    fn clear(&mut self);
}
