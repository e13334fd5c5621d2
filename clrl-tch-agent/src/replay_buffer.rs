//! Replay buffer.
mod base;
mod config;
pub use base::ReplayBuffer;
pub use config::ReplayBufferConfig;
