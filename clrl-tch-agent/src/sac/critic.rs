//! Twin action-value functions of SAC on a shared encoder.
mod base;
mod config;
pub use base::Critic;
pub use config::CriticConfig;
