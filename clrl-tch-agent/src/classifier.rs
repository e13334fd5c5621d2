//! Multi-task classifier sharing the regularizers of the SAC agent.
mod base;
mod config;
pub use base::Classifier;
pub use config::ClassifierConfig;
