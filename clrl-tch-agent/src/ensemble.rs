//! Self-supervised dynamics ensemble.
//!
//! Each member pairs an [`Encoder`](crate::encoder::Encoder), optionally tied to the
//! trunk of the critic encoder, with a forward and/or an inverse dynamics predictor.
//! Training the predictors shapes the shared representation, and the spread of the
//! members' predictions is an uncertainty signal.
mod base;
mod config;
pub use base::{PredictorKind, SsEnsemble};
pub use config::SsEnsembleConfig;
