//! Errors in the library.
use thiserror::Error;

/// Errors in the library.
#[derive(Error, Debug)]
pub enum ClrlError {
    /// Invalid configuration detected at construction.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Tensors or batches with unexpected shapes.
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Record key error.
    #[error("Record key error: {0}")]
    RecordKeyError(String),

    /// Record value type error.
    #[error("Record value type error: {0}")]
    RecordValueTypeError(String),
}
