//! Types and traits for recording training metrics.
//!
//! Agents return a [`Record`] from every optimization step and every task boundary.
//! The training loop hands those records to an [`AggregateRecorder`] together with the
//! global step, so the agents have no dependency on how the values are stored or shown.
//!
//! ```rust
//! use clrl_core::record::{Record, RecordValue};
//!
//! let mut record = Record::from_scalar("loss_critic", 0.25);
//! record.insert("task", RecordValue::Scalar(1.0));
//! assert_eq!(record.get_scalar("loss_critic").unwrap(), 0.25);
//! ```
mod base;
mod buffered_recorder;
mod null_recorder;
mod recorder;

pub use base::{Record, RecordValue};
pub use buffered_recorder::BufferedRecorder;
pub use null_recorder::NullRecorder;
pub use recorder::{AggregateRecorder, Recorder};
