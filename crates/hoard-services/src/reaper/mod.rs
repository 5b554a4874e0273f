//! Retention: soft delete, the asynchronous deletion cascade, and the
//! periodic sweep that re-drives anything a crash or a full queue left behind.

mod service;
pub mod steps;

pub use service::{CascadeOutcome, RetentionReaper, SweepReport};
pub use steps::{BytesOutcome, CleanupStep, StepRunner};
