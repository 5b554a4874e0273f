//! Hoard background work
//!
//! Cleanup cascades and scratch purges are handed to a bounded in-process
//! queue. Delivery is at-least-once: the durable state owned by the services
//! is the source of truth, so a task lost to a full queue or exhausted retries
//! is picked up again by the periodic sweep.

pub mod context;
pub mod queue;

pub use context::TaskHandlerContext;
pub use queue::{compute_retry_backoff, TaskQueue, TaskQueueConfig, MAX_RETRY_BACKOFF_SECS};
