//! Task handler context trait
//!
//! The services facade implements this trait. The worker holds a weak
//! reference and calls `dispatch_task` for every dequeued task; the
//! implementation matches on the task kind.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use hoard_core::models::Task;

#[async_trait]
pub trait TaskHandlerContext: Send + Sync {
    /// Run one task. An error schedules a retry while attempts remain.
    async fn dispatch_task(self: Arc<Self>, task: &Task) -> Result<()>;
}
