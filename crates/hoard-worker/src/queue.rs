//! Task queue: bounded channel, worker pool, retry with backoff.
//!
//! Shutdown: [`TaskQueue::shutdown`] stops the dispatcher; it does not wait for
//! in-flight tasks or pending retries. Anything dropped this way is recovered
//! by the retention sweep.

use anyhow::Result;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Semaphore};

use hoard_core::config::WorkerConfig;
use hoard_core::models::{Task, TaskKind};

use crate::context::TaskHandlerContext;

/// Maximum delay in seconds before retrying a failed task.
pub const MAX_RETRY_BACKOFF_SECS: u64 = 300;

const DEFAULT_TASK_TIMEOUT_SECS: u64 = 600;

/// Backoff before attempt `attempt + 1`: `base * 2^attempt`, capped.
pub fn compute_retry_backoff(base: Duration, attempt: u32) -> Duration {
    let factor = 2_u32.saturating_pow(attempt);
    base.saturating_mul(factor)
        .min(Duration::from_secs(MAX_RETRY_BACKOFF_SECS))
}

#[derive(Debug, Clone)]
pub struct TaskQueueConfig {
    pub max_workers: usize,
    pub queue_capacity: usize,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub task_timeout: Duration,
}

impl Default for TaskQueueConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            queue_capacity: 1024,
            max_retries: 3,
            retry_base_delay: Duration::from_millis(1000),
            task_timeout: Duration::from_secs(DEFAULT_TASK_TIMEOUT_SECS),
        }
    }
}

impl From<&WorkerConfig> for TaskQueueConfig {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            max_workers: config.max_workers.max(1),
            queue_capacity: config.queue_capacity.max(1),
            max_retries: config.max_retries,
            retry_base_delay: Duration::from_millis(config.retry_base_delay_ms),
            task_timeout: Duration::from_secs(DEFAULT_TASK_TIMEOUT_SECS),
        }
    }
}

#[derive(Clone)]
pub struct TaskQueue {
    sender: mpsc::Sender<Task>,
    config: TaskQueueConfig,
    shutdown_tx: mpsc::Sender<()>,
}

impl TaskQueue {
    /// Create the queue and spawn its dispatcher. Must be called inside a
    /// Tokio runtime.
    pub fn new(config: TaskQueueConfig, context: Weak<dyn TaskHandlerContext>) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let retry_sender = sender.clone();
        let config_clone = config.clone();
        tokio::spawn(async move {
            Self::worker_pool(receiver, retry_sender, config_clone, context, shutdown_rx).await;
        });

        Self {
            sender,
            config,
            shutdown_tx,
        }
    }

    pub fn config(&self) -> &TaskQueueConfig {
        &self.config
    }

    /// Submit without waiting. Returns `false` when the queue is full or
    /// closed; the task is then left to the periodic sweep.
    pub fn try_submit(&self, kind: TaskKind) -> bool {
        let task = Task::new(kind);
        let task_id = task.id;
        let task_type = task.kind.name();
        match self.sender.try_send(task) {
            Ok(()) => {
                tracing::debug!(task_id = %task_id, task_type, "Task submitted to queue");
                true
            }
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    task_id = %task_id,
                    task_type,
                    capacity = self.config.queue_capacity,
                    "Task queue full, deferring to sweep"
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::warn!(task_id = %task_id, task_type, "Task queue closed, deferring to sweep");
                false
            }
        }
    }

    async fn worker_pool(
        mut receiver: mpsc::Receiver<Task>,
        retry_sender: mpsc::Sender<Task>,
        config: TaskQueueConfig,
        context: Weak<dyn TaskHandlerContext>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        tracing::info!(
            max_workers = config.max_workers,
            queue_capacity = config.queue_capacity,
            max_retries = config.max_retries,
            "Task queue worker pool started"
        );

        let semaphore = Arc::new(Semaphore::new(config.max_workers.max(1)));

        loop {
            let task = tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Task queue worker pool shutting down");
                    break;
                }
                task = receiver.recv() => match task {
                    Some(task) => task,
                    None => break,
                },
            };

            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            let ctx = context.clone();
            let sender = retry_sender.clone();
            let config = config.clone();
            tokio::spawn(async move {
                let _permit = permit;
                Self::process_task(task, ctx, sender, config).await;
            });
        }

        tracing::info!("Task queue worker pool stopped");
    }

    #[tracing::instrument(skip_all, fields(task.id = %task.id, task.type = task.kind.name(), attempt = task.attempt))]
    async fn process_task(
        mut task: Task,
        context: Weak<dyn TaskHandlerContext>,
        retry_sender: mpsc::Sender<Task>,
        config: TaskQueueConfig,
    ) {
        let Some(ctx) = context.upgrade() else {
            tracing::error!("Task handler context was dropped, discarding task");
            return;
        };

        let error = match tokio::time::timeout(config.task_timeout, ctx.dispatch_task(&task)).await
        {
            Ok(Ok(())) => {
                tracing::info!("Task completed successfully");
                return;
            }
            Ok(Err(e)) => e,
            Err(_) => anyhow::anyhow!(
                "Task execution timed out after {}s",
                config.task_timeout.as_secs()
            ),
        };

        if task.attempt >= config.max_retries {
            tracing::error!(
                error = %error,
                max_retries = config.max_retries,
                "Task failed after max retries"
            );
            return;
        }

        let backoff = compute_retry_backoff(config.retry_base_delay, task.attempt);
        tracing::warn!(
            error = %error,
            backoff_ms = backoff.as_millis() as u64,
            "Task failed, scheduling retry"
        );
        task.attempt += 1;

        // The permit is released while waiting out the backoff.
        tokio::spawn(async move {
            tokio::time::sleep(backoff).await;
            if retry_sender.send(task).await.is_err() {
                tracing::warn!("Task queue closed before retry could be enqueued");
            }
        });
    }

    /// Signals the dispatcher to stop. Returns without waiting.
    pub async fn shutdown(&self) {
        tracing::info!("Initiating task queue shutdown");
        let _ = self.shutdown_tx.send(()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use uuid::Uuid;

    struct FlakyContext {
        failures_before_success: u32,
        calls: AtomicU32,
        done: mpsc::Sender<u32>,
    }

    #[async_trait]
    impl TaskHandlerContext for FlakyContext {
        async fn dispatch_task(self: Arc<Self>, task: &Task) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures_before_success {
                let _ = self.done.send(0).await;
                anyhow::bail!("transient failure");
            }
            let _ = self.done.send(task.attempt + 1).await;
            Ok(())
        }
    }

    fn fast_config(max_retries: u32) -> TaskQueueConfig {
        TaskQueueConfig {
            max_workers: 2,
            queue_capacity: 8,
            max_retries,
            retry_base_delay: Duration::from_millis(1),
            task_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn retry_backoff_exponential_then_capped() {
        let base = Duration::from_secs(1);
        assert_eq!(compute_retry_backoff(base, 0), Duration::from_secs(1));
        assert_eq!(compute_retry_backoff(base, 1), Duration::from_secs(2));
        assert_eq!(compute_retry_backoff(base, 8), Duration::from_secs(256));
        assert_eq!(
            compute_retry_backoff(base, 9),
            Duration::from_secs(MAX_RETRY_BACKOFF_SECS)
        );
        assert_eq!(
            compute_retry_backoff(base, 40),
            Duration::from_secs(MAX_RETRY_BACKOFF_SECS)
        );
    }

    #[tokio::test]
    async fn failed_task_is_retried_until_success() {
        let (done_tx, mut done_rx) = mpsc::channel(16);
        let ctx = Arc::new(FlakyContext {
            failures_before_success: 2,
            calls: AtomicU32::new(0),
            done: done_tx,
        });
        let as_dyn: Arc<dyn TaskHandlerContext> = ctx.clone();
        let queue = TaskQueue::new(fast_config(3), Arc::downgrade(&as_dyn));

        assert!(queue.try_submit(TaskKind::PurgeScratch {
            session_id: Uuid::new_v4(),
        }));

        let mut outcomes = Vec::new();
        for _ in 0..3 {
            let outcome = tokio::time::timeout(Duration::from_secs(5), done_rx.recv())
                .await
                .unwrap()
                .unwrap();
            outcomes.push(outcome);
        }
        // Two failures, then success on the third attempt.
        assert_eq!(outcomes, vec![0, 0, 3]);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn retries_stop_at_limit() {
        let (done_tx, mut done_rx) = mpsc::channel(16);
        let ctx = Arc::new(FlakyContext {
            failures_before_success: u32::MAX,
            calls: AtomicU32::new(0),
            done: done_tx,
        });
        let as_dyn: Arc<dyn TaskHandlerContext> = ctx.clone();
        let queue = TaskQueue::new(fast_config(1), Arc::downgrade(&as_dyn));

        assert!(queue.try_submit(TaskKind::CascadeDelete {
            file_id: Uuid::new_v4(),
        }));

        for _ in 0..2 {
            tokio::time::timeout(Duration::from_secs(5), done_rx.recv())
                .await
                .unwrap()
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ctx.calls.load(Ordering::SeqCst), 2);
    }

    struct StuckContext;

    #[async_trait]
    impl TaskHandlerContext for StuckContext {
        async fn dispatch_task(self: Arc<Self>, _task: &Task) -> Result<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn try_submit_reports_full_queue() {
        let mut config = fast_config(0);
        config.max_workers = 1;
        config.queue_capacity = 1;
        let ctx: Arc<dyn TaskHandlerContext> = Arc::new(StuckContext);
        let queue = TaskQueue::new(config, Arc::downgrade(&ctx));

        // One task runs, one waits for a permit, one fills the channel.
        let kind = TaskKind::PurgeScratch {
            session_id: Uuid::new_v4(),
        };
        let accepted = (0..8)
            .take_while(|_| queue.try_submit(kind.clone()))
            .count();
        assert!((1..=3).contains(&accepted), "accepted {}", accepted);
    }

    #[tokio::test]
    async fn try_submit_fails_after_shutdown() {
        let ctx: Arc<dyn TaskHandlerContext> = Arc::new(StuckContext);
        let queue = TaskQueue::new(fast_config(0), Arc::downgrade(&ctx));
        queue.shutdown().await;

        let kind = TaskKind::CascadeDelete {
            file_id: Uuid::new_v4(),
        };
        for _ in 0..100 {
            if !queue.try_submit(kind.clone()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("queue still accepting tasks after shutdown");
    }
}
