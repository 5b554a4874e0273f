use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hoard_core::config::RetentionConfig;
use hoard_core::models::file::FileStatus;
use hoard_core::models::task::TaskKind;
use hoard_core::{AppError, Clock};
use hoard_db::{FileRepository, UploadSessionRepository};
use hoard_storage::ScratchSpace;
use hoard_worker::TaskQueue;
use tokio::time::interval;
use uuid::Uuid;

use super::steps::{BytesOutcome, StepRunner, CASCADE};

/// Result of driving the cascade for one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeOutcome {
    /// Nothing left to do: the record is already gone.
    Missing,
    /// The record is live again or was never soft-deleted.
    Skipped,
    Completed { bytes: BytesOutcome },
}

/// Counters from one sweep pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_files: usize,
    pub cascaded: usize,
    pub cascade_failures: usize,
    pub sessions_failed: usize,
    pub scratch_purged: usize,
    pub sessions_deleted: u64,
}

pub struct RetentionReaper {
    files: Arc<dyn FileRepository>,
    sessions: Arc<dyn UploadSessionRepository>,
    scratch: Arc<ScratchSpace>,
    steps: StepRunner,
    queue: TaskQueue,
    clock: Arc<dyn Clock>,
    config: RetentionConfig,
    session_ttl: chrono::Duration,
}

impl RetentionReaper {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        files: Arc<dyn FileRepository>,
        sessions: Arc<dyn UploadSessionRepository>,
        scratch: Arc<ScratchSpace>,
        steps: StepRunner,
        queue: TaskQueue,
        clock: Arc<dyn Clock>,
        config: RetentionConfig,
        session_ttl: chrono::Duration,
    ) -> Self {
        Self {
            files,
            sessions,
            scratch,
            steps,
            queue,
            clock,
            config,
            session_ttl,
        }
    }

    /// Start the periodic sweep. Returns a JoinHandle for graceful shutdown.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut sweep_interval =
                interval(Duration::from_secs(self.config.sweep_interval_secs.max(1)));

            loop {
                sweep_interval.tick().await;

                tracing::info!("Starting scheduled retention sweep");

                match self.sweep().await {
                    Ok(report) => tracing::info!(
                        expired_files = report.expired_files,
                        cascaded = report.cascaded,
                        cascade_failures = report.cascade_failures,
                        sessions_failed = report.sessions_failed,
                        scratch_purged = report.scratch_purged,
                        sessions_deleted = report.sessions_deleted,
                        "Retention sweep completed"
                    ),
                    Err(e) => tracing::error!(error = %e, "Retention sweep failed"),
                }
            }
        })
    }

    /// Synchronous half of a delete: hide the record and queue the cascade.
    #[tracing::instrument(skip(self))]
    pub async fn soft_delete(&self, owner_id: Uuid, file_id: Uuid) -> Result<(), AppError> {
        let file = self
            .files
            .get(file_id)
            .await?
            .filter(|f| f.owner_id == owner_id)
            .ok_or_else(|| AppError::NotFound(format!("file {}", file_id)))?;

        if file.status == FileStatus::Normal {
            self.files
                .mark_pending_deletion(file_id, self.clock.now())
                .await?;
            tracing::info!(file_id = %file_id, "File marked for deletion");
        }

        if !self.queue.try_submit(TaskKind::CascadeDelete { file_id }) {
            tracing::debug!(file_id = %file_id, "Cascade deferred to sweep");
        }
        Ok(())
    }

    /// Drive the cascade for one record. Safe to repeat after a crash at any step.
    #[tracing::instrument(skip(self), fields(cleanup.operation = "cascade"))]
    pub async fn cascade(&self, file_id: Uuid) -> Result<CascadeOutcome, AppError> {
        let Some(file) = self.files.get(file_id).await? else {
            return Ok(CascadeOutcome::Missing);
        };
        if file.status == FileStatus::Normal {
            tracing::debug!("Record is live; cascade skipped");
            return Ok(CascadeOutcome::Skipped);
        }

        let mut bytes = BytesOutcome::Retained { references: 0 };
        for step in CASCADE {
            match self.steps.run(step, &file).await {
                Ok(Some(outcome)) => bytes = outcome,
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(step = step.name(), error = %e, "Cleanup step failed; sweep will resume");
                    return Err(e);
                }
            }
        }

        tracing::info!(duplicate = file.is_duplicate(), bytes = ?bytes, "File hard-deleted");
        Ok(CascadeOutcome::Completed { bytes })
    }

    /// One pass over everything the reaper owns.
    #[tracing::instrument(skip(self), fields(cleanup.operation = "sweep"))]
    pub async fn sweep(&self) -> Result<SweepReport, AppError> {
        let now = self.clock.now();
        let batch = self.config.sweep_batch_size;
        let mut report = SweepReport::default();

        for file in self.files.list_expired(now, batch).await? {
            match self.files.mark_pending_deletion(file.id, now).await {
                Ok(_) => report.expired_files += 1,
                Err(e) => {
                    tracing::error!(file_id = %file.id, error = %e, "Failed to expire file");
                    continue;
                }
            }
            self.record_cascade(file.id, &mut report).await;
        }

        let cutoff = now - chrono::Duration::seconds(self.config.grace_period_secs);
        for file in self.files.list_pending_deletion(cutoff, batch).await? {
            self.record_cascade(file.id, &mut report).await;
        }

        match self.sessions.fail_expired(now, batch).await {
            Ok(ids) => {
                report.sessions_failed = ids.len();
                for id in ids {
                    tracing::info!(session_id = %id, "Upload session expired");
                }
            }
            Err(e) => tracing::error!(error = %e, "Failed to expire upload sessions"),
        }

        match self.sweep_scratch(now).await {
            Ok(purged) => report.scratch_purged = purged,
            Err(e) => tracing::error!(error = %e, "Failed to sweep scratch space"),
        }

        match self
            .sessions
            .delete_finished_before(now - self.session_ttl, batch)
            .await
        {
            Ok(deleted) => report.sessions_deleted = deleted,
            Err(e) => tracing::error!(error = %e, "Failed to delete finished sessions"),
        }

        Ok(report)
    }

    async fn record_cascade(&self, file_id: Uuid, report: &mut SweepReport) {
        match self.cascade(file_id).await {
            Ok(CascadeOutcome::Completed { .. }) => report.cascaded += 1,
            Ok(_) => {}
            Err(e) => {
                report.cascade_failures += 1;
                tracing::error!(file_id = %file_id, error = %e, "Cascade failed");
            }
        }
    }

    /// Scratch directories never promoted to a file: their session is gone,
    /// terminal, or past expiry.
    async fn sweep_scratch(&self, now: DateTime<Utc>) -> Result<usize, AppError> {
        let mut purged = 0;
        for (session_id, _modified) in self.scratch.list_sessions().await? {
            let stale = match self.sessions.get_session(session_id).await {
                Ok(Some(session)) => session.status.is_terminal() || session.is_expired(now),
                Ok(None) => true,
                Err(e) => {
                    tracing::warn!(session_id = %session_id, error = %e, "Session lookup failed; keeping scratch");
                    false
                }
            };
            if stale && self.purge_session_scratch(session_id).await? {
                purged += 1;
            }
        }
        Ok(purged)
    }

    /// Remove a session's scratch directory. Live sessions keep theirs.
    pub async fn purge_session_scratch(&self, session_id: Uuid) -> Result<bool, AppError> {
        if let Some(session) = self.sessions.get_session(session_id).await? {
            if session.status.is_active() && !session.is_expired(self.clock.now()) {
                tracing::debug!(session_id = %session_id, "Session still active; scratch kept");
                return Ok(false);
            }
        }
        Ok(self.scratch.purge(session_id).await?)
    }
}
