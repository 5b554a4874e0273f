//! The ordered deletion cascade for one soft-deleted record.
//!
//! Every step can be re-run after a crash at any point: dependent deletes and
//! row deletes are no-ops the second time, and byte deletion is gated on the
//! reference count at the moment the step runs.

use std::sync::Arc;

use hoard_core::models::file::FileRecord;
use hoard_core::AppError;
use hoard_db::{DependentKind, DependentRecordsRepository, FileRepository};
use hoard_storage::StorageRouter;

use crate::channels::ChannelRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupStep {
    /// Per-record rows owned by another subsystem.
    Dependents(DependentKind),
    /// Physical bytes, only when nothing else references them.
    Bytes,
    /// The record itself, followed by a last-reference re-check.
    Record,
}

impl CleanupStep {
    pub fn name(&self) -> &'static str {
        match self {
            CleanupStep::Dependents(kind) => kind.table(),
            CleanupStep::Bytes => "bytes",
            CleanupStep::Record => "record",
        }
    }
}

/// Dependents first so a crash never leaves rows pointing at a missing record.
pub const CASCADE: [CleanupStep; 8] = [
    CleanupStep::Dependents(DependentKind::ALL[0]),
    CleanupStep::Dependents(DependentKind::ALL[1]),
    CleanupStep::Dependents(DependentKind::ALL[2]),
    CleanupStep::Dependents(DependentKind::ALL[3]),
    CleanupStep::Dependents(DependentKind::ALL[4]),
    CleanupStep::Dependents(DependentKind::ALL[5]),
    CleanupStep::Bytes,
    CleanupStep::Record,
];

/// What a finished cascade did with the bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BytesOutcome {
    Deleted,
    Retained { references: i64 },
}

pub struct StepRunner {
    files: Arc<dyn FileRepository>,
    dependents: Arc<dyn DependentRecordsRepository>,
    channels: Arc<ChannelRegistry>,
    router: Arc<StorageRouter>,
}

impl StepRunner {
    pub fn new(
        files: Arc<dyn FileRepository>,
        dependents: Arc<dyn DependentRecordsRepository>,
        channels: Arc<ChannelRegistry>,
        router: Arc<StorageRouter>,
    ) -> Self {
        Self {
            files,
            dependents,
            channels,
            router,
        }
    }

    /// Run one step. Returns the bytes outcome for the steps that decide it.
    pub async fn run(
        &self,
        step: CleanupStep,
        file: &FileRecord,
    ) -> Result<Option<BytesOutcome>, AppError> {
        match step {
            CleanupStep::Dependents(kind) => {
                let removed = self.dependents.delete_for_file(kind, file.id).await?;
                if removed > 0 {
                    tracing::debug!(file_id = %file.id, table = kind.table(), removed, "Dependent rows removed");
                }
                Ok(None)
            }
            CleanupStep::Bytes => {
                let references = self.files.reference_count(file).await?;
                if references > 0 {
                    tracing::info!(file_id = %file.id, references, "Bytes still referenced; keeping them");
                    return Ok(Some(BytesOutcome::Retained { references }));
                }
                self.delete_bytes(file, true).await?;
                Ok(Some(BytesOutcome::Deleted))
            }
            CleanupStep::Record => {
                self.files.delete(file.id).await?;
                // Two records sharing bytes can cascade at once and each see
                // the other; whoever removes its row last sees zero here.
                let references = self.files.reference_count(file).await?;
                if references == 0 {
                    self.delete_bytes(file, false).await?;
                    return Ok(Some(BytesOutcome::Deleted));
                }
                Ok(None)
            }
        }
    }

    /// Remove original and thumbnail. With `strict`, a failed original delete
    /// is an error so the sweep retries the cascade.
    async fn delete_bytes(&self, file: &FileRecord, strict: bool) -> Result<(), AppError> {
        let channel = match self.channels.raw(file.channel_id).await {
            Ok(channel) => channel,
            Err(AppError::NotFound(_)) => {
                tracing::warn!(file_id = %file.id, channel_id = %file.channel_id, "Channel gone; nothing to delete");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let removed = self.router.delete(&channel, &file.object_path).await;
        if let Some(ref thumb) = file.thumbnail_path {
            self.router.delete(&channel, thumb).await;
        }
        if !removed && strict {
            return Err(AppError::Storage(format!(
                "failed to delete {} from channel '{}'",
                file.object_path, channel.name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cascade_clears_dependents_before_bytes_and_record() {
        let last_dependent = CASCADE
            .iter()
            .rposition(|s| matches!(s, CleanupStep::Dependents(_)))
            .unwrap();
        let bytes = CASCADE.iter().position(|s| *s == CleanupStep::Bytes).unwrap();
        let record = CASCADE.iter().position(|s| *s == CleanupStep::Record).unwrap();

        assert!(last_dependent < bytes);
        assert!(bytes < record);
        assert_eq!(record, CASCADE.len() - 1);
    }

    #[test]
    fn cascade_covers_every_dependent_table() {
        for kind in DependentKind::ALL {
            assert!(CASCADE.contains(&CleanupStep::Dependents(kind)));
        }
    }
}
