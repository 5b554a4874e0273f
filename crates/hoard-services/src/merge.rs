//! Merge: reassemble uploaded chunks and hand the result to ingestion.
//!
//! Only the holder of the session's merge lease assembles. Everyone else sees
//! either the cached descriptor of a completed session or `MergeInProgress`.

use std::path::Path;
use std::sync::Arc;

use hoard_core::models::file::FileDescriptor;
use hoard_core::models::upload::{ChunkStatus, SessionStatus, UploadSession};
use hoard_core::{AppError, Clock, ContentDigest, ContentHasher};
use hoard_db::FileRepository;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use uuid::Uuid;

use crate::ingest::{IngestPipeline, IngestRequest};
use crate::sessions::UploadSessionManager;

const COPY_BUFFER_SIZE: usize = 64 * 1024;

pub struct MergeEngine {
    sessions: Arc<UploadSessionManager>,
    ingest: Arc<IngestPipeline>,
    files: Arc<dyn FileRepository>,
    clock: Arc<dyn Clock>,
}

impl MergeEngine {
    pub fn new(
        sessions: Arc<UploadSessionManager>,
        ingest: Arc<IngestPipeline>,
        files: Arc<dyn FileRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sessions,
            ingest,
            files,
            clock,
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn complete(&self, session_id: Uuid) -> Result<FileDescriptor, AppError> {
        let repo = self.sessions.repository();
        let session = repo
            .get_session(session_id)
            .await?
            .ok_or(AppError::SessionNotFound(session_id))?;

        match session.status {
            SessionStatus::Completed => return self.completed_descriptor(&session).await,
            SessionStatus::Failed => {
                return Err(AppError::SessionNotActive {
                    session_id,
                    status: session.status,
                })
            }
            SessionStatus::Pending | SessionStatus::Uploading => {}
        }
        if session.is_expired(self.clock.now()) {
            return Err(AppError::SessionExpired(session_id));
        }
        if !session.is_ready_to_merge() {
            return Err(AppError::IncompleteUpload {
                uploaded: session.uploaded_chunks,
                total: session.total_chunks,
            });
        }

        let claimed = repo
            .claim_merge(session_id, self.clock.now(), self.sessions.merge_lease())
            .await?;
        let Some(session) = claimed else {
            return self.lost_claim(session_id).await;
        };

        let start = std::time::Instant::now();
        let staging = self.sessions.scratch().staging_path(session_id);

        let computed = match self.assemble(&session, &staging).await {
            Ok(hash) => hash,
            Err(e) => {
                self.abandon(session_id, &staging).await;
                return Err(e);
            }
        };

        if !ContentHasher::matches(&computed, &session.content_hash) {
            remove_staging(&staging).await;
            repo.mark_failed(
                session_id,
                Some("whole-file integrity check failed"),
                self.clock.now(),
            )
            .await?;
            self.sessions.schedule_purge(session_id);
            tracing::warn!(
                declared = %session.content_hash,
                computed = %computed,
                "Merged file does not match declared hash"
            );
            return Err(AppError::IntegrityCheckFailed {
                declared: session.content_hash.clone(),
                computed,
            });
        }

        let request = IngestRequest {
            owner_id: session.owner_id,
            file_name: session.file_name.clone(),
            content_type: session.content_type.clone(),
            content_hash: computed,
            size: session.file_size as u64,
            folder_id: session.folder_id,
            access_level: session.access_level,
            channel_id: session.channel_id,
        };

        // A failed ingest leaves the session active with its chunks intact so
        // Complete can be retried once the backend recovers.
        let record = match self.ingest.ingest(request, &staging).await {
            Ok(record) => record,
            Err(e) => {
                self.abandon(session_id, &staging).await;
                return Err(e);
            }
        };
        remove_staging(&staging).await;

        let now = self.clock.now();
        if !repo.mark_completed(session_id, record.id, now).await? {
            // The session was cancelled or expired out from under the merge.
            self.files.mark_pending_deletion(record.id, now).await?;
            let status = repo
                .get_session(session_id)
                .await?
                .map(|s| s.status)
                .unwrap_or(SessionStatus::Failed);
            tracing::warn!(file_id = %record.id, status = %status, "Session left active state during merge; record withdrawn");
            return Err(AppError::SessionNotActive { session_id, status });
        }
        self.sessions.schedule_purge(session_id);

        tracing::info!(
            file_id = %record.id,
            duplicate = record.is_duplicate(),
            size_bytes = record.size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Upload completed"
        );

        Ok(self.ingest.describe(&record).await)
    }

    /// Concatenate chunk blobs in index order into `staging`, hashing on the way.
    async fn assemble(&self, session: &UploadSession, staging: &Path) -> Result<String, AppError> {
        let chunks = self.sessions.repository().list_chunks(session.id).await?;
        let uploaded = chunks
            .iter()
            .filter(|c| c.status == ChunkStatus::Uploaded)
            .count() as i32;
        if uploaded != session.total_chunks || chunks.len() as i32 != session.total_chunks {
            return Err(AppError::IncompleteUpload {
                uploaded,
                total: session.total_chunks,
            });
        }

        let mut ordered = chunks;
        ordered.sort_by_key(|c| c.chunk_index);

        self.sessions.scratch().prepare(session.id).await?;
        let mut out = tokio::fs::File::create(staging).await?;
        let mut digest = ContentDigest::new();
        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];

        for chunk in &ordered {
            let blob = chunk.blob_path.as_deref().ok_or_else(|| {
                AppError::Internal(format!(
                    "chunk {} of session {} has no blob",
                    chunk.chunk_index, session.id
                ))
            })?;
            let mut input = self.sessions.scratch().open_chunk(blob).await?;
            loop {
                let read = input.read(&mut buffer).await?;
                if read == 0 {
                    break;
                }
                digest.update(&buffer[..read]);
                out.write_all(&buffer[..read]).await?;
            }
        }
        out.flush().await?;
        out.sync_all().await?;

        tracing::debug!(
            session_id = %session.id,
            chunks = ordered.len(),
            size_bytes = digest.len(),
            "Chunks assembled"
        );
        Ok(digest.finalize())
    }

    async fn completed_descriptor(&self, session: &UploadSession) -> Result<FileDescriptor, AppError> {
        let file_id = session.file_id.ok_or_else(|| {
            AppError::Internal(format!("completed session {} has no file", session.id))
        })?;
        let record = self
            .files
            .get(file_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("file {}", file_id)))?;
        Ok(self.ingest.describe(&record).await)
    }

    /// Another caller holds the lease, or the session moved on since we read it.
    async fn lost_claim(&self, session_id: Uuid) -> Result<FileDescriptor, AppError> {
        let current = self
            .sessions
            .repository()
            .get_session(session_id)
            .await?
            .ok_or(AppError::SessionNotFound(session_id))?;
        match current.status {
            SessionStatus::Completed => self.completed_descriptor(&current).await,
            SessionStatus::Failed => Err(AppError::SessionNotActive {
                session_id,
                status: current.status,
            }),
            SessionStatus::Pending | SessionStatus::Uploading => {
                if current.is_expired(self.clock.now()) {
                    Err(AppError::SessionExpired(session_id))
                } else {
                    Err(AppError::MergeInProgress(session_id))
                }
            }
        }
    }

    async fn abandon(&self, session_id: Uuid, staging: &Path) {
        remove_staging(staging).await;
        if let Err(e) = self.sessions.repository().release_merge(session_id).await {
            tracing::warn!(session_id = %session_id, error = %e, "Failed to release merge lease");
        }
    }
}

async fn remove_staging(staging: &Path) {
    match tokio::fs::remove_file(staging).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %staging.display(), error = %e, "Failed to remove staging file")
        }
    }
}
