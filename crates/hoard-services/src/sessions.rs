//! Chunked upload state machine.
//!
//! Chunk rows are written once: the conditional `pending -> uploaded`
//! transition in the repository decides which of two racing submissions of the
//! same index is recorded. A loser with the same digest is a duplicate success,
//! a loser with a different digest is a `ChunkConflict`.

use std::sync::Arc;

use bytes::Bytes;
use chrono::Duration;
use hoard_core::config::UploadConfig;
use hoard_core::hashing::normalize_hash;
use hoard_core::models::task::TaskKind;
use hoard_core::models::upload::{
    total_chunk_count, ChunkMark, ChunkReceipt, ChunkStatus, InitUploadRequest,
    InitUploadResponse, SessionProgress, SessionStatus, UploadChunk, UploadSession,
};
use hoard_core::{AppError, Clock, ContentHasher};
use hoard_db::{FileRepository, UploadSessionRepository};
use hoard_storage::ScratchSpace;
use hoard_worker::TaskQueue;
use uuid::Uuid;
use validator::Validate;

use crate::channels::ChannelRegistry;

pub struct UploadSessionManager {
    sessions: Arc<dyn UploadSessionRepository>,
    files: Arc<dyn FileRepository>,
    channels: Arc<ChannelRegistry>,
    scratch: Arc<ScratchSpace>,
    queue: TaskQueue,
    clock: Arc<dyn Clock>,
    config: UploadConfig,
}

impl UploadSessionManager {
    pub fn new(
        sessions: Arc<dyn UploadSessionRepository>,
        files: Arc<dyn FileRepository>,
        channels: Arc<ChannelRegistry>,
        scratch: Arc<ScratchSpace>,
        queue: TaskQueue,
        clock: Arc<dyn Clock>,
        config: UploadConfig,
    ) -> Self {
        Self {
            sessions,
            files,
            channels,
            scratch,
            queue,
            clock,
            config,
        }
    }

    /// Start a session: one pending chunk row per index and a scratch directory.
    #[tracing::instrument(skip(self, request), fields(owner_id = %request.owner_id, file_size = request.file_size))]
    pub async fn init(&self, request: InitUploadRequest) -> Result<InitUploadResponse, AppError> {
        request.validate()?;
        let content_hash = normalize_hash(&request.content_hash)?;

        let upload = &self.config;
        if request.chunk_size < upload.min_chunk_size_bytes
            || request.chunk_size > upload.max_chunk_size_bytes
        {
            return Err(AppError::InvalidChunkSize {
                chunk_size: request.chunk_size,
                min: upload.min_chunk_size_bytes,
                max: upload.max_chunk_size_bytes,
            });
        }
        if !upload.is_content_type_allowed(&request.content_type) {
            return Err(AppError::UnsupportedMediaType(request.content_type));
        }
        if request.file_size > upload.max_file_size_bytes {
            return Err(AppError::PayloadTooLarge {
                size: request.file_size,
                max: upload.max_file_size_bytes,
            });
        }

        let total_chunks = total_chunk_count(request.file_size, request.chunk_size);
        if total_chunks > upload.max_chunk_count as u64 {
            return Err(AppError::InvalidInput(format!(
                "{} chunks exceeds the maximum of {}",
                total_chunks, upload.max_chunk_count
            )));
        }

        self.check_quota(request.owner_id, request.file_size).await?;

        if let Some(channel_id) = request.channel_id {
            let channel = self.channels.raw(channel_id).await?;
            if !channel.enabled {
                return Err(AppError::ChannelUnavailable(format!(
                    "channel '{}' is disabled",
                    channel.name
                )));
            }
        }

        let now = self.clock.now();
        let session = UploadSession {
            id: Uuid::new_v4(),
            owner_id: request.owner_id,
            file_name: request.file_name,
            file_size: request.file_size as i64,
            content_type: request.content_type,
            content_hash,
            chunk_size: request.chunk_size as i64,
            total_chunks: total_chunks as i32,
            uploaded_chunks: 0,
            status: SessionStatus::Pending,
            folder_id: request.folder_id,
            access_level: request.access_level,
            channel_id: request.channel_id,
            file_id: None,
            error_message: None,
            merge_claimed_at: None,
            expires_at: now + Duration::seconds(upload.session_ttl_secs),
            created_at: now,
            updated_at: now,
        };

        let chunks: Vec<UploadChunk> = (0..session.total_chunks)
            .filter_map(|index| {
                session
                    .expected_chunk_size(index)
                    .map(|size| UploadChunk::pending(session.id, index, size))
            })
            .collect();

        self.sessions.create_session(&session, &chunks).await?;
        self.scratch.prepare(session.id).await?;

        tracing::info!(
            session_id = %session.id,
            total_chunks = session.total_chunks,
            chunk_size = session.chunk_size,
            expires_at = %session.expires_at,
            "Upload session created"
        );

        Ok(InitUploadResponse {
            session_id: session.id,
            total_chunks: session.total_chunks,
            chunk_size: session.chunk_size,
            status: session.status,
            expires_at: session.expires_at,
        })
    }

    /// Advisory: concurrent inits from one owner are not linearised.
    async fn check_quota(&self, owner_id: Uuid, requested: u64) -> Result<(), AppError> {
        let Some(limit) = self.config.user_quota_bytes else {
            return Ok(());
        };
        let used = self.files.owner_usage(owner_id).await?.max(0) as u64;
        if used.saturating_add(requested) > limit {
            tracing::warn!(owner_id = %owner_id, used, requested, limit, "Storage quota exceeded");
            return Err(AppError::QuotaExceeded {
                used,
                requested,
                limit,
            });
        }
        Ok(())
    }

    /// Session that still accepts writes.
    pub(crate) async fn active_session(&self, session_id: Uuid) -> Result<UploadSession, AppError> {
        let session = self
            .sessions
            .get_session(session_id)
            .await?
            .ok_or(AppError::SessionNotFound(session_id))?;
        if !session.status.is_active() {
            return Err(AppError::SessionNotActive {
                session_id,
                status: session.status,
            });
        }
        if session.is_expired(self.clock.now()) {
            return Err(AppError::SessionExpired(session_id));
        }
        Ok(session)
    }

    #[tracing::instrument(skip(self, declared_hash, data), fields(size_bytes = data.len()))]
    pub async fn accept_chunk(
        &self,
        session_id: Uuid,
        chunk_index: i32,
        declared_hash: &str,
        data: Bytes,
    ) -> Result<ChunkReceipt, AppError> {
        let session = self.active_session(session_id).await?;

        let expected = session
            .expected_chunk_size(chunk_index)
            .ok_or(AppError::ChunkIndexOutOfRange {
                index: chunk_index,
                total: session.total_chunks,
            })?;
        let actual = data.len() as i64;
        if actual != expected {
            return Err(AppError::SizeMismatch {
                index: chunk_index,
                expected,
                actual,
            });
        }

        let declared = normalize_hash(declared_hash)?;
        let computed = ContentHasher::digest(&data);
        if !ContentHasher::matches(&computed, &declared) {
            tracing::warn!(chunk_index, declared = %declared, computed = %computed, "Chunk hash mismatch");
            return Err(AppError::HashMismatch {
                index: chunk_index,
                declared,
                computed,
            });
        }

        // Resubmission of a stored chunk never touches scratch.
        if let Some(chunk) = self.sessions.get_chunk(session_id, chunk_index).await? {
            if chunk.status == ChunkStatus::Uploaded {
                return self
                    .resubmitted(&session, chunk_index, chunk.content_hash, &computed)
                    .await;
            }
        }

        let blob = self.scratch.write_chunk(session_id, chunk_index, &data).await?;
        let mark = self
            .sessions
            .mark_chunk_uploaded(session_id, chunk_index, &computed, &blob, self.clock.now())
            .await;

        match mark {
            Ok(ChunkMark::Marked) => {
                let progress = self.progress(session_id).await?;
                tracing::debug!(
                    chunk_index,
                    uploaded_chunks = progress.uploaded_chunks,
                    total_chunks = progress.total_chunks,
                    "Chunk accepted"
                );
                Ok(ChunkReceipt {
                    chunk_index,
                    duplicate: false,
                    progress,
                })
            }
            Ok(ChunkMark::AlreadyUploaded { content_hash }) => {
                // Lost the race for this index; keep the winner's blob.
                self.discard_blob(&blob).await;
                self.resubmitted(&session, chunk_index, content_hash, &computed)
                    .await
            }
            Err(e) => {
                self.discard_blob(&blob).await;
                Err(e)
            }
        }
    }

    async fn resubmitted(
        &self,
        session: &UploadSession,
        chunk_index: i32,
        stored_hash: Option<String>,
        computed: &str,
    ) -> Result<ChunkReceipt, AppError> {
        let same = stored_hash
            .as_deref()
            .is_some_and(|stored| ContentHasher::matches(computed, stored));
        if !same {
            tracing::warn!(session_id = %session.id, chunk_index, "Chunk resubmitted with different content");
            return Err(AppError::ChunkConflict { index: chunk_index });
        }
        Ok(ChunkReceipt {
            chunk_index,
            duplicate: true,
            progress: self.progress(session.id).await?,
        })
    }

    async fn discard_blob(&self, blob: &str) {
        if let Err(e) = self.scratch.discard_chunk(blob).await {
            tracing::warn!(blob, error = %e, "Failed to discard chunk blob");
        }
    }

    async fn progress(&self, session_id: Uuid) -> Result<SessionProgress, AppError> {
        self.sessions
            .get_session(session_id)
            .await?
            .map(|s| s.to_progress())
            .ok_or(AppError::SessionNotFound(session_id))
    }

    /// Side-effect free view of a session.
    pub async fn status(&self, session_id: Uuid) -> Result<SessionProgress, AppError> {
        self.progress(session_id).await
    }

    /// Indices still waiting for bytes, for clients resuming an upload.
    pub async fn missing_chunks(&self, session_id: Uuid) -> Result<Vec<i32>, AppError> {
        if self.sessions.get_session(session_id).await?.is_none() {
            return Err(AppError::SessionNotFound(session_id));
        }
        Ok(self
            .sessions
            .list_chunks(session_id)
            .await?
            .into_iter()
            .filter(|c| c.status == ChunkStatus::Pending)
            .map(|c| c.chunk_index)
            .collect())
    }

    /// Fail the session and schedule scratch removal. Cancelling a failed
    /// session again is a no-op; a completed session cannot be cancelled.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, session_id: Uuid) -> Result<SessionProgress, AppError> {
        let session = self
            .sessions
            .get_session(session_id)
            .await?
            .ok_or(AppError::SessionNotFound(session_id))?;

        match session.status {
            SessionStatus::Completed => {
                return Err(AppError::SessionNotActive {
                    session_id,
                    status: session.status,
                })
            }
            SessionStatus::Failed => {}
            SessionStatus::Pending | SessionStatus::Uploading => {
                let flipped = self
                    .sessions
                    .mark_failed(session_id, Some("cancelled"), self.clock.now())
                    .await?;
                if flipped {
                    tracing::info!(uploaded_chunks = session.uploaded_chunks, "Upload session cancelled");
                } else {
                    // Raced with a completion or another cancel; report what won.
                    let current = self.progress(session_id).await?;
                    if current.status == SessionStatus::Completed {
                        return Err(AppError::SessionNotActive {
                            session_id,
                            status: current.status,
                        });
                    }
                }
            }
        }

        self.schedule_purge(session_id);
        self.progress(session_id).await
    }

    /// Hand scratch removal to the worker pool; the sweep catches it otherwise.
    pub(crate) fn schedule_purge(&self, session_id: Uuid) {
        if !self.queue.try_submit(TaskKind::PurgeScratch { session_id }) {
            tracing::debug!(session_id = %session_id, "Scratch purge deferred to sweep");
        }
    }

    pub(crate) fn repository(&self) -> &Arc<dyn UploadSessionRepository> {
        &self.sessions
    }

    pub(crate) fn scratch(&self) -> &Arc<ScratchSpace> {
        &self.scratch
    }

    pub(crate) fn merge_lease(&self) -> Duration {
        Duration::seconds(self.config.merge_lease_secs)
    }
}
