//! Repository trait abstractions
//!
//! These traits define the interface the services need from persistence,
//! allowing the same service code to run against PostgreSQL or memory.
//!
//! Every state transition that can race is a conditional update: the method
//! reports whether *this* call performed the transition.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use hoard_core::models::channel::StorageChannel;
use hoard_core::models::file::{AccessLevel, FileRecord};
use hoard_core::models::upload::{ChunkMark, UploadChunk, UploadSession};
use hoard_core::AppError;
use uuid::Uuid;

#[async_trait]
pub trait UploadSessionRepository: Send + Sync {
    /// Insert a session together with one pending row per chunk.
    async fn create_session(
        &self,
        session: &UploadSession,
        chunks: &[UploadChunk],
    ) -> Result<(), AppError>;

    async fn get_session(&self, id: Uuid) -> Result<Option<UploadSession>, AppError>;

    async fn get_chunk(
        &self,
        session_id: Uuid,
        chunk_index: i32,
    ) -> Result<Option<UploadChunk>, AppError>;

    /// All chunks of a session ordered by index.
    async fn list_chunks(&self, session_id: Uuid) -> Result<Vec<UploadChunk>, AppError>;

    /// Conditional `pending -> uploaded` chunk transition. When this call wins,
    /// the session's uploaded counter is incremented and a `pending` session
    /// moves to `uploading`, atomically with the chunk update.
    async fn mark_chunk_uploaded(
        &self,
        session_id: Uuid,
        chunk_index: i32,
        content_hash: &str,
        blob_path: &str,
        now: DateTime<Utc>,
    ) -> Result<ChunkMark, AppError>;

    /// Take the merge lease of an active, unexpired session. Returns the
    /// session when the lease was granted, `None` when another caller holds a
    /// live lease or the session is no longer active.
    async fn claim_merge(
        &self,
        session_id: Uuid,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Option<UploadSession>, AppError>;

    async fn release_merge(&self, session_id: Uuid) -> Result<(), AppError>;

    /// Conditional `uploading -> completed`.
    async fn mark_completed(
        &self,
        session_id: Uuid,
        file_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    /// Conditional transition of an active session to `failed`.
    async fn mark_failed(
        &self,
        session_id: Uuid,
        error_message: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    /// Flip active sessions past their expiry to `failed`; returns their ids.
    async fn fail_expired(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Uuid>, AppError>;

    /// Delete terminal sessions (and their chunk rows) last touched before `cutoff`.
    async fn delete_finished_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<u64, AppError>;
}

#[async_trait]
pub trait FileRepository: Send + Sync {
    /// Insert a record. A second live canonical record for the same
    /// (owner, content hash) fails with `AppError::DuplicateContent`.
    async fn insert(&self, file: &FileRecord) -> Result<(), AppError>;

    /// Insert a record that shares the bytes of `file.original_file_id`, only
    /// while that original is still `normal`. Returns `false` without
    /// inserting once the original is soft-deleted or gone.
    async fn insert_duplicate(&self, file: &FileRecord) -> Result<bool, AppError>;

    async fn get(&self, id: Uuid) -> Result<Option<FileRecord>, AppError>;

    /// Live record for (owner, hash): canonical records first, then oldest.
    async fn find_by_content_hash(
        &self,
        owner_id: Uuid,
        content_hash: &str,
    ) -> Result<Option<FileRecord>, AppError>;

    /// Whether a live record with this display name exists in the folder.
    async fn name_exists(
        &self,
        owner_id: Uuid,
        folder_id: Option<Uuid>,
        display_name: &str,
    ) -> Result<bool, AppError>;

    /// Conditional `normal -> pending_deletion`.
    async fn mark_pending_deletion(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, AppError>;

    async fn update_access_level(
        &self,
        id: Uuid,
        access_level: AccessLevel,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    /// Set or clear the retention expiry of a live record.
    async fn update_expiry(
        &self,
        id: Uuid,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    /// Records other than `file` that depend on its physical blob: rows with
    /// the same owner and content hash stored at the same location, plus
    /// rows whose `original_file_id` is `file.id`.
    async fn reference_count(&self, file: &FileRecord) -> Result<i64, AppError>;

    async fn delete(&self, id: Uuid) -> Result<bool, AppError>;

    /// Records soft-deleted before `cutoff`, oldest first.
    async fn list_pending_deletion(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<FileRecord>, AppError>;

    /// Live records whose retention expiry has passed.
    async fn list_expired(&self, now: DateTime<Utc>, limit: i64)
        -> Result<Vec<FileRecord>, AppError>;

    /// Bytes stored for an owner, counting each physical blob once.
    async fn owner_usage(&self, owner_id: Uuid) -> Result<i64, AppError>;

    async fn count_on_channel(&self, channel_id: Uuid) -> Result<i64, AppError>;
}

#[async_trait]
pub trait ChannelRepository: Send + Sync {
    async fn list(&self) -> Result<Vec<StorageChannel>, AppError>;

    async fn get(&self, id: Uuid) -> Result<Option<StorageChannel>, AppError>;

    async fn get_by_name(&self, name: &str) -> Result<Option<StorageChannel>, AppError>;

    async fn get_default(&self) -> Result<Option<StorageChannel>, AppError>;

    async fn insert(&self, channel: &StorageChannel) -> Result<(), AppError>;

    /// Replace a channel's attributes and configuration items.
    async fn update(&self, channel: &StorageChannel) -> Result<bool, AppError>;

    async fn delete(&self, id: Uuid) -> Result<bool, AppError>;

    /// Atomically clear the old default and mark `id` (which must be enabled)
    /// as the new one. Returns `false` when `id` is missing or disabled.
    async fn set_default(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, AppError>;
}

/// Per-record tables owned by other subsystems and cleared on hard delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependentKind {
    Tags,
    AiMetadata,
    Stats,
    Vectors,
    AccessLogs,
    ProcessingLogs,
}

impl DependentKind {
    pub const ALL: [DependentKind; 6] = [
        DependentKind::Tags,
        DependentKind::AiMetadata,
        DependentKind::Stats,
        DependentKind::Vectors,
        DependentKind::AccessLogs,
        DependentKind::ProcessingLogs,
    ];

    pub fn table(self) -> &'static str {
        match self {
            DependentKind::Tags => "file_tags",
            DependentKind::AiMetadata => "file_ai_metadata",
            DependentKind::Stats => "file_stats",
            DependentKind::Vectors => "file_vectors",
            DependentKind::AccessLogs => "file_access_logs",
            DependentKind::ProcessingLogs => "file_processing_logs",
        }
    }
}

#[async_trait]
pub trait DependentRecordsRepository: Send + Sync {
    /// Delete every row of `kind` belonging to `file_id`. Deleting nothing is success.
    async fn delete_for_file(&self, kind: DependentKind, file_id: Uuid) -> Result<u64, AppError>;
}
