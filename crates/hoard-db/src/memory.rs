//! In-memory repositories
//!
//! Each repository keeps its state behind one mutex so multi-row transitions
//! (chunk flip plus session counter, default reassignment) are atomic the same
//! way the PostgreSQL statements are.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use hoard_core::models::channel::StorageChannel;
use hoard_core::models::file::{AccessLevel, FileRecord, FileStatus};
use hoard_core::models::upload::{ChunkMark, ChunkStatus, SessionStatus, UploadChunk, UploadSession};
use hoard_core::AppError;
use uuid::Uuid;

use crate::traits::{
    ChannelRepository, DependentKind, DependentRecordsRepository, FileRepository,
    UploadSessionRepository,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct SessionState {
    sessions: HashMap<Uuid, UploadSession>,
    chunks: HashMap<(Uuid, i32), UploadChunk>,
}

#[derive(Clone, Default)]
pub struct MemoryUploadSessionRepository {
    state: Arc<Mutex<SessionState>>,
}

impl MemoryUploadSessionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_count(&self) -> usize {
        lock(&self.state).sessions.len()
    }
}

#[async_trait]
impl UploadSessionRepository for MemoryUploadSessionRepository {
    async fn create_session(
        &self,
        session: &UploadSession,
        chunks: &[UploadChunk],
    ) -> Result<(), AppError> {
        let mut state = lock(&self.state);
        if state.sessions.contains_key(&session.id) {
            return Err(AppError::InvalidInput(format!(
                "session {} already exists",
                session.id
            )));
        }
        state.sessions.insert(session.id, session.clone());
        for chunk in chunks {
            state
                .chunks
                .insert((chunk.session_id, chunk.chunk_index), chunk.clone());
        }
        Ok(())
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<UploadSession>, AppError> {
        Ok(lock(&self.state).sessions.get(&id).cloned())
    }

    async fn get_chunk(
        &self,
        session_id: Uuid,
        chunk_index: i32,
    ) -> Result<Option<UploadChunk>, AppError> {
        Ok(lock(&self.state)
            .chunks
            .get(&(session_id, chunk_index))
            .cloned())
    }

    async fn list_chunks(&self, session_id: Uuid) -> Result<Vec<UploadChunk>, AppError> {
        let state = lock(&self.state);
        let mut chunks: Vec<UploadChunk> = state
            .chunks
            .values()
            .filter(|c| c.session_id == session_id)
            .cloned()
            .collect();
        chunks.sort_by_key(|c| c.chunk_index);
        Ok(chunks)
    }

    async fn mark_chunk_uploaded(
        &self,
        session_id: Uuid,
        chunk_index: i32,
        content_hash: &str,
        blob_path: &str,
        now: DateTime<Utc>,
    ) -> Result<ChunkMark, AppError> {
        let mut state = lock(&self.state);
        let SessionState { sessions, chunks } = &mut *state;

        let session = sessions
            .get_mut(&session_id)
            .ok_or(AppError::SessionNotFound(session_id))?;
        let chunk = chunks
            .get_mut(&(session_id, chunk_index))
            .ok_or(AppError::ChunkIndexOutOfRange {
                index: chunk_index,
                total: session.total_chunks,
            })?;

        if chunk.status == ChunkStatus::Uploaded {
            return Ok(ChunkMark::AlreadyUploaded {
                content_hash: chunk.content_hash.clone(),
            });
        }

        chunk.status = ChunkStatus::Uploaded;
        chunk.content_hash = Some(content_hash.to_string());
        chunk.blob_path = Some(blob_path.to_string());
        chunk.uploaded_at = Some(now);

        session.uploaded_chunks += 1;
        if session.status == SessionStatus::Pending {
            session.status = SessionStatus::Uploading;
        }
        session.updated_at = now;
        Ok(ChunkMark::Marked)
    }

    async fn claim_merge(
        &self,
        session_id: Uuid,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Option<UploadSession>, AppError> {
        let mut state = lock(&self.state);
        let Some(session) = state.sessions.get_mut(&session_id) else {
            return Ok(None);
        };
        let lease_free = session
            .merge_claimed_at
            .map_or(true, |claimed| claimed < now - lease);
        if !session.status.is_active() || session.is_expired(now) || !lease_free {
            return Ok(None);
        }
        session.merge_claimed_at = Some(now);
        session.updated_at = now;
        Ok(Some(session.clone()))
    }

    async fn release_merge(&self, session_id: Uuid) -> Result<(), AppError> {
        if let Some(session) = lock(&self.state).sessions.get_mut(&session_id) {
            session.merge_claimed_at = None;
        }
        Ok(())
    }

    async fn mark_completed(
        &self,
        session_id: Uuid,
        file_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut state = lock(&self.state);
        match state.sessions.get_mut(&session_id) {
            Some(session) if session.status.can_transition_to(SessionStatus::Completed) => {
                session.status = SessionStatus::Completed;
                session.file_id = Some(file_id);
                session.merge_claimed_at = None;
                session.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_failed(
        &self,
        session_id: Uuid,
        error_message: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut state = lock(&self.state);
        match state.sessions.get_mut(&session_id) {
            Some(session) if session.status.can_transition_to(SessionStatus::Failed) => {
                session.status = SessionStatus::Failed;
                session.error_message = error_message.map(str::to_string);
                session.merge_claimed_at = None;
                session.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn fail_expired(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Uuid>, AppError> {
        let mut state = lock(&self.state);
        let mut expired: Vec<&mut UploadSession> = state
            .sessions
            .values_mut()
            .filter(|s| s.status.is_active() && s.is_expired(now))
            .collect();
        expired.sort_by_key(|s| s.expires_at);

        let mut failed = Vec::new();
        for session in expired.into_iter().take(limit.max(0) as usize) {
            session.status = SessionStatus::Failed;
            session.error_message = Some("session expired".to_string());
            session.merge_claimed_at = None;
            session.updated_at = now;
            failed.push(session.id);
        }
        Ok(failed)
    }

    async fn delete_finished_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<u64, AppError> {
        let mut state = lock(&self.state);
        let mut finished: Vec<(DateTime<Utc>, Uuid)> = state
            .sessions
            .values()
            .filter(|s| s.status.is_terminal() && s.updated_at < cutoff)
            .map(|s| (s.updated_at, s.id))
            .collect();
        finished.sort();
        finished.truncate(limit.max(0) as usize);

        for (_, id) in &finished {
            state.sessions.remove(id);
            state.chunks.retain(|(session_id, _), _| session_id != id);
        }
        Ok(finished.len() as u64)
    }
}

#[derive(Clone, Default)]
pub struct MemoryFileRepository {
    files: Arc<Mutex<HashMap<Uuid, FileRecord>>>,
}

impl MemoryFileRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        lock(&self.files).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every stored record, including soft-deleted ones.
    pub fn all(&self) -> Vec<FileRecord> {
        lock(&self.files).values().cloned().collect()
    }

    fn live_canonical(file: &FileRecord, owner_id: Uuid, content_hash: &str) -> bool {
        file.owner_id == owner_id
            && file.content_hash == content_hash
            && file.original_file_id.is_none()
            && file.status == FileStatus::Normal
    }
}

#[async_trait]
impl FileRepository for MemoryFileRepository {
    async fn insert(&self, file: &FileRecord) -> Result<(), AppError> {
        let mut files = lock(&self.files);
        if files.contains_key(&file.id) {
            return Err(AppError::InvalidInput(format!("file {} already exists", file.id)));
        }
        let canonical = file.original_file_id.is_none() && file.status == FileStatus::Normal;
        if canonical
            && files
                .values()
                .any(|f| Self::live_canonical(f, file.owner_id, &file.content_hash))
        {
            return Err(AppError::DuplicateContent {
                owner_id: file.owner_id,
                content_hash: file.content_hash.clone(),
            });
        }
        files.insert(file.id, file.clone());
        Ok(())
    }

    async fn insert_duplicate(&self, file: &FileRecord) -> Result<bool, AppError> {
        let Some(original_id) = file.original_file_id else {
            return Err(AppError::InvalidInput(format!(
                "file {} has no original to share",
                file.id
            )));
        };
        let mut files = lock(&self.files);
        if files.contains_key(&file.id) {
            return Err(AppError::InvalidInput(format!("file {} already exists", file.id)));
        }
        let original_live = files
            .get(&original_id)
            .is_some_and(|original| original.status == FileStatus::Normal);
        if !original_live {
            return Ok(false);
        }
        files.insert(file.id, file.clone());
        Ok(true)
    }

    async fn get(&self, id: Uuid) -> Result<Option<FileRecord>, AppError> {
        Ok(lock(&self.files).get(&id).cloned())
    }

    async fn find_by_content_hash(
        &self,
        owner_id: Uuid,
        content_hash: &str,
    ) -> Result<Option<FileRecord>, AppError> {
        let files = lock(&self.files);
        Ok(files
            .values()
            .filter(|f| {
                f.owner_id == owner_id
                    && f.content_hash == content_hash
                    && f.status == FileStatus::Normal
            })
            .min_by_key(|f| (f.original_file_id.is_some(), f.created_at))
            .cloned())
    }

    async fn name_exists(
        &self,
        owner_id: Uuid,
        folder_id: Option<Uuid>,
        display_name: &str,
    ) -> Result<bool, AppError> {
        Ok(lock(&self.files).values().any(|f| {
            f.owner_id == owner_id
                && f.folder_id == folder_id
                && f.display_name == display_name
                && f.status == FileStatus::Normal
        }))
    }

    async fn mark_pending_deletion(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, AppError> {
        let mut files = lock(&self.files);
        match files.get_mut(&id) {
            Some(file) if file.status == FileStatus::Normal => {
                file.status = FileStatus::PendingDeletion;
                file.deleted_at = Some(now);
                file.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_access_level(
        &self,
        id: Uuid,
        access_level: AccessLevel,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut files = lock(&self.files);
        match files.get_mut(&id) {
            Some(file) if file.status == FileStatus::Normal => {
                file.access_level = access_level;
                file.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_expiry(
        &self,
        id: Uuid,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut files = lock(&self.files);
        match files.get_mut(&id) {
            Some(file) if file.status == FileStatus::Normal => {
                file.expires_at = expires_at;
                file.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reference_count(&self, file: &FileRecord) -> Result<i64, AppError> {
        let files = lock(&self.files);
        let refs = files
            .values()
            .filter(|f| f.id != file.id)
            .filter(|f| {
                (f.owner_id == file.owner_id
                    && f.content_hash == file.content_hash
                    && f.channel_id == file.channel_id
                    && f.object_path == file.object_path)
                    || f.original_file_id == Some(file.id)
            })
            .count();
        Ok(refs as i64)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, AppError> {
        Ok(lock(&self.files).remove(&id).is_some())
    }

    async fn list_pending_deletion(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<FileRecord>, AppError> {
        let files = lock(&self.files);
        let mut pending: Vec<FileRecord> = files
            .values()
            .filter(|f| {
                f.status == FileStatus::PendingDeletion
                    && f.deleted_at.is_some_and(|at| at <= cutoff)
            })
            .cloned()
            .collect();
        pending.sort_by_key(|f| f.deleted_at);
        pending.truncate(limit.max(0) as usize);
        Ok(pending)
    }

    async fn list_expired(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<FileRecord>, AppError> {
        let files = lock(&self.files);
        let mut expired: Vec<FileRecord> = files
            .values()
            .filter(|f| f.status == FileStatus::Normal && f.expires_at.is_some_and(|at| at <= now))
            .cloned()
            .collect();
        expired.sort_by_key(|f| f.expires_at);
        expired.truncate(limit.max(0) as usize);
        Ok(expired)
    }

    async fn owner_usage(&self, owner_id: Uuid) -> Result<i64, AppError> {
        Ok(lock(&self.files)
            .values()
            .filter(|f| {
                f.owner_id == owner_id
                    && f.original_file_id.is_none()
                    && f.status == FileStatus::Normal
            })
            .map(|f| f.size)
            .sum())
    }

    async fn count_on_channel(&self, channel_id: Uuid) -> Result<i64, AppError> {
        Ok(lock(&self.files)
            .values()
            .filter(|f| f.channel_id == channel_id)
            .count() as i64)
    }
}

#[derive(Clone, Default)]
pub struct MemoryChannelRepository {
    channels: Arc<Mutex<Vec<StorageChannel>>>,
}

impl MemoryChannelRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChannelRepository for MemoryChannelRepository {
    async fn list(&self) -> Result<Vec<StorageChannel>, AppError> {
        Ok(lock(&self.channels).clone())
    }

    async fn get(&self, id: Uuid) -> Result<Option<StorageChannel>, AppError> {
        Ok(lock(&self.channels).iter().find(|c| c.id == id).cloned())
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<StorageChannel>, AppError> {
        Ok(lock(&self.channels).iter().find(|c| c.name == name).cloned())
    }

    async fn get_default(&self) -> Result<Option<StorageChannel>, AppError> {
        Ok(lock(&self.channels)
            .iter()
            .find(|c| c.is_default && c.enabled)
            .cloned())
    }

    async fn insert(&self, channel: &StorageChannel) -> Result<(), AppError> {
        let mut channels = lock(&self.channels);
        if channels
            .iter()
            .any(|c| c.id == channel.id || c.name == channel.name)
        {
            return Err(AppError::InvalidInput(format!(
                "channel '{}' already exists",
                channel.name
            )));
        }
        if channel.is_default && channels.iter().any(|c| c.is_default) {
            return Err(AppError::InvalidInput(
                "a default channel already exists".to_string(),
            ));
        }
        channels.push(channel.clone());
        Ok(())
    }

    async fn update(&self, channel: &StorageChannel) -> Result<bool, AppError> {
        let mut channels = lock(&self.channels);
        match channels.iter_mut().find(|c| c.id == channel.id) {
            Some(stored) => {
                // Default flag and builtin marker are owned by set_default and bootstrap.
                *stored = StorageChannel {
                    is_default: stored.is_default,
                    builtin: stored.builtin,
                    created_at: stored.created_at,
                    ..channel.clone()
                };
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: Uuid) -> Result<bool, AppError> {
        let mut channels = lock(&self.channels);
        let before = channels.len();
        channels.retain(|c| c.id != id || c.builtin || c.is_default);
        Ok(channels.len() < before)
    }

    async fn set_default(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, AppError> {
        let mut channels = lock(&self.channels);
        if !channels.iter().any(|c| c.id == id && c.enabled) {
            return Ok(false);
        }
        for channel in channels.iter_mut() {
            let is_target = channel.id == id;
            if channel.is_default != is_target {
                channel.is_default = is_target;
                channel.updated_at = now;
            }
        }
        Ok(true)
    }
}

/// Dependent rows keyed by kind and file, with optional failure injection so
/// callers can exercise a cascade interrupted part-way.
#[derive(Clone, Default)]
pub struct MemoryDependentRecordsRepository {
    rows: Arc<Mutex<HashMap<(DependentKind, Uuid), u64>>>,
    failing: Arc<Mutex<Option<DependentKind>>>,
}

impl MemoryDependentRecordsRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, kind: DependentKind, file_id: Uuid) {
        *lock(&self.rows).entry((kind, file_id)).or_insert(0) += 1;
    }

    pub fn count(&self, kind: DependentKind, file_id: Uuid) -> u64 {
        lock(&self.rows).get(&(kind, file_id)).copied().unwrap_or(0)
    }

    pub fn total_for_file(&self, file_id: Uuid) -> u64 {
        DependentKind::ALL
            .iter()
            .map(|kind| self.count(*kind, file_id))
            .sum()
    }

    /// Make deletes of `kind` fail until cleared with `None`.
    pub fn set_failure(&self, kind: Option<DependentKind>) {
        *lock(&self.failing) = kind;
    }
}

#[async_trait]
impl DependentRecordsRepository for MemoryDependentRecordsRepository {
    async fn delete_for_file(&self, kind: DependentKind, file_id: Uuid) -> Result<u64, AppError> {
        if *lock(&self.failing) == Some(kind) {
            return Err(AppError::Internal(format!(
                "injected failure clearing {}",
                kind.table()
            )));
        }
        Ok(lock(&self.rows).remove(&(kind, file_id)).unwrap_or(0))
    }
}
