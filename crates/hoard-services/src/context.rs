//! The `Hoard` facade: one object wiring repositories, storage, the worker
//! pool and every service, exposing the operations an outer layer calls.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use hoard_core::hashing::normalize_hash;
use hoard_core::models::file::{
    AccessLevel, FileDescriptor, FileRecord, FileSummary, InstantUploadRequest,
};
use hoard_core::models::task::{Task, TaskKind};
use hoard_core::models::upload::{
    ChunkReceipt, InitUploadRequest, InitUploadResponse, SessionProgress,
};
use hoard_core::{AppError, Clock, Config};
use hoard_db::{
    ChannelRepository, DependentRecordsRepository, FileRepository, MemoryChannelRepository,
    MemoryDependentRecordsRepository, MemoryFileRepository, MemoryUploadSessionRepository,
    PgChannelRepository, PgDependentRecordsRepository, PgFileRepository,
    PgUploadSessionRepository, UploadSessionRepository,
};
use hoard_storage::{ByteStream, ScratchSpace, StorageRouter};
use hoard_worker::{TaskHandlerContext, TaskQueue, TaskQueueConfig};
use sqlx::PgPool;
use uuid::Uuid;

use crate::channels::ChannelRegistry;
use crate::dedup::{DeduplicationIndex, DuplicateTarget};
use crate::ingest::IngestPipeline;
use crate::merge::MergeEngine;
use crate::reaper::{RetentionReaper, StepRunner, SweepReport};
use crate::sessions::UploadSessionManager;

/// The four persistence seams.
#[derive(Clone)]
pub struct HoardRepositories {
    pub sessions: Arc<dyn UploadSessionRepository>,
    pub files: Arc<dyn FileRepository>,
    pub channels: Arc<dyn ChannelRepository>,
    pub dependents: Arc<dyn DependentRecordsRepository>,
}

impl HoardRepositories {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            sessions: Arc::new(PgUploadSessionRepository::new(pool.clone())),
            files: Arc::new(PgFileRepository::new(pool.clone())),
            channels: Arc::new(PgChannelRepository::new(pool.clone())),
            dependents: Arc::new(PgDependentRecordsRepository::new(pool)),
        }
    }

    pub fn memory() -> Self {
        Self {
            sessions: Arc::new(MemoryUploadSessionRepository::new()),
            files: Arc::new(MemoryFileRepository::new()),
            channels: Arc::new(MemoryChannelRepository::new()),
            dependents: Arc::new(MemoryDependentRecordsRepository::new()),
        }
    }
}

/// Bytes of a file streamed through the proxy.
pub struct OpenedFile {
    pub content_type: String,
    pub size: Option<i64>,
    pub stream: ByteStream,
}

pub struct Hoard {
    config: Config,
    clock: Arc<dyn Clock>,
    files: Arc<dyn FileRepository>,
    channels: Arc<ChannelRegistry>,
    router: Arc<StorageRouter>,
    dedup: Arc<DeduplicationIndex>,
    ingest: Arc<IngestPipeline>,
    sessions: Arc<UploadSessionManager>,
    merge: MergeEngine,
    reaper: Arc<RetentionReaper>,
    queue: TaskQueue,
}

impl Hoard {
    /// Build every service and start the worker pool. Creates the built-in
    /// local channel on first start.
    pub async fn new(
        config: Config,
        repos: HoardRepositories,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<Self>, AppError> {
        let scratch = Arc::new(ScratchSpace::new(config.upload().scratch_path.clone()).await?);
        let router = Arc::new(StorageRouter::from_config(config.storage(), clock.clone()));
        let channels = Arc::new(ChannelRegistry::new(
            repos.channels.clone(),
            repos.files.clone(),
            router.clone(),
            clock.clone(),
        ));
        let builtin = channels.ensure_builtin(config.storage()).await?;
        tracing::debug!(channel_id = %builtin.id, "Built-in channel ready");

        let dedup = Arc::new(DeduplicationIndex::new(repos.files.clone(), clock.clone()));
        let ingest = Arc::new(IngestPipeline::new(
            repos.files.clone(),
            dedup.clone(),
            channels.clone(),
            router.clone(),
            clock.clone(),
            config.upload().thumbnail_max_dimension,
        ));

        let hoard = Arc::new_cyclic(|weak: &Weak<Hoard>| {
            let context: Weak<dyn TaskHandlerContext> = weak.clone();
            let queue = TaskQueue::new(TaskQueueConfig::from(config.worker()), context);

            let sessions = Arc::new(UploadSessionManager::new(
                repos.sessions.clone(),
                repos.files.clone(),
                channels.clone(),
                scratch.clone(),
                queue.clone(),
                clock.clone(),
                config.upload().clone(),
            ));
            let merge = MergeEngine::new(
                sessions.clone(),
                ingest.clone(),
                repos.files.clone(),
                clock.clone(),
            );
            let steps = StepRunner::new(
                repos.files.clone(),
                repos.dependents.clone(),
                channels.clone(),
                router.clone(),
            );
            let reaper = Arc::new(RetentionReaper::new(
                repos.files.clone(),
                repos.sessions.clone(),
                scratch.clone(),
                steps,
                queue.clone(),
                clock.clone(),
                config.retention().clone(),
                chrono::Duration::seconds(config.upload().session_ttl_secs),
            ));

            Hoard {
                config: config.clone(),
                clock: clock.clone(),
                files: repos.files.clone(),
                channels,
                router,
                dedup,
                ingest,
                sessions,
                merge,
                reaper,
                queue,
            }
        });

        tracing::info!(
            scratch_path = %hoard.config.upload().scratch_path.display(),
            max_workers = hoard.queue.config().max_workers,
            "Hoard initialized"
        );
        Ok(hoard)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Storage channel administration.
    pub fn channels(&self) -> &ChannelRegistry {
        &self.channels
    }

    pub fn reaper(&self) -> &Arc<RetentionReaper> {
        &self.reaper
    }

    pub async fn init_upload(
        &self,
        request: InitUploadRequest,
    ) -> Result<InitUploadResponse, AppError> {
        self.sessions.init(request).await
    }

    pub async fn put_chunk(
        &self,
        session_id: Uuid,
        chunk_index: i32,
        content_hash: &str,
        data: Bytes,
    ) -> Result<ChunkReceipt, AppError> {
        self.sessions
            .accept_chunk(session_id, chunk_index, content_hash, data)
            .await
    }

    pub async fn complete_upload(&self, session_id: Uuid) -> Result<FileDescriptor, AppError> {
        self.merge.complete(session_id).await
    }

    pub async fn upload_status(&self, session_id: Uuid) -> Result<SessionProgress, AppError> {
        self.sessions.status(session_id).await
    }

    pub async fn missing_chunks(&self, session_id: Uuid) -> Result<Vec<i32>, AppError> {
        self.sessions.missing_chunks(session_id).await
    }

    pub async fn cancel_upload(&self, session_id: Uuid) -> Result<SessionProgress, AppError> {
        self.sessions.cancel(session_id).await
    }

    /// `None` when the owner holds no content with this hash and size.
    pub async fn precheck_instant_upload(
        &self,
        owner_id: Uuid,
        content_hash: &str,
        file_size: u64,
    ) -> Result<Option<FileSummary>, AppError> {
        self.dedup.precheck(owner_id, content_hash, file_size).await
    }

    /// Create a record over bytes the owner already stores. No bytes move.
    #[tracing::instrument(skip(self, request), fields(owner_id = %request.owner_id))]
    pub async fn instant_upload(
        &self,
        request: InstantUploadRequest,
    ) -> Result<FileDescriptor, AppError> {
        let hash = normalize_hash(&request.content_hash)?;
        let target = DuplicateTarget {
            owner_id: request.owner_id,
            file_name: request.file_name,
            folder_id: request.folder_id,
            access_level: request.access_level,
        };
        let record = self
            .dedup
            .link_to_live(&hash, request.file_size, target)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("stored content with hash {}", hash)))?;
        Ok(self.ingest.describe(&record).await)
    }

    async fn owned_file(&self, owner_id: Uuid, file_id: Uuid) -> Result<FileRecord, AppError> {
        self.files
            .get(file_id)
            .await?
            .filter(|f| f.owner_id == owner_id && f.is_servable())
            .ok_or_else(|| AppError::NotFound(format!("file {}", file_id)))
    }

    pub async fn describe_file(
        &self,
        owner_id: Uuid,
        file_id: Uuid,
    ) -> Result<FileDescriptor, AppError> {
        let record = self.owned_file(owner_id, file_id).await?;
        Ok(self.ingest.describe(&record).await)
    }

    /// Stream the original through the proxy.
    pub async fn open_file(&self, owner_id: Uuid, file_id: Uuid) -> Result<OpenedFile, AppError> {
        let record = self.owned_file(owner_id, file_id).await?;
        let channel = self.channels.raw(record.channel_id).await?;
        let stream = self.router.open(&channel, &record.object_path).await?;
        Ok(OpenedFile {
            content_type: record.content_type,
            size: Some(record.size),
            stream,
        })
    }

    pub async fn open_thumbnail(
        &self,
        owner_id: Uuid,
        file_id: Uuid,
    ) -> Result<OpenedFile, AppError> {
        let record = self.owned_file(owner_id, file_id).await?;
        let key = record
            .thumbnail_path
            .as_deref()
            .ok_or_else(|| AppError::NotFound(format!("thumbnail of file {}", file_id)))?;
        let channel = self.channels.raw(record.channel_id).await?;
        let stream = self.router.open(&channel, key).await?;
        Ok(OpenedFile {
            content_type: "image/png".to_string(),
            size: None,
            stream,
        })
    }

    /// Only future URL resolution changes; stored bytes are untouched.
    #[tracing::instrument(skip(self))]
    pub async fn update_access_level(
        &self,
        owner_id: Uuid,
        file_id: Uuid,
        access_level: AccessLevel,
    ) -> Result<FileDescriptor, AppError> {
        self.owned_file(owner_id, file_id).await?;
        let updated = self
            .files
            .update_access_level(file_id, access_level, self.clock.now())
            .await?;
        if !updated {
            return Err(AppError::NotFound(format!("file {}", file_id)));
        }
        self.describe_file(owner_id, file_id).await
    }

    /// Put a file into (or take it out of) a time-limited retention class.
    /// The sweep soft-deletes it once `expires_at` passes.
    pub async fn set_file_expiry(
        &self,
        owner_id: Uuid,
        file_id: Uuid,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), AppError> {
        self.owned_file(owner_id, file_id).await?;
        if !self
            .files
            .update_expiry(file_id, expires_at, self.clock.now())
            .await?
        {
            return Err(AppError::NotFound(format!("file {}", file_id)));
        }
        Ok(())
    }

    pub async fn delete_file(&self, owner_id: Uuid, file_id: Uuid) -> Result<(), AppError> {
        self.reaper.soft_delete(owner_id, file_id).await
    }

    pub async fn sweep(&self) -> Result<SweepReport, AppError> {
        self.reaper.sweep().await
    }

    /// Run the periodic sweep until the process exits.
    pub fn start_reaper(&self) -> tokio::task::JoinHandle<()> {
        self.reaper.clone().start()
    }

    /// Stop accepting background tasks.
    pub async fn shutdown(&self) {
        self.queue.shutdown().await;
    }
}

#[async_trait]
impl TaskHandlerContext for Hoard {
    async fn dispatch_task(self: Arc<Self>, task: &Task) -> anyhow::Result<()> {
        match task.kind {
            TaskKind::CascadeDelete { file_id } => {
                self.reaper.cascade(file_id).await?;
            }
            TaskKind::PurgeScratch { session_id } => {
                self.reaper.purge_session_scratch(session_id).await?;
            }
        }
        Ok(())
    }
}
