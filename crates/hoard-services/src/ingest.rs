//! Ingestion: turn a verified staging file into a durable record.
//!
//! Dedup short-circuits before any bytes move. Otherwise the bytes (and a
//! thumbnail for images) are placed on the destination channel and the record
//! is inserted; a failed insert removes what was placed so no bytes are
//! orphaned and no partial record exists.

use std::path::Path;
use std::sync::Arc;

use hoard_core::models::channel::StorageChannel;
use hoard_core::models::file::{AccessLevel, FileDescriptor, FileRecord, FileStatus};
use hoard_core::{AppError, Clock};
use hoard_db::FileRepository;
use hoard_storage::keys::{extension_for, original_key, thumbnail_key};
use hoard_storage::router::PlacementRequest;
use hoard_storage::{PlacedObject, StorageRouter};
use uuid::Uuid;

use crate::channels::ChannelRegistry;
use crate::dedup::{DeduplicationIndex, DuplicateTarget};
use crate::thumbnail;

/// Everything known about merged content before it becomes a record.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub owner_id: Uuid,
    pub file_name: String,
    pub content_type: String,
    /// Verified whole-file digest.
    pub content_hash: String,
    pub size: u64,
    pub folder_id: Option<Uuid>,
    pub access_level: AccessLevel,
    pub channel_id: Option<Uuid>,
}

impl IngestRequest {
    fn duplicate_target(&self) -> DuplicateTarget {
        DuplicateTarget {
            owner_id: self.owner_id,
            file_name: self.file_name.clone(),
            folder_id: self.folder_id,
            access_level: self.access_level,
        }
    }
}

pub struct IngestPipeline {
    files: Arc<dyn FileRepository>,
    dedup: Arc<DeduplicationIndex>,
    channels: Arc<ChannelRegistry>,
    router: Arc<StorageRouter>,
    clock: Arc<dyn Clock>,
    thumbnail_max_dimension: u32,
}

impl IngestPipeline {
    pub fn new(
        files: Arc<dyn FileRepository>,
        dedup: Arc<DeduplicationIndex>,
        channels: Arc<ChannelRegistry>,
        router: Arc<StorageRouter>,
        clock: Arc<dyn Clock>,
        thumbnail_max_dimension: u32,
    ) -> Self {
        Self {
            files,
            dedup,
            channels,
            router,
            clock,
            thumbnail_max_dimension,
        }
    }

    #[tracing::instrument(skip(self, request, staging), fields(owner_id = %request.owner_id, content_hash = %request.content_hash))]
    pub async fn ingest(
        &self,
        request: IngestRequest,
        staging: &Path,
    ) -> Result<FileRecord, AppError> {
        if let Some(linked) = self
            .dedup
            .link_to_live(
                &request.content_hash,
                request.size,
                request.duplicate_target(),
            )
            .await?
        {
            tracing::info!(
                original_file_id = ?linked.original_file_id,
                "Merged content already stored; linked instead of placing"
            );
            return Ok(linked);
        }

        let channel = self.channels.destination(request.channel_id).await?;
        let file_id = Uuid::new_v4();
        let now = self.clock.now();
        let extension = extension_for(&request.file_name, &request.content_type);
        let object_path = original_key(request.owner_id, file_id, &extension, now);

        let analysis = thumbnail::analyze_file(
            staging,
            &request.content_type,
            self.thumbnail_max_dimension,
        )
        .await;
        let thumbnail = analysis.as_ref().and_then(|a| {
            a.thumbnail
                .clone()
                .map(|png| (thumbnail_key(request.owner_id, file_id, now), png))
        });

        let placed = self
            .router
            .place(
                &channel,
                PlacementRequest {
                    object_path,
                    content_type: request.content_type.clone(),
                    source: staging.to_path_buf(),
                    thumbnail,
                },
            )
            .await?;

        if placed.size != request.size {
            self.discard(&channel, &placed).await;
            return Err(AppError::Storage(format!(
                "placed {} bytes, expected {}",
                placed.size, request.size
            )));
        }

        let display_name = match self
            .dedup
            .unique_display_name(request.owner_id, request.folder_id, &request.file_name)
            .await
        {
            Ok(name) => name,
            Err(e) => {
                self.discard(&channel, &placed).await;
                return Err(e);
            }
        };

        let info = analysis.map(|a| a.info);
        let record = FileRecord {
            id: file_id,
            owner_id: request.owner_id,
            display_name,
            original_name: request.file_name.clone(),
            size: request.size as i64,
            width: info.as_ref().map(|i| i.width as i32),
            height: info.as_ref().map(|i| i.height as i32),
            format: info.map(|i| i.format),
            content_type: request.content_type.clone(),
            access_level: request.access_level,
            channel_id: placed.channel_id,
            object_path: placed.object_path.clone(),
            thumbnail_path: placed.thumbnail_path.clone(),
            content_hash: request.content_hash.clone(),
            original_file_id: None,
            folder_id: request.folder_id,
            status: FileStatus::Normal,
            expires_at: None,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };

        match self.files.insert(&record).await {
            Ok(()) => {
                tracing::info!(
                    file_id = %record.id,
                    channel_id = %record.channel_id,
                    size_bytes = record.size,
                    "File record created"
                );
                Ok(record)
            }
            Err(AppError::DuplicateContent { .. }) => {
                // Lost the race against an identical upload: drop our copy and
                // point at the winner.
                self.discard(&channel, &placed).await;
                let linked = self
                    .dedup
                    .link_to_live(
                        &request.content_hash,
                        request.size,
                        request.duplicate_target(),
                    )
                    .await?
                    .ok_or_else(|| {
                        AppError::Internal(
                            "canonical record vanished after duplicate conflict".to_string(),
                        )
                    })?;
                tracing::info!(
                    original_file_id = ?linked.original_file_id,
                    "Concurrent upload won the canonical slot; linked"
                );
                Ok(linked)
            }
            Err(e) => {
                self.discard(&channel, &placed).await;
                Err(e)
            }
        }
    }

    async fn discard(&self, channel: &StorageChannel, placed: &PlacedObject) {
        self.router.delete(channel, &placed.object_path).await;
        if let Some(ref thumb) = placed.thumbnail_path {
            self.router.delete(channel, thumb).await;
        }
    }

    /// Public identity of a record. URLs come from the record's channel; an
    /// unknown channel degrades to proxy URLs.
    pub async fn describe(&self, file: &FileRecord) -> FileDescriptor {
        let urls = match self.channels.raw(file.channel_id).await {
            Ok(channel) => self.router.resolve(file, &channel).await,
            Err(e) => {
                tracing::warn!(file_id = %file.id, channel_id = %file.channel_id, error = %e, "Channel lookup failed; using proxy URLs");
                self.router.proxy_urls(file)
            }
        };
        FileDescriptor::new(file, urls)
    }
}
