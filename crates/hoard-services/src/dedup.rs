//! Per-owner content index used by instant upload and post-merge dedup.
//!
//! Lookups are check-then-act. The partial unique index on live canonical
//! records turns two racing first uploads into a `DuplicateContent` conflict,
//! which the ingest pipeline resolves by linking to the winner. A link lands
//! only while the record it points at is still `normal`; when that record was
//! deleted after the lookup, the lookup is repeated.

use std::sync::Arc;

use hoard_core::hashing::normalize_hash;
use hoard_core::models::file::{AccessLevel, FileRecord, FileStatus, FileSummary};
use hoard_core::{AppError, Clock};
use hoard_db::FileRepository;
use uuid::Uuid;

/// Attempts at finding a free display name before falling back to a random suffix.
const MAX_NAME_ATTEMPTS: u32 = 16;

/// Lookups retried when the record found is deleted before the link lands.
const MAX_LINK_ATTEMPTS: u32 = 4;

/// Placement of a new logical record that shares existing bytes.
#[derive(Debug, Clone)]
pub struct DuplicateTarget {
    pub owner_id: Uuid,
    pub file_name: String,
    pub folder_id: Option<Uuid>,
    pub access_level: AccessLevel,
}

pub struct DeduplicationIndex {
    files: Arc<dyn FileRepository>,
    clock: Arc<dyn Clock>,
}

impl DeduplicationIndex {
    pub fn new(files: Arc<dyn FileRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { files, clock }
    }

    /// Live record holding `content_hash` for this owner. Absence is not an error.
    #[tracing::instrument(skip(self))]
    pub async fn find_by_content_hash(
        &self,
        owner_id: Uuid,
        content_hash: &str,
    ) -> Result<Option<FileRecord>, AppError> {
        let hash = normalize_hash(content_hash)?;
        self.files.find_by_content_hash(owner_id, &hash).await
    }

    /// Instant-upload precheck. A match must also agree on size.
    pub async fn precheck(
        &self,
        owner_id: Uuid,
        content_hash: &str,
        file_size: u64,
    ) -> Result<Option<FileSummary>, AppError> {
        Ok(self
            .find_by_content_hash(owner_id, content_hash)
            .await?
            .filter(|found| found.size as u64 == file_size)
            .map(|found| found.summary()))
    }

    /// `file_name` if unused in the folder, otherwise the name with a
    /// timestamp suffix before its extension (`photo_20240101093000.png`).
    pub async fn unique_display_name(
        &self,
        owner_id: Uuid,
        folder_id: Option<Uuid>,
        file_name: &str,
    ) -> Result<String, AppError> {
        if !self.files.name_exists(owner_id, folder_id, file_name).await? {
            return Ok(file_name.to_string());
        }

        let (stem, extension) = split_extension(file_name);
        let stamp = self.clock.now().format("%Y%m%d%H%M%S").to_string();
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let candidate = match attempt {
                0 => join_name(&format!("{}_{}", stem, stamp), extension),
                n => join_name(&format!("{}_{}_{}", stem, stamp, n), extension),
            };
            if !self.files.name_exists(owner_id, folder_id, &candidate).await? {
                return Ok(candidate);
            }
        }
        Ok(join_name(
            &format!("{}_{}_{}", stem, stamp, Uuid::new_v4().simple()),
            extension,
        ))
    }

    /// Link `target` to whichever live record of this owner holds
    /// `content_hash` with `size` bytes. `None` once no such record remains.
    pub async fn link_to_live(
        &self,
        content_hash: &str,
        size: u64,
        target: DuplicateTarget,
    ) -> Result<Option<FileRecord>, AppError> {
        for _ in 0..MAX_LINK_ATTEMPTS {
            let Some(existing) = self
                .find_by_content_hash(target.owner_id, content_hash)
                .await?
                .filter(|found| found.size as u64 == size)
            else {
                return Ok(None);
            };
            if let Some(record) = self.link_duplicate(&existing, target.clone()).await? {
                return Ok(Some(record));
            }
        }
        tracing::warn!(
            owner_id = %target.owner_id,
            content_hash,
            "Matching records kept disappearing while linking"
        );
        Ok(None)
    }

    /// Create a record for `target` that points at `existing`'s bytes. The new
    /// record gets its own id, name, folder and access level; storage location
    /// and media facts are copied.
    ///
    /// Returns `None` when `existing` was deleted since it was looked up; its
    /// bytes may already be gone.
    #[tracing::instrument(skip(self, existing, target), fields(original_file_id = %existing.id, owner_id = %target.owner_id))]
    pub async fn link_duplicate(
        &self,
        existing: &FileRecord,
        target: DuplicateTarget,
    ) -> Result<Option<FileRecord>, AppError> {
        if existing.owner_id != target.owner_id {
            return Err(AppError::Internal(
                "refusing to link content across owners".to_string(),
            ));
        }

        let display_name = self
            .unique_display_name(target.owner_id, target.folder_id, &target.file_name)
            .await?;
        let now = self.clock.now();
        let record = FileRecord {
            id: Uuid::new_v4(),
            owner_id: target.owner_id,
            display_name,
            original_name: target.file_name,
            size: existing.size,
            width: existing.width,
            height: existing.height,
            format: existing.format.clone(),
            content_type: existing.content_type.clone(),
            access_level: target.access_level,
            channel_id: existing.channel_id,
            object_path: existing.object_path.clone(),
            thumbnail_path: existing.thumbnail_path.clone(),
            content_hash: existing.content_hash.clone(),
            original_file_id: Some(existing.id),
            folder_id: target.folder_id,
            status: FileStatus::Normal,
            expires_at: None,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };
        if !self.files.insert_duplicate(&record).await? {
            tracing::info!("Original deleted before the link landed");
            return Ok(None);
        }

        tracing::info!(
            file_id = %record.id,
            object_path = %record.object_path,
            "Linked duplicate record to existing content"
        );
        Ok(Some(record))
    }
}

fn split_extension(file_name: &str) -> (&str, Option<&str>) {
    match file_name.rfind('.') {
        Some(pos) if pos > 0 && pos < file_name.len() - 1 => {
            (&file_name[..pos], Some(&file_name[pos + 1..]))
        }
        _ => (file_name, None),
    }
}

fn join_name(stem: &str, extension: Option<&str>) -> String {
    match extension {
        Some(ext) => format!("{}.{}", stem, ext),
        None => stem.to_string(),
    }
}
