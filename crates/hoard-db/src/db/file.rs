use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hoard_core::models::file::{AccessLevel, FileRecord};
use hoard_core::AppError;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::rows::{file_from_row, FILE_COLUMNS};
use crate::traits::FileRepository;

/// Repository for durable file records
#[derive(Clone)]
pub struct PgFileRepository {
    pool: PgPool,
}

impl PgFileRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_many(
        &self,
        sql: &str,
        at: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<FileRecord>, AppError> {
        let rows = sqlx::query(sql)
            .bind(at)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(file_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }
}

#[async_trait]
impl FileRepository for PgFileRepository {
    #[tracing::instrument(skip(self, file), fields(db.table = "files", file_id = %file.id))]
    async fn insert(&self, file: &FileRecord) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO files (
                id, owner_id, display_name, original_name, size, width, height, format,
                content_type, access_level, channel_id, object_path, thumbnail_path,
                content_hash, original_file_id, folder_id, status, expires_at, deleted_at,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    $17, $18, $19, $20, $21)
            "#,
        )
        .bind(file.id)
        .bind(file.owner_id)
        .bind(&file.display_name)
        .bind(&file.original_name)
        .bind(file.size)
        .bind(file.width)
        .bind(file.height)
        .bind(&file.format)
        .bind(&file.content_type)
        .bind(file.access_level.to_string())
        .bind(file.channel_id)
        .bind(&file.object_path)
        .bind(&file.thumbnail_path)
        .bind(&file.content_hash)
        .bind(file.original_file_id)
        .bind(file.folder_id)
        .bind(file.status.to_string())
        .bind(file.expires_at)
        .bind(file.deleted_at)
        .bind(file.created_at)
        .bind(file.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                tracing::info!(
                    owner_id = %file.owner_id,
                    content_hash = %file.content_hash,
                    constraint = ?db_err.constraint(),
                    "Canonical record already exists for content"
                );
                Err(AppError::DuplicateContent {
                    owner_id: file.owner_id,
                    content_hash: file.content_hash.clone(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    #[tracing::instrument(skip(self, file), fields(db.table = "files", file_id = %file.id, original_file_id = ?file.original_file_id))]
    async fn insert_duplicate(&self, file: &FileRecord) -> Result<bool, AppError> {
        let Some(original_id) = file.original_file_id else {
            return Err(AppError::InvalidInput(format!(
                "file {} has no original to share",
                file.id
            )));
        };

        // FOR SHARE blocks a concurrent soft delete of the original until this
        // row is committed, so the cascade's reference count sees it.
        let result = sqlx::query(
            r#"
            INSERT INTO files (
                id, owner_id, display_name, original_name, size, width, height, format,
                content_type, access_level, channel_id, object_path, thumbnail_path,
                content_hash, original_file_id, folder_id, status, expires_at, deleted_at,
                created_at, updated_at
            )
            SELECT $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                   $17, $18, $19, $20, $21
            WHERE EXISTS (
                SELECT 1 FROM files
                WHERE id = $15 AND status = 'normal'
                FOR SHARE
            )
            "#,
        )
        .bind(file.id)
        .bind(file.owner_id)
        .bind(&file.display_name)
        .bind(&file.original_name)
        .bind(file.size)
        .bind(file.width)
        .bind(file.height)
        .bind(&file.format)
        .bind(&file.content_type)
        .bind(file.access_level.to_string())
        .bind(file.channel_id)
        .bind(&file.object_path)
        .bind(&file.thumbnail_path)
        .bind(&file.content_hash)
        .bind(original_id)
        .bind(file.folder_id)
        .bind(file.status.to_string())
        .bind(file.expires_at)
        .bind(file.deleted_at)
        .bind(file.created_at)
        .bind(file.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            tracing::info!(%original_id, "Original no longer live; duplicate not inserted");
        }
        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(skip(self), fields(db.table = "files"))]
    async fn get(&self, id: Uuid) -> Result<Option<FileRecord>, AppError> {
        let row = sqlx::query(&format!("SELECT {} FROM files WHERE id = $1", FILE_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(file_from_row).transpose()?)
    }

    #[tracing::instrument(skip(self), fields(db.table = "files"))]
    async fn find_by_content_hash(
        &self,
        owner_id: Uuid,
        content_hash: &str,
    ) -> Result<Option<FileRecord>, AppError> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {} FROM files
            WHERE owner_id = $1 AND content_hash = $2 AND status = 'normal'
            ORDER BY (original_file_id IS NULL) DESC, created_at ASC
            LIMIT 1
            "#,
            FILE_COLUMNS
        ))
        .bind(owner_id)
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(file_from_row).transpose()?)
    }

    #[tracing::instrument(skip(self), fields(db.table = "files"))]
    async fn name_exists(
        &self,
        owner_id: Uuid,
        folder_id: Option<Uuid>,
        display_name: &str,
    ) -> Result<bool, AppError> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM files
                WHERE owner_id = $1 AND folder_id IS NOT DISTINCT FROM $2
                  AND display_name = $3 AND status = 'normal'
            ) AS found
            "#,
        )
        .bind(owner_id)
        .bind(folder_id)
        .bind(display_name)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("found")?)
    }

    #[tracing::instrument(skip(self), fields(db.table = "files"))]
    async fn mark_pending_deletion(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE files
            SET status = 'pending_deletion', deleted_at = $2, updated_at = $2
            WHERE id = $1 AND status = 'normal'
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(skip(self), fields(db.table = "files"))]
    async fn update_access_level(
        &self,
        id: Uuid,
        access_level: AccessLevel,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE files SET access_level = $2, updated_at = $3 WHERE id = $1 AND status = 'normal'",
        )
        .bind(id)
        .bind(access_level.to_string())
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(skip(self), fields(db.table = "files"))]
    async fn update_expiry(
        &self,
        id: Uuid,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE files SET expires_at = $2, updated_at = $3 WHERE id = $1 AND status = 'normal'",
        )
        .bind(id)
        .bind(expires_at)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(skip(self, file), fields(db.table = "files", file_id = %file.id))]
    async fn reference_count(&self, file: &FileRecord) -> Result<i64, AppError> {
        // Duplicates share the location, so one pass counts each dependent row once.
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS refs FROM files
            WHERE id <> $1
              AND (
                (owner_id = $2 AND content_hash = $3 AND channel_id = $4 AND object_path = $5)
                OR original_file_id = $1
              )
            "#,
        )
        .bind(file.id)
        .bind(file.owner_id)
        .bind(&file.content_hash)
        .bind(file.channel_id)
        .bind(&file.object_path)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("refs")?)
    }

    #[tracing::instrument(skip(self), fields(db.table = "files"))]
    async fn delete(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM files WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(skip(self), fields(db.table = "files"))]
    async fn list_pending_deletion(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<FileRecord>, AppError> {
        self.fetch_many(
            &format!(
                r#"
                SELECT {} FROM files
                WHERE status = 'pending_deletion' AND deleted_at <= $1
                ORDER BY deleted_at
                LIMIT $2
                "#,
                FILE_COLUMNS
            ),
            cutoff,
            limit,
        )
        .await
    }

    #[tracing::instrument(skip(self), fields(db.table = "files"))]
    async fn list_expired(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<FileRecord>, AppError> {
        self.fetch_many(
            &format!(
                r#"
                SELECT {} FROM files
                WHERE status = 'normal' AND expires_at IS NOT NULL AND expires_at <= $1
                ORDER BY expires_at
                LIMIT $2
                "#,
                FILE_COLUMNS
            ),
            now,
            limit,
        )
        .await
    }

    #[tracing::instrument(skip(self), fields(db.table = "files"))]
    async fn owner_usage(&self, owner_id: Uuid) -> Result<i64, AppError> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(size), 0)::BIGINT AS used FROM files
            WHERE owner_id = $1 AND original_file_id IS NULL AND status = 'normal'
            "#,
        )
        .bind(owner_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("used")?)
    }

    #[tracing::instrument(skip(self), fields(db.table = "files"))]
    async fn count_on_channel(&self, channel_id: Uuid) -> Result<i64, AppError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM files WHERE channel_id = $1")
            .bind(channel_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.try_get("n")?)
    }
}
