use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use hoard_core::models::upload::{ChunkMark, ChunkStatus, UploadChunk, UploadSession};
use hoard_core::AppError;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::rows::{chunk_from_row, session_from_row, CHUNK_COLUMNS, SESSION_COLUMNS};
use super::transaction::TransactionGuard;
use crate::traits::UploadSessionRepository;

/// Repository for chunked upload sessions
#[derive(Clone)]
pub struct PgUploadSessionRepository {
    pool: PgPool,
}

impl PgUploadSessionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UploadSessionRepository for PgUploadSessionRepository {
    #[tracing::instrument(skip(self, session, chunks), fields(db.table = "upload_sessions", session_id = %session.id))]
    async fn create_session(
        &self,
        session: &UploadSession,
        chunks: &[UploadChunk],
    ) -> Result<(), AppError> {
        let mut tx = TransactionGuard::begin(&self.pool).await?;

        sqlx::query(
            r#"
            INSERT INTO upload_sessions (
                id, owner_id, file_name, file_size, content_type, content_hash,
                chunk_size, total_chunks, uploaded_chunks, status, folder_id,
                access_level, channel_id, expires_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(session.id)
        .bind(session.owner_id)
        .bind(&session.file_name)
        .bind(session.file_size)
        .bind(&session.content_type)
        .bind(&session.content_hash)
        .bind(session.chunk_size)
        .bind(session.total_chunks)
        .bind(session.uploaded_chunks)
        .bind(session.status.to_string())
        .bind(session.folder_id)
        .bind(session.access_level.to_string())
        .bind(session.channel_id)
        .bind(session.expires_at)
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&mut **tx)
        .await?;

        let indices: Vec<i32> = chunks.iter().map(|c| c.chunk_index).collect();
        let sizes: Vec<i64> = chunks.iter().map(|c| c.size).collect();

        sqlx::query(
            r#"
            INSERT INTO upload_chunks (session_id, chunk_index, size, status)
            SELECT $1, idx, sz, 'pending'
            FROM UNNEST($2::INTEGER[], $3::BIGINT[]) AS t(idx, sz)
            "#,
        )
        .bind(session.id)
        .bind(&indices)
        .bind(&sizes)
        .execute(&mut **tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(db.table = "upload_sessions"))]
    async fn get_session(&self, id: Uuid) -> Result<Option<UploadSession>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM upload_sessions WHERE id = $1",
            SESSION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(session_from_row).transpose()?)
    }

    #[tracing::instrument(skip(self), fields(db.table = "upload_chunks"))]
    async fn get_chunk(
        &self,
        session_id: Uuid,
        chunk_index: i32,
    ) -> Result<Option<UploadChunk>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM upload_chunks WHERE session_id = $1 AND chunk_index = $2",
            CHUNK_COLUMNS
        ))
        .bind(session_id)
        .bind(chunk_index)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(chunk_from_row).transpose()?)
    }

    #[tracing::instrument(skip(self), fields(db.table = "upload_chunks"))]
    async fn list_chunks(&self, session_id: Uuid) -> Result<Vec<UploadChunk>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM upload_chunks WHERE session_id = $1 ORDER BY chunk_index",
            CHUNK_COLUMNS
        ))
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(chunk_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    #[tracing::instrument(skip(self, content_hash, blob_path), fields(db.table = "upload_chunks"))]
    async fn mark_chunk_uploaded(
        &self,
        session_id: Uuid,
        chunk_index: i32,
        content_hash: &str,
        blob_path: &str,
        now: DateTime<Utc>,
    ) -> Result<ChunkMark, AppError> {
        // Chunk flip and session counter move together or not at all.
        let marked = sqlx::query(
            r#"
            WITH marked AS (
                UPDATE upload_chunks
                SET status = 'uploaded', content_hash = $3, blob_path = $4, uploaded_at = $5
                WHERE session_id = $1 AND chunk_index = $2 AND status = 'pending'
                RETURNING session_id
            )
            UPDATE upload_sessions
            SET uploaded_chunks = uploaded_chunks + 1,
                status = CASE WHEN status = 'pending' THEN 'uploading' ELSE status END,
                updated_at = $5
            WHERE id IN (SELECT session_id FROM marked)
            RETURNING id
            "#,
        )
        .bind(session_id)
        .bind(chunk_index)
        .bind(content_hash)
        .bind(blob_path)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        if marked.is_some() {
            return Ok(ChunkMark::Marked);
        }

        match self.get_chunk(session_id, chunk_index).await? {
            Some(chunk) if chunk.status == ChunkStatus::Uploaded => Ok(ChunkMark::AlreadyUploaded {
                content_hash: chunk.content_hash,
            }),
            Some(_) => Err(AppError::Internal(format!(
                "chunk {} of session {} stayed pending after conditional update",
                chunk_index, session_id
            ))),
            None => Err(AppError::SessionNotFound(session_id)),
        }
    }

    #[tracing::instrument(skip(self), fields(db.table = "upload_sessions"))]
    async fn claim_merge(
        &self,
        session_id: Uuid,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Option<UploadSession>, AppError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE upload_sessions
            SET merge_claimed_at = $2, updated_at = $2
            WHERE id = $1
              AND status IN ('pending', 'uploading')
              AND expires_at > $2
              AND (merge_claimed_at IS NULL OR merge_claimed_at < $3)
            RETURNING {}
            "#,
            SESSION_COLUMNS
        ))
        .bind(session_id)
        .bind(now)
        .bind(now - lease)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(session_from_row).transpose()?)
    }

    #[tracing::instrument(skip(self), fields(db.table = "upload_sessions"))]
    async fn release_merge(&self, session_id: Uuid) -> Result<(), AppError> {
        sqlx::query("UPDATE upload_sessions SET merge_claimed_at = NULL WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(db.table = "upload_sessions"))]
    async fn mark_completed(
        &self,
        session_id: Uuid,
        file_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE upload_sessions
            SET status = 'completed', file_id = $2, merge_claimed_at = NULL, updated_at = $3
            WHERE id = $1 AND status = 'uploading'
            "#,
        )
        .bind(session_id)
        .bind(file_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(skip(self), fields(db.table = "upload_sessions"))]
    async fn mark_failed(
        &self,
        session_id: Uuid,
        error_message: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE upload_sessions
            SET status = 'failed', error_message = $2, merge_claimed_at = NULL, updated_at = $3
            WHERE id = $1 AND status IN ('pending', 'uploading')
            "#,
        )
        .bind(session_id)
        .bind(error_message)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(skip(self), fields(db.table = "upload_sessions"))]
    async fn fail_expired(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Uuid>, AppError> {
        let rows = sqlx::query(
            r#"
            UPDATE upload_sessions
            SET status = 'failed', error_message = 'session expired', merge_claimed_at = NULL,
                updated_at = $1
            WHERE id IN (
                SELECT id FROM upload_sessions
                WHERE status IN ('pending', 'uploading') AND expires_at <= $1
                ORDER BY expires_at
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| row.try_get::<Uuid, _>("id"))
            .collect::<Result<Vec<_>, _>>()?)
    }

    #[tracing::instrument(skip(self), fields(db.table = "upload_sessions"))]
    async fn delete_finished_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            DELETE FROM upload_sessions
            WHERE id IN (
                SELECT id FROM upload_sessions
                WHERE status IN ('completed', 'failed') AND updated_at < $1
                ORDER BY updated_at
                LIMIT $2
            )
            "#,
        )
        .bind(cutoff)
        .bind(limit)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
