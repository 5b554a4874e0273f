use async_trait::async_trait;
use hoard_core::AppError;
use sqlx::PgPool;
use uuid::Uuid;

use crate::traits::{DependentKind, DependentRecordsRepository};

/// Clears the per-record tables other subsystems attach to a file.
#[derive(Clone)]
pub struct PgDependentRecordsRepository {
    pool: PgPool,
}

impl PgDependentRecordsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DependentRecordsRepository for PgDependentRecordsRepository {
    #[tracing::instrument(skip(self), fields(db.table = kind.table()))]
    async fn delete_for_file(&self, kind: DependentKind, file_id: Uuid) -> Result<u64, AppError> {
        // Table names come from a closed enum, never from input.
        let result = sqlx::query(&format!("DELETE FROM {} WHERE file_id = $1", kind.table()))
            .bind(file_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
