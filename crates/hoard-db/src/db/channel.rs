use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hoard_core::models::channel::{ChannelConfigItem, StorageChannel};
use hoard_core::AppError;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::rows::{channel_from_row, config_item_from_row, CHANNEL_COLUMNS};
use super::transaction::TransactionGuard;
use crate::traits::ChannelRepository;

/// Repository for storage channels and their configuration items
#[derive(Clone)]
pub struct PgChannelRepository {
    pool: PgPool,
}

impl PgChannelRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_config(
        &self,
        channel_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<ChannelConfigItem>>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT channel_id, key, value, secret FROM storage_channel_config
            WHERE channel_id = ANY($1)
            ORDER BY channel_id, position, key
            "#,
        )
        .bind(channel_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_channel: HashMap<Uuid, Vec<ChannelConfigItem>> = HashMap::new();
        for row in &rows {
            let channel_id: Uuid = row.try_get("channel_id")?;
            by_channel
                .entry(channel_id)
                .or_default()
                .push(config_item_from_row(row)?);
        }
        Ok(by_channel)
    }

    async fn fetch_with_config(
        &self,
        sql: &str,
        bind: Option<ChannelKey<'_>>,
    ) -> Result<Vec<StorageChannel>, AppError> {
        let mut query = sqlx::query(sql);
        query = match bind {
            Some(ChannelKey::Id(id)) => query.bind(id),
            Some(ChannelKey::Name(name)) => query.bind(name),
            None => query,
        };
        let rows = query.fetch_all(&self.pool).await?;

        let mut channels = rows
            .iter()
            .map(channel_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        let ids: Vec<Uuid> = channels.iter().map(|c| c.id).collect();
        let mut config = self.load_config(&ids).await?;
        for channel in &mut channels {
            channel.config = config.remove(&channel.id).unwrap_or_default();
        }
        Ok(channels)
    }
}

enum ChannelKey<'a> {
    Id(Uuid),
    Name(&'a str),
}

async fn write_config(
    tx: &mut TransactionGuard<'_>,
    channel_id: Uuid,
    items: &[ChannelConfigItem],
) -> Result<(), AppError> {
    sqlx::query("DELETE FROM storage_channel_config WHERE channel_id = $1")
        .bind(channel_id)
        .execute(&mut ***tx)
        .await?;

    for (position, item) in items.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO storage_channel_config (channel_id, key, value, secret, position)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(channel_id)
        .bind(&item.key)
        .bind(&item.value)
        .bind(item.secret)
        .bind(position as i32)
        .execute(&mut ***tx)
        .await?;
    }
    Ok(())
}

#[async_trait]
impl ChannelRepository for PgChannelRepository {
    #[tracing::instrument(skip(self), fields(db.table = "storage_channels"))]
    async fn list(&self) -> Result<Vec<StorageChannel>, AppError> {
        self.fetch_with_config(
            &format!(
                "SELECT {} FROM storage_channels ORDER BY created_at, name",
                CHANNEL_COLUMNS
            ),
            None,
        )
        .await
    }

    #[tracing::instrument(skip(self), fields(db.table = "storage_channels"))]
    async fn get(&self, id: Uuid) -> Result<Option<StorageChannel>, AppError> {
        let channels = self
            .fetch_with_config(
                &format!("SELECT {} FROM storage_channels WHERE id = $1", CHANNEL_COLUMNS),
                Some(ChannelKey::Id(id)),
            )
            .await?;
        Ok(channels.into_iter().next())
    }

    #[tracing::instrument(skip(self), fields(db.table = "storage_channels"))]
    async fn get_by_name(&self, name: &str) -> Result<Option<StorageChannel>, AppError> {
        let channels = self
            .fetch_with_config(
                &format!("SELECT {} FROM storage_channels WHERE name = $1", CHANNEL_COLUMNS),
                Some(ChannelKey::Name(name)),
            )
            .await?;
        Ok(channels.into_iter().next())
    }

    #[tracing::instrument(skip(self), fields(db.table = "storage_channels"))]
    async fn get_default(&self) -> Result<Option<StorageChannel>, AppError> {
        let channels = self
            .fetch_with_config(
                &format!(
                    "SELECT {} FROM storage_channels WHERE is_default AND enabled",
                    CHANNEL_COLUMNS
                ),
                None,
            )
            .await?;
        Ok(channels.into_iter().next())
    }

    #[tracing::instrument(skip(self, channel), fields(db.table = "storage_channels", channel = %channel.name))]
    async fn insert(&self, channel: &StorageChannel) -> Result<(), AppError> {
        let mut tx = TransactionGuard::begin(&self.pool).await?;

        sqlx::query(
            r#"
            INSERT INTO storage_channels (
                id, name, backend, is_default, enabled, builtin, hide_remote_url,
                custom_domain, signed_urls, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(channel.id)
        .bind(&channel.name)
        .bind(channel.backend.to_string())
        .bind(channel.is_default)
        .bind(channel.enabled)
        .bind(channel.builtin)
        .bind(channel.hide_remote_url)
        .bind(&channel.custom_domain)
        .bind(channel.signed_urls)
        .bind(channel.created_at)
        .bind(channel.updated_at)
        .execute(&mut **tx)
        .await?;

        write_config(&mut tx, channel.id, &channel.config).await?;
        tx.commit().await
    }

    #[tracing::instrument(skip(self, channel), fields(db.table = "storage_channels", channel = %channel.name))]
    async fn update(&self, channel: &StorageChannel) -> Result<bool, AppError> {
        let mut tx = TransactionGuard::begin(&self.pool).await?;

        let result = sqlx::query(
            r#"
            UPDATE storage_channels
            SET name = $2, backend = $3, enabled = $4, hide_remote_url = $5,
                custom_domain = $6, signed_urls = $7, updated_at = $8
            WHERE id = $1
            "#,
        )
        .bind(channel.id)
        .bind(&channel.name)
        .bind(channel.backend.to_string())
        .bind(channel.enabled)
        .bind(channel.hide_remote_url)
        .bind(&channel.custom_domain)
        .bind(channel.signed_urls)
        .bind(channel.updated_at)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        write_config(&mut tx, channel.id, &channel.config).await?;
        tx.commit().await?;
        Ok(true)
    }

    #[tracing::instrument(skip(self), fields(db.table = "storage_channels"))]
    async fn delete(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            "DELETE FROM storage_channels WHERE id = $1 AND NOT builtin AND NOT is_default",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(skip(self), fields(db.table = "storage_channels"))]
    async fn set_default(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, AppError> {
        let mut tx = TransactionGuard::begin(&self.pool).await?;

        sqlx::query(
            "UPDATE storage_channels SET is_default = FALSE, updated_at = $1 WHERE is_default",
        )
        .bind(now)
        .execute(&mut **tx)
        .await?;

        let promoted = sqlx::query(
            r#"
            UPDATE storage_channels SET is_default = TRUE, updated_at = $2
            WHERE id = $1 AND enabled
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&mut **tx)
        .await?;

        if promoted.rows_affected() == 0 {
            // Keep the previous default in place.
            tx.rollback().await?;
            return Ok(false);
        }

        tx.commit().await?;
        Ok(true)
    }
}
