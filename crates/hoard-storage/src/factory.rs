#[cfg(feature = "storage-local")]
use crate::LocalStorage;
#[cfg(feature = "storage-s3")]
use crate::s3::{S3Settings, S3Storage};
use crate::{Storage, StorageBackend, StorageError, StorageResult};
use hoard_core::models::channel::{keys, StorageChannel};
use std::sync::Arc;

const DEFAULT_S3_REGION: &str = "us-east-1";

/// Create the storage backend described by a channel's configuration
pub async fn create_storage(channel: &StorageChannel) -> StorageResult<Arc<dyn Storage>> {
    match channel.backend {
        #[cfg(feature = "storage-s3")]
        StorageBackend::S3 => {
            let bucket = channel
                .config_value(keys::S3_BUCKET)
                .map(String::from)
                .ok_or_else(|| {
                    StorageError::ConfigError(format!(
                        "channel '{}' has no {} configured",
                        channel.name,
                        keys::S3_BUCKET
                    ))
                })?;
            let region = channel
                .config_value(keys::S3_REGION)
                .unwrap_or(DEFAULT_S3_REGION)
                .to_string();

            let storage = S3Storage::new(S3Settings {
                bucket,
                region,
                endpoint_url: channel.config_value(keys::S3_ENDPOINT).map(String::from),
                access_key_id: channel.config_value(keys::S3_ACCESS_KEY_ID).map(String::from),
                secret_access_key: channel
                    .config_value(keys::S3_SECRET_ACCESS_KEY)
                    .map(String::from),
                public_base_url: channel
                    .config_value(keys::S3_PUBLIC_BASE_URL)
                    .map(String::from),
            })
            .await?;
            Ok(Arc::new(storage))
        }

        #[cfg(not(feature = "storage-s3"))]
        StorageBackend::S3 => Err(StorageError::ConfigError(
            "S3 storage backend not available (storage-s3 feature not enabled)".to_string(),
        )),

        #[cfg(feature = "storage-local")]
        StorageBackend::Local => {
            let base_path = channel
                .config_value(keys::LOCAL_PATH)
                .map(String::from)
                .ok_or_else(|| {
                    StorageError::ConfigError(format!(
                        "channel '{}' has no {} configured",
                        channel.name,
                        keys::LOCAL_PATH
                    ))
                })?;
            let base_url = channel.config_value(keys::LOCAL_BASE_URL).map(String::from);

            let storage = LocalStorage::new(base_path, base_url).await?;
            Ok(Arc::new(storage))
        }

        #[cfg(not(feature = "storage-local"))]
        StorageBackend::Local => Err(StorageError::ConfigError(
            "Local storage backend not available (storage-local feature not enabled)".to_string(),
        )),
    }
}
