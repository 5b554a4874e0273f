//! Channel-aware placement and URL resolution.

use std::collections::HashMap;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use bytes::Bytes;
use hoard_core::config::StorageConfig;
use hoard_core::models::channel::StorageChannel;
use hoard_core::models::file::{AccessMode, FileRecord, ResolvedUrls};
use hoard_core::{AppError, Clock};
use tokio::io::AsyncRead;
use uuid::Uuid;

use crate::access::resolve_access_mode;
use crate::factory::create_storage;
use crate::traits::{ByteStream, Storage, StorageError};
use crate::url_cache::UrlCache;

pub struct PlacementRequest {
    pub object_path: String,
    pub content_type: String,
    /// Local file streamed to the backend (merge staging output).
    pub source: PathBuf,
    /// Optional thumbnail `(key, png bytes)`.
    pub thumbnail: Option<(String, Bytes)>,
}

/// Backend paths produced by a placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacedObject {
    pub channel_id: Uuid,
    pub object_path: String,
    pub thumbnail_path: Option<String>,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub hide_remote_url: bool,
    pub proxy_base_path: String,
    pub signed_url_ttl: Duration,
    pub url_cache_capacity: usize,
}

impl From<&StorageConfig> for RouterSettings {
    fn from(config: &StorageConfig) -> Self {
        Self {
            hide_remote_url: config.hide_remote_url,
            proxy_base_path: config.proxy_base_path.trim_end_matches('/').to_string(),
            signed_url_ttl: Duration::from_secs(config.signed_url_ttl_secs),
            url_cache_capacity: config.url_cache_capacity,
        }
    }
}

/// Turns channels into backends and files into URLs.
///
/// Backends are built lazily from channel configuration and cached per channel
/// id; [`StorageRouter::invalidate`] must be called whenever a channel's
/// configuration changes.
pub struct StorageRouter {
    backends: RwLock<HashMap<Uuid, Arc<dyn Storage>>>,
    url_cache: UrlCache,
    settings: RouterSettings,
}

impl StorageRouter {
    pub fn new(settings: RouterSettings, clock: Arc<dyn Clock>) -> Self {
        let url_cache = UrlCache::new(settings.url_cache_capacity, clock);
        Self {
            backends: RwLock::new(HashMap::new()),
            url_cache,
            settings,
        }
    }

    pub fn from_config(config: &StorageConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(RouterSettings::from(config), clock)
    }

    /// Pin a backend instance for a channel instead of building one from config.
    #[cfg(test)]
    fn register_backend(&self, channel_id: Uuid, storage: Arc<dyn Storage>) {
        self.backends
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(channel_id, storage);
    }

    /// Forget the cached backend and signed URLs of a channel.
    pub fn invalidate(&self, channel_id: Uuid) {
        self.backends
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&channel_id);
        let dropped = self.url_cache.invalidate_channel(channel_id);
        tracing::debug!(channel_id = %channel_id, dropped_urls = dropped, "Channel caches invalidated");
    }

    async fn backend(&self, channel: &StorageChannel) -> Result<Arc<dyn Storage>, AppError> {
        if let Some(storage) = self
            .backends
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(&channel.id)
        {
            return Ok(storage.clone());
        }

        let storage = create_storage(channel).await.map_err(|e| {
            tracing::error!(
                channel_id = %channel.id,
                channel = %channel.name,
                error = %e,
                "Failed to build storage backend"
            );
            AppError::ChannelUnavailable(format!("channel '{}': {}", channel.name, e))
        })?;

        self.backends
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .entry(channel.id)
            .or_insert_with(|| storage.clone());
        Ok(storage)
    }

    /// Write an object (and optional thumbnail) to the given channel.
    ///
    /// Never falls back to another channel. A failed thumbnail write is logged
    /// and dropped; a failed original write aborts.
    pub async fn place(
        &self,
        channel: &StorageChannel,
        request: PlacementRequest,
    ) -> Result<PlacedObject, AppError> {
        if !channel.enabled {
            return Err(AppError::ChannelUnavailable(format!(
                "channel '{}' is disabled",
                channel.name
            )));
        }
        let storage = self.backend(channel).await?;
        let start = std::time::Instant::now();

        let file = tokio::fs::File::open(&request.source).await?;
        let reader = Box::pin(file) as Pin<Box<dyn AsyncRead + Send + Unpin>>;
        let size = storage
            .put_stream(&request.object_path, &request.content_type, reader)
            .await
            .map_err(placement_error)?;

        let thumbnail_path = match request.thumbnail {
            Some((key, png)) => match storage.put(&key, png, "image/png").await {
                Ok(()) => Some(key),
                Err(e) => {
                    tracing::warn!(
                        channel_id = %channel.id,
                        key = %key,
                        error = %e,
                        "Thumbnail placement failed; continuing without thumbnail"
                    );
                    None
                }
            },
            None => None,
        };

        tracing::info!(
            channel_id = %channel.id,
            backend = %storage.backend_type(),
            key = %request.object_path,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Object placed"
        );

        Ok(PlacedObject {
            channel_id: channel.id,
            object_path: request.object_path,
            thumbnail_path,
            size,
        })
    }

    /// Externally usable URLs for a file stored on `channel`.
    ///
    /// Direct-mode failures (backend unreachable, signing error) degrade to the
    /// proxy path, which is always safe to hand out.
    pub async fn resolve(&self, file: &FileRecord, channel: &StorageChannel) -> ResolvedUrls {
        let capabilities = channel.capabilities();
        let mode = resolve_access_mode(
            file.access_level,
            channel.hide_remote_url,
            self.settings.hide_remote_url,
            capabilities.direct_urls,
        );

        if mode == AccessMode::Direct {
            match self.direct_urls(file, channel).await {
                Ok(urls) => return urls,
                Err(e) => {
                    tracing::warn!(
                        file_id = %file.id,
                        channel_id = %channel.id,
                        error = %e,
                        "Direct URL unavailable; falling back to proxy"
                    );
                }
            }
        }

        self.proxy_urls(file)
    }

    pub fn proxy_urls(&self, file: &FileRecord) -> ResolvedUrls {
        let base = &self.settings.proxy_base_path;
        ResolvedUrls {
            mode: AccessMode::Proxy,
            url: format!("{}/{}", base, file.id),
            thumbnail_url: file
                .thumbnail_path
                .as_ref()
                .map(|_| format!("{}/{}/thumbnail", base, file.id)),
        }
    }

    async fn direct_urls(
        &self,
        file: &FileRecord,
        channel: &StorageChannel,
    ) -> Result<ResolvedUrls, AppError> {
        let url = self.direct_url(channel, &file.object_path).await?;
        let thumbnail_url = match file.thumbnail_path {
            Some(ref key) => Some(self.direct_url(channel, key).await?),
            None => None,
        };
        Ok(ResolvedUrls {
            mode: AccessMode::Direct,
            url,
            thumbnail_url,
        })
    }

    async fn direct_url(&self, channel: &StorageChannel, key: &str) -> Result<String, AppError> {
        if channel.signed_urls {
            if let Some(url) = self.url_cache.get(channel.id, key) {
                return Ok(url);
            }
            let storage = self.backend(channel).await?;
            let url = storage
                .presigned_url(key, self.settings.signed_url_ttl)
                .await?;
            self.url_cache
                .insert(channel.id, key, url.clone(), self.settings.signed_url_ttl);
            return Ok(url);
        }

        if let Some(ref domain) = channel.custom_domain {
            return Ok(custom_domain_url(domain, key));
        }

        let storage = self.backend(channel).await?;
        storage.public_url(key).ok_or_else(|| {
            AppError::ChannelUnavailable(format!("channel '{}' has no public URL", channel.name))
        })
    }

    /// Stream an object for proxy serving.
    pub async fn open(&self, channel: &StorageChannel, key: &str) -> Result<ByteStream, AppError> {
        let storage = self.backend(channel).await?;
        Ok(storage.get_stream(key).await?)
    }

    /// Best-effort removal. Failures are logged and reported as `false`.
    pub async fn delete(&self, channel: &StorageChannel, key: &str) -> bool {
        let storage = match self.backend(channel).await {
            Ok(storage) => storage,
            Err(e) => {
                tracing::warn!(channel_id = %channel.id, key = %key, error = %e, "Delete skipped: backend unavailable");
                return false;
            }
        };
        match storage.delete(key).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(channel_id = %channel.id, key = %key, error = %e, "Best-effort delete failed");
                false
            }
        }
    }
}

fn placement_error(err: StorageError) -> AppError {
    match err {
        StorageError::ConfigError(msg) => AppError::ChannelUnavailable(msg),
        other => AppError::Storage(other.to_string()),
    }
}

fn custom_domain_url(domain: &str, key: &str) -> String {
    let domain = domain.trim_end_matches('/');
    if domain.starts_with("http://") || domain.starts_with("https://") {
        format!("{}/{}", domain, key)
    } else {
        format!("https://{}/{}", domain, key)
    }
}

#[cfg(all(test, feature = "storage-local"))]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use futures::TryStreamExt;
    use hoard_core::models::channel::{keys, ChannelConfigItem};
    use hoard_core::models::file::{AccessLevel, FileStatus};
    use hoard_core::{ManualClock, StorageBackend};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn settings() -> RouterSettings {
        RouterSettings {
            hide_remote_url: false,
            proxy_base_path: "/files".into(),
            signed_url_ttl: Duration::from_secs(600),
            url_cache_capacity: 16,
        }
    }

    fn local_channel(path: &std::path::Path, base_url: Option<&str>) -> StorageChannel {
        let mut config = vec![ChannelConfigItem::new(keys::LOCAL_PATH, path.to_string_lossy())];
        if let Some(url) = base_url {
            config.push(ChannelConfigItem::new(keys::LOCAL_BASE_URL, url));
        }
        StorageChannel {
            id: Uuid::new_v4(),
            name: "local".into(),
            backend: StorageBackend::Local,
            is_default: true,
            enabled: true,
            builtin: true,
            hide_remote_url: None,
            custom_domain: None,
            signed_urls: false,
            config,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn file_on(channel: &StorageChannel, access_level: AccessLevel) -> FileRecord {
        FileRecord {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            display_name: "a.png".into(),
            original_name: "a.png".into(),
            size: 3,
            width: None,
            height: None,
            format: None,
            content_type: "image/png".into(),
            access_level,
            channel_id: channel.id,
            object_path: "files/a.png".into(),
            thumbnail_path: Some("thumbnails/a.png".into()),
            content_hash: "0".repeat(32),
            original_file_id: None,
            folder_id: None,
            status: FileStatus::Normal,
            expires_at: None,
            deleted_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    /// Backend that counts presign calls.
    struct SigningStorage {
        signed: AtomicUsize,
    }

    #[async_trait]
    impl Storage for SigningStorage {
        async fn put(&self, _: &str, _: Bytes, _: &str) -> crate::StorageResult<()> {
            Ok(())
        }
        async fn put_stream(
            &self,
            _: &str,
            _: &str,
            _: Pin<Box<dyn AsyncRead + Send + Unpin>>,
        ) -> crate::StorageResult<u64> {
            Ok(0)
        }
        async fn get_stream(&self, key: &str) -> crate::StorageResult<ByteStream> {
            Err(StorageError::NotFound(key.into()))
        }
        async fn delete(&self, _: &str) -> crate::StorageResult<()> {
            Err(StorageError::DeleteFailed("unreachable".into()))
        }
        fn public_url(&self, key: &str) -> Option<String> {
            Some(format!("https://bucket.example/{}", key))
        }
        async fn presigned_url(&self, key: &str, _: Duration) -> crate::StorageResult<String> {
            let n = self.signed.fetch_add(1, Ordering::SeqCst);
            Ok(format!("https://bucket.example/{}?sig={}", key, n))
        }
        fn backend_type(&self) -> StorageBackend {
            StorageBackend::S3
        }
    }

    #[tokio::test]
    async fn private_files_never_get_backend_urls() {
        let dir = tempfile::tempdir().unwrap();
        let router = StorageRouter::new(settings(), Arc::new(ManualClock::default()));
        let mut channel = local_channel(dir.path(), Some("http://cdn.local/static"));
        channel.hide_remote_url = Some(false);

        let file = file_on(&channel, AccessLevel::Private);
        let urls = router.resolve(&file, &channel).await;
        assert_eq!(urls.mode, AccessMode::Proxy);
        assert_eq!(urls.url, format!("/files/{}", file.id));
        assert_eq!(urls.thumbnail_url, Some(format!("/files/{}/thumbnail", file.id)));

        let public = file_on(&channel, AccessLevel::Public);
        let urls = router.resolve(&public, &channel).await;
        assert_eq!(urls.mode, AccessMode::Direct);
        assert_eq!(urls.url, "http://cdn.local/static/files/a.png");
    }

    #[tokio::test]
    async fn custom_domain_rewrites_direct_urls() {
        let dir = tempfile::tempdir().unwrap();
        let router = StorageRouter::new(settings(), Arc::new(ManualClock::default()));
        let mut channel = local_channel(dir.path(), Some("http://origin/static"));
        channel.custom_domain = Some("cdn.example.com".into());

        let file = file_on(&channel, AccessLevel::Public);
        let urls = router.resolve(&file, &channel).await;
        assert_eq!(urls.url, "https://cdn.example.com/files/a.png");
    }

    #[tokio::test]
    async fn signed_urls_are_cached_until_invalidated() {
        let dir = tempfile::tempdir().unwrap();
        let router = StorageRouter::new(settings(), Arc::new(ManualClock::default()));
        let mut channel = local_channel(dir.path(), None);
        channel.backend = StorageBackend::S3;
        channel.signed_urls = true;
        let backend = Arc::new(SigningStorage {
            signed: AtomicUsize::new(0),
        });
        router.register_backend(channel.id, backend.clone());

        let mut file = file_on(&channel, AccessLevel::Public);
        file.thumbnail_path = None;

        let first = router.resolve(&file, &channel).await;
        let second = router.resolve(&file, &channel).await;
        assert_eq!(first.mode, AccessMode::Direct);
        assert_eq!(first.url, second.url);
        assert_eq!(backend.signed.load(Ordering::SeqCst), 1);

        router.invalidate(channel.id);
        router.register_backend(channel.id, backend.clone());
        let third = router.resolve(&file, &channel).await;
        assert_ne!(third.url, first.url);
        assert_eq!(backend.signed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn disabled_or_broken_channels_refuse_placement() {
        let dir = tempfile::tempdir().unwrap();
        let router = StorageRouter::new(settings(), Arc::new(ManualClock::default()));
        let mut channel = local_channel(dir.path(), None);
        channel.enabled = false;

        let request = || PlacementRequest {
            object_path: "files/x.bin".into(),
            content_type: "application/octet-stream".into(),
            source: dir.path().join("x.bin"),
            thumbnail: None,
        };

        let err = router.place(&channel, request()).await.unwrap_err();
        assert!(matches!(err, AppError::ChannelUnavailable(_)));

        channel.enabled = true;
        channel.config.clear();
        router.invalidate(channel.id);
        let err = router.place(&channel, request()).await.unwrap_err();
        assert!(matches!(err, AppError::ChannelUnavailable(_)));
    }

    #[tokio::test]
    async fn place_open_and_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let router = StorageRouter::new(settings(), Arc::new(ManualClock::default()));
        let channel = local_channel(dir.path(), None);

        let staged = dir.path().join("staged.bin");
        std::fs::write(&staged, b"merged bytes").unwrap();

        let placed = router
            .place(
                &channel,
                PlacementRequest {
                    object_path: "files/o/2024/01/f.bin".into(),
                    content_type: "application/octet-stream".into(),
                    source: staged,
                    thumbnail: Some((
                        "thumbnails/o/2024/01/f.png".into(),
                        Bytes::from_static(b"png"),
                    )),
                },
            )
            .await
            .unwrap();
        assert_eq!(placed.size, 12);
        assert_eq!(placed.thumbnail_path.as_deref(), Some("thumbnails/o/2024/01/f.png"));

        let parts: Vec<Bytes> = router
            .open(&channel, &placed.object_path)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(parts.concat(), b"merged bytes");

        assert!(router.delete(&channel, &placed.object_path).await);
        let err = router.open(&channel, &placed.object_path).await.err();
        assert!(matches!(err, Some(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn failed_delete_is_reported_not_raised() {
        let router = StorageRouter::new(settings(), Arc::new(ManualClock::default()));
        let dir = tempfile::tempdir().unwrap();
        let channel = local_channel(dir.path(), None);
        router.register_backend(
            channel.id,
            Arc::new(SigningStorage {
                signed: AtomicUsize::new(0),
            }),
        );
        assert!(!router.delete(&channel, "files/x").await);
    }
}
