//! Storage channel registry: CRUD, default reassignment, export and import.
//!
//! Reads always return channels with secrets masked. Every mutation
//! invalidates the router's cached backend and signed URLs for the channel.

use std::sync::Arc;

use hoard_core::config::StorageConfig;
use hoard_core::models::channel::{
    keys, merge_config_items, ChannelConfigItem, ChannelDraft, ChannelExport, ImportSummary,
    StorageChannel, BUILTIN_CHANNEL_NAME, CHANNEL_EXPORT_VERSION,
};
use hoard_core::{AppError, Clock, StorageBackend};
use hoard_db::{ChannelRepository, FileRepository};
use hoard_storage::{create_storage, StorageRouter};
use uuid::Uuid;
use validator::Validate;

pub struct ChannelRegistry {
    channels: Arc<dyn ChannelRepository>,
    files: Arc<dyn FileRepository>,
    router: Arc<StorageRouter>,
    clock: Arc<dyn Clock>,
}

impl ChannelRegistry {
    pub fn new(
        channels: Arc<dyn ChannelRepository>,
        files: Arc<dyn FileRepository>,
        router: Arc<StorageRouter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            channels,
            files,
            router,
            clock,
        }
    }

    /// Make sure the built-in local channel exists and that some enabled
    /// channel is the default.
    #[tracing::instrument(skip(self, config))]
    pub async fn ensure_builtin(&self, config: &StorageConfig) -> Result<StorageChannel, AppError> {
        let builtin = match self.channels.get_by_name(BUILTIN_CHANNEL_NAME).await? {
            Some(channel) => channel,
            None => {
                let now = self.clock.now();
                let mut settings = vec![ChannelConfigItem::new(
                    keys::LOCAL_PATH,
                    config.local_storage_path.to_string_lossy(),
                )];
                if let Some(ref base_url) = config.local_storage_base_url {
                    settings.push(ChannelConfigItem::new(keys::LOCAL_BASE_URL, base_url.clone()));
                }
                let has_default = self.channels.get_default().await?.is_some();
                let channel = StorageChannel {
                    id: Uuid::new_v4(),
                    name: BUILTIN_CHANNEL_NAME.to_string(),
                    backend: StorageBackend::Local,
                    is_default: !has_default,
                    enabled: true,
                    builtin: true,
                    hide_remote_url: None,
                    custom_domain: None,
                    signed_urls: false,
                    config: settings,
                    created_at: now,
                    updated_at: now,
                };
                self.channels.insert(&channel).await?;
                tracing::info!(channel_id = %channel.id, path = %config.local_storage_path.display(), "Built-in local channel created");
                channel
            }
        };

        if self.channels.get_default().await?.is_none() {
            tracing::warn!(channel_id = %builtin.id, "No default channel; promoting built-in channel");
            self.channels.set_default(builtin.id, self.clock.now()).await?;
        }

        self.raw(builtin.id).await
    }

    pub async fn list(&self) -> Result<Vec<StorageChannel>, AppError> {
        Ok(self
            .channels
            .list()
            .await?
            .iter()
            .map(StorageChannel::masked)
            .collect())
    }

    pub async fn get(&self, id: Uuid) -> Result<StorageChannel, AppError> {
        Ok(self.raw(id).await?.masked())
    }

    /// Unmasked channel for internal use by the router.
    pub(crate) async fn raw(&self, id: Uuid) -> Result<StorageChannel, AppError> {
        self.channels
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("storage channel {}", id)))
    }

    pub(crate) async fn default_channel(&self) -> Result<StorageChannel, AppError> {
        self.channels
            .get_default()
            .await?
            .ok_or_else(|| AppError::ChannelUnavailable("no default storage channel".to_string()))
    }

    /// Explicit channel, or the default when none was requested.
    pub(crate) async fn destination(&self, id: Option<Uuid>) -> Result<StorageChannel, AppError> {
        match id {
            Some(id) => self.raw(id).await,
            None => self.default_channel().await,
        }
    }

    async fn check_backend_config(&self, channel: &StorageChannel) -> Result<(), AppError> {
        create_storage(channel).await.map(|_| ()).map_err(|e| {
            AppError::InvalidInput(format!("channel '{}' is misconfigured: {}", channel.name, e))
        })
    }

    #[tracing::instrument(skip(self, draft), fields(channel = %draft.name))]
    pub async fn create(&self, draft: ChannelDraft) -> Result<StorageChannel, AppError> {
        draft.validate()?;
        if self.channels.get_by_name(&draft.name).await?.is_some() {
            return Err(AppError::InvalidInput(format!(
                "channel '{}' already exists",
                draft.name
            )));
        }

        let now = self.clock.now();
        let channel = StorageChannel {
            id: Uuid::new_v4(),
            name: draft.name,
            backend: draft.backend,
            is_default: false,
            enabled: draft.enabled,
            builtin: false,
            hide_remote_url: draft.hide_remote_url,
            custom_domain: draft.custom_domain,
            signed_urls: draft.signed_urls,
            config: merge_config_items(&[], draft.config),
            created_at: now,
            updated_at: now,
        };
        self.check_backend_config(&channel).await?;
        self.channels.insert(&channel).await?;

        tracing::info!(channel_id = %channel.id, backend = %channel.backend, "Storage channel created");
        Ok(channel.masked())
    }

    #[tracing::instrument(skip(self, draft), fields(channel = %draft.name))]
    pub async fn update(&self, id: Uuid, draft: ChannelDraft) -> Result<StorageChannel, AppError> {
        draft.validate()?;
        let stored = self.raw(id).await?;

        if !draft.enabled && stored.is_protected() {
            return Err(AppError::ChannelProtected(format!(
                "channel '{}' cannot be disabled",
                stored.name
            )));
        }
        if stored.builtin && draft.name != stored.name {
            return Err(AppError::ChannelProtected(format!(
                "channel '{}' cannot be renamed",
                stored.name
            )));
        }
        if draft.name != stored.name && self.channels.get_by_name(&draft.name).await?.is_some() {
            return Err(AppError::InvalidInput(format!(
                "channel '{}' already exists",
                draft.name
            )));
        }

        let channel = StorageChannel {
            name: draft.name,
            backend: draft.backend,
            enabled: draft.enabled,
            hide_remote_url: draft.hide_remote_url,
            custom_domain: draft.custom_domain,
            signed_urls: draft.signed_urls,
            config: merge_config_items(&stored.config, draft.config),
            updated_at: self.clock.now(),
            ..stored
        };
        self.check_backend_config(&channel).await?;

        if !self.channels.update(&channel).await? {
            return Err(AppError::NotFound(format!("storage channel {}", id)));
        }
        self.router.invalidate(id);

        tracing::info!(channel_id = %id, "Storage channel updated");
        Ok(channel.masked())
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, id: Uuid) -> Result<(), AppError> {
        let stored = self.raw(id).await?;
        if stored.is_protected() {
            return Err(AppError::ChannelProtected(format!(
                "channel '{}' is built-in or default and cannot be deleted",
                stored.name
            )));
        }
        let files = self.files.count_on_channel(id).await?;
        if files > 0 {
            return Err(AppError::ChannelProtected(format!(
                "channel '{}' still holds {} files",
                stored.name, files
            )));
        }

        if !self.channels.delete(id).await? {
            return Err(AppError::ChannelProtected(format!(
                "channel '{}' could not be deleted",
                stored.name
            )));
        }
        self.router.invalidate(id);
        tracing::info!(channel_id = %id, channel = %stored.name, "Storage channel deleted");
        Ok(())
    }

    pub async fn enable(&self, id: Uuid) -> Result<StorageChannel, AppError> {
        self.set_enabled(id, true).await
    }

    pub async fn disable(&self, id: Uuid) -> Result<StorageChannel, AppError> {
        self.set_enabled(id, false).await
    }

    async fn set_enabled(&self, id: Uuid, enabled: bool) -> Result<StorageChannel, AppError> {
        let stored = self.raw(id).await?;
        if !enabled && stored.is_protected() {
            return Err(AppError::ChannelProtected(format!(
                "channel '{}' cannot be disabled",
                stored.name
            )));
        }
        if stored.enabled == enabled {
            return Ok(stored.masked());
        }

        let channel = StorageChannel {
            enabled,
            updated_at: self.clock.now(),
            ..stored
        };
        if !self.channels.update(&channel).await? {
            return Err(AppError::NotFound(format!("storage channel {}", id)));
        }
        self.router.invalidate(id);
        tracing::info!(channel_id = %id, enabled, "Storage channel toggled");
        Ok(channel.masked())
    }

    /// Atomically move the default flag to `id`.
    #[tracing::instrument(skip(self))]
    pub async fn set_default(&self, id: Uuid) -> Result<StorageChannel, AppError> {
        let stored = self.raw(id).await?;
        if !stored.enabled {
            return Err(AppError::ChannelUnavailable(format!(
                "channel '{}' is disabled and cannot become the default",
                stored.name
            )));
        }
        if !self.channels.set_default(id, self.clock.now()).await? {
            return Err(AppError::ChannelUnavailable(format!(
                "channel '{}' could not become the default",
                stored.name
            )));
        }
        tracing::info!(channel_id = %id, channel = %stored.name, "Default storage channel changed");
        self.get(id).await
    }

    pub async fn export(&self, include_secrets: bool) -> Result<ChannelExport, AppError> {
        let channels = self.channels.list().await?;
        Ok(ChannelExport {
            version: CHANNEL_EXPORT_VERSION,
            exported_at: self.clock.now(),
            channels: channels
                .iter()
                .map(|c| c.to_document(include_secrets))
                .collect(),
        })
    }

    /// Apply an export document. Channels are matched by name; existing ones
    /// are only touched when `overwrite` is set. Masked secrets keep the stored
    /// value. A document flagged default becomes the default when enabled.
    #[tracing::instrument(skip(self, export), fields(channels = export.channels.len()))]
    pub async fn import(
        &self,
        export: ChannelExport,
        overwrite: bool,
    ) -> Result<ImportSummary, AppError> {
        if export.version > CHANNEL_EXPORT_VERSION {
            return Err(AppError::InvalidInput(format!(
                "unsupported channel export version {}",
                export.version
            )));
        }

        let mut summary = ImportSummary::default();
        let mut new_default: Option<Uuid> = None;

        for document in export.channels {
            let existing = self.channels.get_by_name(&document.name).await?;
            let id = match existing {
                Some(stored) if overwrite => {
                    let mut draft = document.to_draft();
                    if stored.is_protected() {
                        draft.enabled = true;
                    }
                    self.update(stored.id, draft).await?;
                    summary.updated += 1;
                    stored.id
                }
                Some(stored) => {
                    summary.skipped += 1;
                    stored.id
                }
                None => {
                    let created = self.create(document.to_draft()).await?;
                    summary.created += 1;
                    created.id
                }
            };
            if document.is_default && document.enabled {
                new_default = Some(id);
            }
        }

        if let Some(id) = new_default {
            let current = self.channels.get_default().await?.map(|c| c.id);
            if current != Some(id) && (overwrite || summary.created > 0) {
                self.set_default(id).await?;
            }
        }

        tracing::info!(
            created = summary.created,
            updated = summary.updated,
            skipped = summary.skipped,
            "Channel configuration imported"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use hoard_core::config::Config;
    use hoard_core::models::channel::MASKED_SECRET;
    use hoard_core::ManualClock;
    use hoard_db::{MemoryChannelRepository, MemoryFileRepository};
    use hoard_storage::router::RouterSettings;

    struct Fixture {
        registry: ChannelRegistry,
        _dir: tempfile::TempDir,
        config: Config,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::for_local(dir.path().join("scratch"), dir.path().join("store"));
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(Utc::now()));
        let router = Arc::new(StorageRouter::new(
            RouterSettings::from(config.storage()),
            clock.clone(),
        ));
        let registry = ChannelRegistry::new(
            Arc::new(MemoryChannelRepository::new()),
            Arc::new(MemoryFileRepository::new()),
            router,
            clock,
        );
        registry.ensure_builtin(config.storage()).await.unwrap();
        Fixture {
            registry,
            _dir: dir,
            config,
        }
    }

    fn s3_draft(name: &str) -> ChannelDraft {
        ChannelDraft {
            name: name.to_string(),
            backend: StorageBackend::S3,
            hide_remote_url: None,
            custom_domain: None,
            signed_urls: true,
            config: vec![
                ChannelConfigItem::new(keys::S3_BUCKET, "media"),
                ChannelConfigItem::new(keys::S3_REGION, "eu-west-1"),
                ChannelConfigItem::new(keys::S3_ACCESS_KEY_ID, "AKIDEXAMPLE"),
                ChannelConfigItem::secret(keys::S3_SECRET_ACCESS_KEY, "wJalrXUtnFEMI"),
            ],
            enabled: true,
        }
    }

    #[tokio::test]
    async fn builtin_channel_is_default_and_idempotent() {
        let f = fixture().await;
        let again = f.registry.ensure_builtin(f.config.storage()).await.unwrap();
        let channels = f.registry.list().await.unwrap();

        assert_eq!(channels.len(), 1);
        assert!(again.builtin);
        assert!(again.is_default);
    }

    #[tokio::test]
    async fn builtin_cannot_be_deleted_or_disabled() {
        let f = fixture().await;
        let builtin = f.registry.default_channel().await.unwrap();

        assert!(matches!(
            f.registry.delete(builtin.id).await,
            Err(AppError::ChannelProtected(_))
        ));
        assert!(matches!(
            f.registry.disable(builtin.id).await,
            Err(AppError::ChannelProtected(_))
        ));
    }

    #[tokio::test]
    async fn secrets_are_masked_and_survive_masked_update() {
        let f = fixture().await;
        let created = f.registry.create(s3_draft("archive")).await.unwrap();
        assert_eq!(
            created.config_value(keys::S3_SECRET_ACCESS_KEY),
            Some(MASKED_SECRET)
        );

        // Round-trip the masked view back through update.
        let mut draft = created.to_document(false).to_draft();
        draft.custom_domain = Some("cdn.example.com".into());
        f.registry.update(created.id, draft).await.unwrap();

        let raw = f.registry.raw(created.id).await.unwrap();
        assert_eq!(
            raw.config_value(keys::S3_SECRET_ACCESS_KEY),
            Some("wJalrXUtnFEMI")
        );
        assert_eq!(raw.custom_domain.as_deref(), Some("cdn.example.com"));
    }

    #[tokio::test]
    async fn default_moves_and_old_default_becomes_deletable() {
        let f = fixture().await;
        let builtin = f.registry.default_channel().await.unwrap();
        let archive = f.registry.create(s3_draft("archive")).await.unwrap();

        f.registry.set_default(archive.id).await.unwrap();
        assert_eq!(f.registry.default_channel().await.unwrap().id, archive.id);
        assert!(matches!(
            f.registry.delete(archive.id).await,
            Err(AppError::ChannelProtected(_))
        ));
        // Built-in stays protected even when no longer default.
        assert!(f.registry.delete(builtin.id).await.is_err());
    }

    #[tokio::test]
    async fn disabled_channel_cannot_become_default() {
        let f = fixture().await;
        let archive = f.registry.create(s3_draft("archive")).await.unwrap();
        f.registry.disable(archive.id).await.unwrap();

        assert!(matches!(
            f.registry.set_default(archive.id).await,
            Err(AppError::ChannelUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn misconfigured_channel_is_rejected() {
        let f = fixture().await;
        let mut draft = s3_draft("broken");
        draft.config.retain(|item| item.key != keys::S3_BUCKET);

        assert!(matches!(
            f.registry.create(draft).await,
            Err(AppError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn export_then_import_into_fresh_registry() {
        let source = fixture().await;
        source.registry.create(s3_draft("archive")).await.unwrap();
        let export = source.registry.export(true).await.unwrap();
        assert_eq!(export.version, CHANNEL_EXPORT_VERSION);
        assert_eq!(export.channels.len(), 2);

        let target = fixture().await;
        let summary = target.registry.import(export.clone(), false).await.unwrap();
        assert_eq!(summary.created, 1);
        assert_eq!(summary.skipped, 1);

        let summary = target.registry.import(export, true).await.unwrap();
        assert_eq!(summary.updated, 2);
    }
}
