//! Storage channel model: a configured backend plus its typed settings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::storage_types::StorageBackend;

/// Value returned in place of a secret on read.
pub const MASKED_SECRET: &str = "******";

/// Version written into exported channel documents.
pub const CHANNEL_EXPORT_VERSION: u32 = 1;

/// Name of the channel created on first start.
pub const BUILTIN_CHANNEL_NAME: &str = "local";

/// Well-known configuration keys.
pub mod keys {
    pub const LOCAL_PATH: &str = "local.path";
    pub const LOCAL_BASE_URL: &str = "local.base_url";
    pub const S3_BUCKET: &str = "s3.bucket";
    pub const S3_REGION: &str = "s3.region";
    pub const S3_ENDPOINT: &str = "s3.endpoint";
    pub const S3_ACCESS_KEY_ID: &str = "s3.access_key_id";
    pub const S3_SECRET_ACCESS_KEY: &str = "s3.secret_access_key";
    pub const S3_PUBLIC_BASE_URL: &str = "s3.public_base_url";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfigItem {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub secret: bool,
}

impl ChannelConfigItem {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            secret: false,
        }
    }

    pub fn secret(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            secret: true,
        }
    }

    pub fn masked(&self) -> Self {
        if self.secret {
            Self {
                value: MASKED_SECRET.to_string(),
                ..self.clone()
            }
        } else {
            self.clone()
        }
    }

    pub fn is_masked(&self) -> bool {
        self.secret && self.value == MASKED_SECRET
    }
}

/// Apply an incoming config list over the stored one. A secret that comes back
/// as the mask keeps its stored value; keys absent from `incoming` are dropped.
pub fn merge_config_items(
    stored: &[ChannelConfigItem],
    incoming: Vec<ChannelConfigItem>,
) -> Vec<ChannelConfigItem> {
    incoming
        .into_iter()
        .filter_map(|item| {
            if item.value == MASKED_SECRET {
                // A mask with nothing behind it is dropped rather than stored literally.
                stored
                    .iter()
                    .find(|s| s.key == item.key)
                    .map(|s| ChannelConfigItem {
                        secret: s.secret || item.secret,
                        ..s.clone()
                    })
            } else {
                Some(item)
            }
        })
        .collect()
}

/// What a channel can do, derived from its backend and settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelCapabilities {
    /// The backend can hand out URLs of its own.
    pub direct_urls: bool,
    /// The channel insists on proxying regardless of the global default.
    pub requires_proxy: bool,
    pub custom_domain: Option<String>,
    pub signed_urls: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageChannel {
    pub id: Uuid,
    pub name: String,
    pub backend: StorageBackend,
    pub is_default: bool,
    pub enabled: bool,
    /// Created by the system; can be reconfigured but never deleted or disabled.
    pub builtin: bool,
    /// Channel-level override of the global hide-remote-URL default.
    pub hide_remote_url: Option<bool>,
    pub custom_domain: Option<String>,
    /// Direct URLs are presigned (private buckets).
    pub signed_urls: bool,
    pub config: Vec<ChannelConfigItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StorageChannel {
    pub fn config_value(&self, key: &str) -> Option<&str> {
        self.config
            .iter()
            .find(|item| item.key == key)
            .map(|item| item.value.as_str())
            .filter(|v| !v.trim().is_empty())
    }

    /// Copy with every secret replaced by [`MASKED_SECRET`].
    pub fn masked(&self) -> Self {
        Self {
            config: self.config.iter().map(ChannelConfigItem::masked).collect(),
            ..self.clone()
        }
    }

    pub fn is_protected(&self) -> bool {
        self.builtin || self.is_default
    }

    pub fn capabilities(&self) -> ChannelCapabilities {
        let direct_urls = match self.backend {
            StorageBackend::Local => {
                self.config_value(keys::LOCAL_BASE_URL).is_some() || self.custom_domain.is_some()
            }
            StorageBackend::S3 => true,
        };
        ChannelCapabilities {
            direct_urls,
            requires_proxy: self.hide_remote_url == Some(true),
            custom_domain: self.custom_domain.clone(),
            signed_urls: self.signed_urls,
        }
    }

    pub fn to_document(&self, include_secrets: bool) -> ChannelDocument {
        let config = if include_secrets {
            self.config.clone()
        } else {
            self.config.iter().map(ChannelConfigItem::masked).collect()
        };
        ChannelDocument {
            name: self.name.clone(),
            backend: self.backend,
            is_default: self.is_default,
            enabled: self.enabled,
            builtin: self.builtin,
            hide_remote_url: self.hide_remote_url,
            custom_domain: self.custom_domain.clone(),
            signed_urls: self.signed_urls,
            config,
        }
    }
}

/// Create/update payload for a channel.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ChannelDraft {
    #[validate(length(
        min = 1,
        max = 100,
        message = "Channel name must be between 1 and 100 characters"
    ))]
    pub name: String,
    pub backend: StorageBackend,
    #[serde(default)]
    pub hide_remote_url: Option<bool>,
    #[validate(length(min = 1, max = 255))]
    #[serde(default)]
    pub custom_domain: Option<String>,
    #[serde(default)]
    pub signed_urls: bool,
    #[serde(default)]
    pub config: Vec<ChannelConfigItem>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// One channel inside an export document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDocument {
    pub name: String,
    pub backend: StorageBackend,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub builtin: bool,
    #[serde(default)]
    pub hide_remote_url: Option<bool>,
    #[serde(default)]
    pub custom_domain: Option<String>,
    #[serde(default)]
    pub signed_urls: bool,
    #[serde(default)]
    pub config: Vec<ChannelConfigItem>,
}

impl ChannelDocument {
    pub fn to_draft(&self) -> ChannelDraft {
        ChannelDraft {
            name: self.name.clone(),
            backend: self.backend,
            hide_remote_url: self.hide_remote_url,
            custom_domain: self.custom_domain.clone(),
            signed_urls: self.signed_urls,
            config: self.config.clone(),
            enabled: self.enabled,
        }
    }
}

/// Structured channel configuration export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelExport {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub channels: Vec<ChannelDocument>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s3_channel() -> StorageChannel {
        StorageChannel {
            id: Uuid::new_v4(),
            name: "archive".into(),
            backend: StorageBackend::S3,
            is_default: false,
            enabled: true,
            builtin: false,
            hide_remote_url: None,
            custom_domain: None,
            signed_urls: false,
            config: vec![
                ChannelConfigItem::new(keys::S3_BUCKET, "bucket"),
                ChannelConfigItem::secret(keys::S3_SECRET_ACCESS_KEY, "hunter2"),
            ],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn masking_hides_only_secrets() {
        let masked = s3_channel().masked();
        assert_eq!(masked.config_value(keys::S3_BUCKET), Some("bucket"));
        assert_eq!(
            masked.config_value(keys::S3_SECRET_ACCESS_KEY),
            Some(MASKED_SECRET)
        );
    }

    #[test]
    fn merge_keeps_secret_behind_mask() {
        let stored = s3_channel().config;
        let incoming = vec![
            ChannelConfigItem::new(keys::S3_BUCKET, "other-bucket"),
            ChannelConfigItem::secret(keys::S3_SECRET_ACCESS_KEY, MASKED_SECRET),
            ChannelConfigItem::secret(keys::S3_ACCESS_KEY_ID, MASKED_SECRET),
        ];
        let merged = merge_config_items(&stored, incoming);

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].value, "other-bucket");
        assert_eq!(merged[1].value, "hunter2");
        assert!(merged[1].secret);
    }

    #[test]
    fn export_document_masks_unless_asked() {
        let channel = s3_channel();
        let doc = channel.to_document(false);
        assert!(doc.config.iter().any(|c| c.value == MASKED_SECRET));

        let doc = channel.to_document(true);
        assert!(doc.config.iter().any(|c| c.value == "hunter2"));
    }

    #[test]
    fn capabilities_follow_backend_and_overrides() {
        let mut channel = s3_channel();
        assert!(channel.capabilities().direct_urls);
        assert!(!channel.capabilities().requires_proxy);

        channel.hide_remote_url = Some(true);
        assert!(channel.capabilities().requires_proxy);

        channel.backend = StorageBackend::Local;
        channel.config.clear();
        assert!(!channel.capabilities().direct_urls);
    }
}
