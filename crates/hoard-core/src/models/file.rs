use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Visibility of a file. `Private` content is always served through the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Public,
    #[default]
    Private,
    Protected,
}

impl Display for AccessLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            AccessLevel::Public => write!(f, "public"),
            AccessLevel::Private => write!(f, "private"),
            AccessLevel::Protected => write!(f, "protected"),
        }
    }
}

impl FromStr for AccessLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(AccessLevel::Public),
            "private" => Ok(AccessLevel::Private),
            "protected" => Ok(AccessLevel::Protected),
            _ => Err(anyhow::anyhow!("Invalid access level: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Normal,
    PendingDeletion,
}

impl Display for FileStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            FileStatus::Normal => write!(f, "normal"),
            FileStatus::PendingDeletion => write!(f, "pending_deletion"),
        }
    }
}

impl FromStr for FileStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(FileStatus::Normal),
            "pending_deletion" => Ok(FileStatus::PendingDeletion),
            _ => Err(anyhow::anyhow!("Invalid file status: {}", s)),
        }
    }
}

/// Durable content record.
///
/// A record with `original_file_id` set is a duplicate: its `channel_id`,
/// `object_path` and `thumbnail_path` are copies of the canonical record's and
/// its bytes were never stored independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub display_name: String,
    pub original_name: String,
    pub size: i64,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub format: Option<String>,
    pub content_type: String,
    pub access_level: AccessLevel,
    pub channel_id: Uuid,
    pub object_path: String,
    pub thumbnail_path: Option<String>,
    pub content_hash: String,
    pub original_file_id: Option<Uuid>,
    pub folder_id: Option<Uuid>,
    pub status: FileStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FileRecord {
    pub fn is_duplicate(&self) -> bool {
        self.original_file_id.is_some()
    }

    /// Id of the record whose bytes this record serves.
    pub fn canonical_id(&self) -> Uuid {
        self.original_file_id.unwrap_or(self.id)
    }

    pub fn is_servable(&self) -> bool {
        self.status == FileStatus::Normal
    }

    pub fn summary(&self) -> FileSummary {
        FileSummary {
            id: self.id,
            name: self.display_name.clone(),
            size: self.size,
            format: self.format.clone(),
        }
    }
}

/// How a URL reaches the bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    /// The backend's own URL (optionally behind a custom domain).
    Direct,
    /// A same-origin path streamed by the serving layer.
    Proxy,
}

/// Externally usable URLs for a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedUrls {
    pub mode: AccessMode,
    pub url: String,
    pub thumbnail_url: Option<String>,
}

/// Public identity of a finished file. Chunked uploads, instant uploads and
/// plain uploads all produce this shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileDescriptor {
    pub id: Uuid,
    pub name: String,
    pub size: i64,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub format: Option<String>,
    pub content_type: String,
    pub content_hash: String,
    pub access_level: AccessLevel,
    pub access_mode: AccessMode,
    pub url: String,
    pub thumbnail_url: Option<String>,
    pub original_file_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl FileDescriptor {
    pub fn new(file: &FileRecord, urls: ResolvedUrls) -> Self {
        Self {
            id: file.id,
            name: file.display_name.clone(),
            size: file.size,
            width: file.width,
            height: file.height,
            format: file.format.clone(),
            content_type: file.content_type.clone(),
            content_hash: file.content_hash.clone(),
            access_level: file.access_level,
            access_mode: urls.mode,
            url: urls.url,
            thumbnail_url: urls.thumbnail_url,
            original_file_id: file.original_file_id,
            created_at: file.created_at,
        }
    }
}

/// Minimal descriptor returned by the instant-upload precheck.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileSummary {
    pub id: Uuid,
    pub name: String,
    pub size: i64,
    pub format: Option<String>,
}

/// Zero-transfer upload of content the owner already stores.
#[derive(Debug, Clone, Deserialize)]
pub struct InstantUploadRequest {
    pub owner_id: Uuid,
    pub content_hash: String,
    pub file_size: u64,
    pub file_name: String,
    #[serde(default)]
    pub folder_id: Option<Uuid>,
    #[serde(default)]
    pub access_level: AccessLevel,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_round_trip_through_storage_form() {
        assert_eq!(FileStatus::PendingDeletion.to_string(), "pending_deletion");
        assert_eq!(
            "pending_deletion".parse::<FileStatus>().unwrap(),
            FileStatus::PendingDeletion
        );
        assert_eq!("protected".parse::<AccessLevel>().unwrap(), AccessLevel::Protected);
        assert!("secret".parse::<AccessLevel>().is_err());
    }
}
