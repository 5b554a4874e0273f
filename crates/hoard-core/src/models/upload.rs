use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::file::AccessLevel;

/// Upload session lifecycle.
///
/// `Pending -> Uploading -> Completed`, or `-> Failed` from either
/// non-terminal state. Terminal states never change again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Uploading,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }

    /// Whether chunk writes and completion are still honoured.
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        match (self, next) {
            (Pending, Uploading) | (Uploading, Completed) => true,
            (Pending, Failed) | (Uploading, Failed) => true,
            (Pending, Completed) => false,
            (Pending, Pending) | (Uploading, Uploading) => false,
            (Uploading, Pending) => false,
            (Completed, _) | (Failed, _) => false,
        }
    }
}

impl Display for SessionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            SessionStatus::Pending => write!(f, "pending"),
            SessionStatus::Uploading => write!(f, "uploading"),
            SessionStatus::Completed => write!(f, "completed"),
            SessionStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for SessionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SessionStatus::Pending),
            "uploading" => Ok(SessionStatus::Uploading),
            "completed" => Ok(SessionStatus::Completed),
            "failed" => Ok(SessionStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid session status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStatus {
    Pending,
    Uploaded,
}

impl Display for ChunkStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ChunkStatus::Pending => write!(f, "pending"),
            ChunkStatus::Uploaded => write!(f, "uploaded"),
        }
    }
}

impl FromStr for ChunkStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ChunkStatus::Pending),
            "uploaded" => Ok(ChunkStatus::Uploaded),
            _ => Err(anyhow::anyhow!("Invalid chunk status: {}", s)),
        }
    }
}

/// Number of chunks needed for `file_size` bytes at `chunk_size` bytes each.
pub fn total_chunk_count(file_size: u64, chunk_size: u64) -> u64 {
    if chunk_size == 0 {
        return 0;
    }
    file_size.div_ceil(chunk_size)
}

/// Expected byte length of chunk `index`. Every chunk is full except the
/// last, which carries the remainder.
pub fn expected_chunk_size(file_size: u64, chunk_size: u64, index: u64) -> Option<u64> {
    let total = total_chunk_count(file_size, chunk_size);
    if index >= total {
        return None;
    }
    let offset = index * chunk_size;
    Some(chunk_size.min(file_size - offset))
}

/// One resumable upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSession {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub file_name: String,
    pub file_size: i64,
    pub content_type: String,
    /// Declared whole-file digest, normalised to lowercase hex.
    pub content_hash: String,
    pub chunk_size: i64,
    pub total_chunks: i32,
    pub uploaded_chunks: i32,
    pub status: SessionStatus,
    pub folder_id: Option<Uuid>,
    pub access_level: AccessLevel,
    /// Destination channel. `None` resolves to the default channel at merge time.
    pub channel_id: Option<Uuid>,
    pub file_id: Option<Uuid>,
    pub error_message: Option<String>,
    pub merge_claimed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UploadSession {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Percentage in `[0, 100]`.
    pub fn progress(&self) -> f64 {
        if self.total_chunks <= 0 {
            return 0.0;
        }
        (self.uploaded_chunks as f64 / self.total_chunks as f64 * 100.0).min(100.0)
    }

    pub fn expected_chunk_size(&self, index: i32) -> Option<i64> {
        if index < 0 {
            return None;
        }
        expected_chunk_size(self.file_size as u64, self.chunk_size as u64, index as u64)
            .map(|size| size as i64)
    }

    pub fn is_ready_to_merge(&self) -> bool {
        self.total_chunks > 0 && self.uploaded_chunks == self.total_chunks
    }

    pub fn to_progress(&self) -> SessionProgress {
        SessionProgress {
            session_id: self.id,
            status: self.status,
            progress: self.progress(),
            uploaded_chunks: self.uploaded_chunks,
            total_chunks: self.total_chunks,
            expires_at: self.expires_at,
            file_id: self.file_id,
        }
    }
}

/// One slice of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadChunk {
    pub session_id: Uuid,
    pub chunk_index: i32,
    /// Expected byte length, fixed at session creation.
    pub size: i64,
    pub status: ChunkStatus,
    pub content_hash: Option<String>,
    /// Scratch location of the verified bytes.
    pub blob_path: Option<String>,
    pub uploaded_at: Option<DateTime<Utc>>,
}

impl UploadChunk {
    pub fn pending(session_id: Uuid, chunk_index: i32, size: i64) -> Self {
        Self {
            session_id,
            chunk_index,
            size,
            status: ChunkStatus::Pending,
            content_hash: None,
            blob_path: None,
            uploaded_at: None,
        }
    }
}

/// Outcome of the conditional pending->uploaded chunk transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkMark {
    /// This call performed the transition.
    Marked,
    /// The chunk was already uploaded; its stored digest is returned.
    AlreadyUploaded { content_hash: Option<String> },
}

/// Request to start a chunked upload
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct InitUploadRequest {
    pub owner_id: Uuid,
    #[validate(length(
        min = 1,
        max = 255,
        message = "Filename must be between 1 and 255 characters"
    ))]
    pub file_name: String,
    #[validate(range(min = 1, message = "File size must be at least 1 byte"))]
    pub file_size: u64,
    #[validate(length(
        min = 1,
        max = 255,
        message = "Content type must be between 1 and 255 characters"
    ))]
    pub content_type: String,
    pub content_hash: String,
    pub chunk_size: u64,
    #[serde(default)]
    pub folder_id: Option<Uuid>,
    #[serde(default)]
    pub access_level: AccessLevel,
    #[serde(default)]
    pub channel_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitUploadResponse {
    pub session_id: Uuid,
    pub total_chunks: i32,
    pub chunk_size: i64,
    pub status: SessionStatus,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionProgress {
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub progress: f64,
    pub uploaded_chunks: i32,
    pub total_chunks: i32,
    pub expires_at: DateTime<Utc>,
    pub file_id: Option<Uuid>,
}

/// Result of one PutChunk call.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkReceipt {
    pub chunk_index: i32,
    /// True when the chunk had already been stored with the same digest.
    pub duplicate: bool,
    pub progress: SessionProgress,
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn chunk_arithmetic_for_partial_last_chunk() {
        let size = 5 * MIB / 2;
        assert_eq!(total_chunk_count(size, MIB), 3);
        assert_eq!(expected_chunk_size(size, MIB, 0), Some(MIB));
        assert_eq!(expected_chunk_size(size, MIB, 2), Some(MIB / 2));
        assert_eq!(expected_chunk_size(size, MIB, 3), None);
    }

    #[test]
    fn exact_multiple_has_full_last_chunk() {
        assert_eq!(total_chunk_count(4 * MIB, MIB), 4);
        assert_eq!(expected_chunk_size(4 * MIB, MIB, 3), Some(MIB));
    }

    #[test]
    fn status_transitions() {
        use SessionStatus::*;
        assert!(Pending.can_transition_to(Uploading));
        assert!(Uploading.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Completed));
        assert!(Pending.can_transition_to(Failed));
        assert!(Uploading.can_transition_to(Failed));
        assert!(!Uploading.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Uploading));
        assert_eq!("uploading".parse::<SessionStatus>().unwrap(), Uploading);
        assert!("done".parse::<SessionStatus>().is_err());
    }
}
