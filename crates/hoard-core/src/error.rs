//! Error types module
//!
//! All failures that cross a component boundary are unified under [`AppError`].
//! Each variant belongs to one [`ErrorKind`] so that callers (an HTTP layer, the
//! CLI, the worker pool) can decide whether to retry, report or fix the request
//! without matching on individual variants.
//!
//! The `Database` variant carries the sqlx error when the `sqlx` feature is on.

use std::io;

#[cfg(feature = "sqlx")]
use sqlx::Error as SqlxError;
use uuid::Uuid;

use crate::models::upload::SessionStatus;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors like validation failures
    Debug,
    /// Warning level - for recoverable issues like quota or state conflicts
    Warn,
    /// Error level - for unexpected failures
    Error,
}

/// Coarse error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad size, type or parameter. The client must fix the request.
    Validation,
    /// Session, file or channel absent.
    NotFound,
    /// State-machine violation.
    Conflict,
    /// Hash mismatch at chunk or whole-file level.
    Integrity,
    /// Storage or size limits.
    Quota,
    /// The chosen storage channel is unreachable or misconfigured.
    Backend,
    Internal,
}

/// Metadata for error responses - defines how an error should be presented
pub trait ErrorMetadata {
    /// HTTP status code an outer layer should return
    fn http_status_code(&self) -> u16;

    /// Machine-readable error code (e.g., "HASH_MISMATCH")
    fn error_code(&self) -> &'static str;

    /// Whether retrying the same request can succeed
    fn is_recoverable(&self) -> bool;

    /// Suggested action for the client
    fn suggested_action(&self) -> Option<&'static str>;

    /// Client-facing message (may differ from internal error message)
    fn client_message(&self) -> String;

    /// Whether details should be hidden from clients
    fn is_sensitive(&self) -> bool;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[source] SqlxError),

    #[cfg(not(feature = "sqlx"))]
    #[error("Database error: {0}")]
    Database(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Storage channel unavailable: {0}")]
    ChannelUnavailable(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid chunk size {chunk_size}: must be between {min} and {max} bytes")]
    InvalidChunkSize { chunk_size: u64, min: u64, max: u64 },

    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("Chunk index {index} out of range (session has {total} chunks)")]
    ChunkIndexOutOfRange { index: i32, total: i32 },

    #[error("Chunk {index} size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        index: i32,
        expected: i64,
        actual: i64,
    },

    #[error("File too large: {size} bytes exceeds maximum of {max} bytes")]
    PayloadTooLarge { size: u64, max: u64 },

    #[error("Storage quota exceeded: {used} bytes used, {requested} requested, limit {limit}")]
    QuotaExceeded { used: u64, requested: u64, limit: u64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Upload session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("Upload session expired: {0}")]
    SessionExpired(Uuid),

    #[error("Upload session {session_id} is {status}")]
    SessionNotActive {
        session_id: Uuid,
        status: SessionStatus,
    },

    #[error("Chunk {index} was already uploaded with different content")]
    ChunkConflict { index: i32 },

    #[error("Upload incomplete: {uploaded} of {total} chunks uploaded")]
    IncompleteUpload { uploaded: i32, total: i32 },

    #[error("Merge already in progress for session {0}")]
    MergeInProgress(Uuid),

    #[error("Storage channel is protected: {0}")]
    ChannelProtected(String),

    #[error("Content {content_hash} already has a canonical record for owner {owner_id}")]
    DuplicateContent { owner_id: Uuid, content_hash: String },

    #[error("Chunk {index} hash mismatch: declared {declared}, computed {computed}")]
    HashMismatch {
        index: i32,
        declared: String,
        computed: String,
    },

    #[error("Integrity check failed: declared {declared}, computed {computed}")]
    IntegrityCheckFailed { declared: String, computed: String },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Internal error with source")]
    InternalWithSource {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

#[cfg(feature = "sqlx")]
impl From<SqlxError> for AppError {
    fn from(err: SqlxError) -> Self {
        AppError::Database(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::InternalWithSource {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        AppError::Internal(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidInput(format!("JSON parsing error: {}", err))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::InvalidInput(format!("Validation error: {}", err))
    }
}

/// Static metadata for each variant: (kind, http_status, error_code, recoverable, suggested_action, sensitive, log_level).
fn app_error_static_metadata(
    err: &AppError,
) -> (
    ErrorKind,
    u16,
    &'static str,
    bool,
    Option<&'static str>,
    bool,
    LogLevel,
) {
    match err {
        AppError::Database(_) => (
            ErrorKind::Internal,
            500,
            "DATABASE_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
        AppError::Storage(_) => (
            ErrorKind::Backend,
            502,
            "STORAGE_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
        AppError::ChannelUnavailable(_) => (
            ErrorKind::Backend,
            503,
            "CHANNEL_UNAVAILABLE",
            true,
            Some("Storage is temporarily unavailable; retry later"),
            true,
            LogLevel::Error,
        ),
        AppError::InvalidInput(_) => (
            ErrorKind::Validation,
            400,
            "INVALID_INPUT",
            false,
            Some("Check request parameters and try again"),
            false,
            LogLevel::Debug,
        ),
        AppError::InvalidChunkSize { .. } => (
            ErrorKind::Validation,
            400,
            "INVALID_CHUNK_SIZE",
            false,
            Some("Choose a chunk size inside the allowed bounds"),
            false,
            LogLevel::Debug,
        ),
        AppError::UnsupportedMediaType(_) => (
            ErrorKind::Validation,
            415,
            "UNSUPPORTED_MEDIA_TYPE",
            false,
            Some("Upload a file of an allowed type"),
            false,
            LogLevel::Debug,
        ),
        AppError::ChunkIndexOutOfRange { .. } => (
            ErrorKind::Validation,
            400,
            "CHUNK_INDEX_OUT_OF_RANGE",
            false,
            Some("Use a chunk index between 0 and total_chunks - 1"),
            false,
            LogLevel::Debug,
        ),
        AppError::SizeMismatch { .. } => (
            ErrorKind::Validation,
            400,
            "CHUNK_SIZE_MISMATCH",
            true,
            Some("Re-send this chunk with the expected number of bytes"),
            false,
            LogLevel::Debug,
        ),
        AppError::PayloadTooLarge { .. } => (
            ErrorKind::Quota,
            413,
            "PAYLOAD_TOO_LARGE",
            false,
            Some("Reduce file size"),
            false,
            LogLevel::Debug,
        ),
        AppError::QuotaExceeded { .. } => (
            ErrorKind::Quota,
            507,
            "QUOTA_EXCEEDED",
            false,
            Some("Delete files to free up storage"),
            false,
            LogLevel::Warn,
        ),
        AppError::NotFound(_) => (
            ErrorKind::NotFound,
            404,
            "NOT_FOUND",
            false,
            Some("Verify the resource ID exists"),
            false,
            LogLevel::Debug,
        ),
        AppError::SessionNotFound(_) => (
            ErrorKind::NotFound,
            404,
            "SESSION_NOT_FOUND",
            false,
            Some("Start a new upload session"),
            false,
            LogLevel::Debug,
        ),
        AppError::SessionExpired(_) => (
            ErrorKind::Conflict,
            410,
            "SESSION_EXPIRED",
            false,
            Some("Start a new upload session"),
            false,
            LogLevel::Debug,
        ),
        AppError::SessionNotActive { .. } => (
            ErrorKind::Conflict,
            409,
            "SESSION_NOT_ACTIVE",
            false,
            Some("Start a new upload session"),
            false,
            LogLevel::Debug,
        ),
        AppError::ChunkConflict { .. } => (
            ErrorKind::Conflict,
            409,
            "CHUNK_CONFLICT",
            false,
            Some("Chunk already stored with different content; start a new session"),
            false,
            LogLevel::Warn,
        ),
        AppError::IncompleteUpload { .. } => (
            ErrorKind::Conflict,
            409,
            "UPLOAD_INCOMPLETE",
            true,
            Some("Upload the missing chunks before completing"),
            false,
            LogLevel::Debug,
        ),
        AppError::MergeInProgress(_) => (
            ErrorKind::Conflict,
            409,
            "MERGE_IN_PROGRESS",
            true,
            Some("Poll the session status and retry shortly"),
            false,
            LogLevel::Debug,
        ),
        AppError::ChannelProtected(_) => (
            ErrorKind::Conflict,
            409,
            "CHANNEL_PROTECTED",
            false,
            Some("Built-in and default channels cannot be deleted or disabled"),
            false,
            LogLevel::Debug,
        ),
        AppError::DuplicateContent { .. } => (
            ErrorKind::Conflict,
            409,
            "DUPLICATE_CONTENT",
            true,
            None,
            false,
            LogLevel::Debug,
        ),
        AppError::HashMismatch { .. } => (
            ErrorKind::Integrity,
            422,
            "HASH_MISMATCH",
            true,
            Some("Re-send this chunk"),
            false,
            LogLevel::Warn,
        ),
        AppError::IntegrityCheckFailed { .. } => (
            ErrorKind::Integrity,
            422,
            "INTEGRITY_CHECK_FAILED",
            false,
            Some("Start a new upload session"),
            false,
            LogLevel::Warn,
        ),
        AppError::Internal(_) => (
            ErrorKind::Internal,
            500,
            "INTERNAL_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
        AppError::InternalWithSource { .. } => (
            ErrorKind::Internal,
            500,
            "INTERNAL_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
    }
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        app_error_static_metadata(self).0
    }

    /// Get the error type name for detailed error responses
    pub fn error_type(&self) -> &str {
        match self {
            AppError::Database(_) => "Database",
            AppError::Storage(_) => "Storage",
            AppError::ChannelUnavailable(_) => "ChannelUnavailable",
            AppError::InvalidInput(_) => "InvalidInput",
            AppError::InvalidChunkSize { .. } => "InvalidChunkSize",
            AppError::UnsupportedMediaType(_) => "UnsupportedMediaType",
            AppError::ChunkIndexOutOfRange { .. } => "ChunkIndexOutOfRange",
            AppError::SizeMismatch { .. } => "SizeMismatch",
            AppError::PayloadTooLarge { .. } => "PayloadTooLarge",
            AppError::QuotaExceeded { .. } => "QuotaExceeded",
            AppError::NotFound(_) => "NotFound",
            AppError::SessionNotFound(_) => "SessionNotFound",
            AppError::SessionExpired(_) => "SessionExpired",
            AppError::SessionNotActive { .. } => "SessionNotActive",
            AppError::ChunkConflict { .. } => "ChunkConflict",
            AppError::IncompleteUpload { .. } => "IncompleteUpload",
            AppError::MergeInProgress(_) => "MergeInProgress",
            AppError::ChannelProtected(_) => "ChannelProtected",
            AppError::DuplicateContent { .. } => "DuplicateContent",
            AppError::HashMismatch { .. } => "HashMismatch",
            AppError::IntegrityCheckFailed { .. } => "IntegrityCheckFailed",
            AppError::Internal(_) | AppError::InternalWithSource { .. } => "Internal",
        }
    }

    /// Get detailed error information including error chain
    pub fn detailed_message(&self) -> String {
        use std::error::Error;

        let mut details = self.to_string();

        let mut source = self.source();
        let mut depth = 0;
        while let Some(err) = source {
            depth += 1;
            if depth > 5 {
                details.push_str("\n  ... (truncated)");
                break;
            }
            details.push_str(&format!("\n  Caused by: {}", err));
            source = err.source();
        }

        details
    }
}

impl ErrorMetadata for AppError {
    fn http_status_code(&self) -> u16 {
        app_error_static_metadata(self).1
    }

    fn error_code(&self) -> &'static str {
        app_error_static_metadata(self).2
    }

    fn is_recoverable(&self) -> bool {
        app_error_static_metadata(self).3
    }

    fn suggested_action(&self) -> Option<&'static str> {
        app_error_static_metadata(self).4
    }

    fn is_sensitive(&self) -> bool {
        app_error_static_metadata(self).5
    }

    fn log_level(&self) -> LogLevel {
        app_error_static_metadata(self).6
    }

    fn client_message(&self) -> String {
        match self {
            AppError::Database(_) => "Failed to access database".to_string(),
            AppError::Storage(_) | AppError::ChannelUnavailable(_) => {
                "Storage backend is unavailable".to_string()
            }
            AppError::Internal(_) | AppError::InternalWithSource { .. } => {
                "Internal server error".to_string()
            }
            AppError::DuplicateContent { .. } => "Content already exists".to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variants_map_to_taxonomy() {
        let id = Uuid::new_v4();
        assert_eq!(
            AppError::InvalidChunkSize {
                chunk_size: 1,
                min: 2,
                max: 3
            }
            .kind(),
            ErrorKind::Validation
        );
        assert_eq!(AppError::SessionNotFound(id).kind(), ErrorKind::NotFound);
        assert_eq!(AppError::MergeInProgress(id).kind(), ErrorKind::Conflict);
        assert_eq!(
            AppError::IncompleteUpload {
                uploaded: 1,
                total: 2
            }
            .kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            AppError::IntegrityCheckFailed {
                declared: "a".into(),
                computed: "b".into()
            }
            .kind(),
            ErrorKind::Integrity
        );
        assert_eq!(
            AppError::QuotaExceeded {
                used: 1,
                requested: 1,
                limit: 1
            }
            .kind(),
            ErrorKind::Quota
        );
        assert_eq!(
            AppError::ChannelUnavailable("s3".into()).kind(),
            ErrorKind::Backend
        );
    }

    #[test]
    fn backend_details_are_hidden_from_clients() {
        let err = AppError::Storage("connection refused at 10.0.0.3:9000".into());
        assert!(err.is_sensitive());
        assert!(!err.client_message().contains("10.0.0.3"));

        let err = AppError::HashMismatch {
            index: 3,
            declared: "aa".into(),
            computed: "bb".into(),
        };
        assert!(err.client_message().contains("Chunk 3"));
        assert_eq!(err.error_code(), "HASH_MISMATCH");
    }
}
