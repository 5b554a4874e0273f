//! Row decoding shared by the Pg repositories.
//!
//! Status-like columns are TEXT with CHECK constraints; they are parsed into
//! the closed enums here so an unknown value is a decode error, not a silent default.

use std::str::FromStr;

use hoard_core::models::channel::{ChannelConfigItem, StorageChannel};
use hoard_core::models::file::FileRecord;
use hoard_core::models::upload::{UploadChunk, UploadSession};
use sqlx::postgres::PgRow;
use sqlx::Row;

pub(crate) const SESSION_COLUMNS: &str = "id, owner_id, file_name, file_size, content_type, content_hash, \
     chunk_size, total_chunks, uploaded_chunks, status, folder_id, access_level, channel_id, \
     file_id, error_message, merge_claimed_at, expires_at, created_at, updated_at";

pub(crate) const CHUNK_COLUMNS: &str =
    "session_id, chunk_index, size, status, content_hash, blob_path, uploaded_at";

pub(crate) const FILE_COLUMNS: &str = "id, owner_id, display_name, original_name, size, width, height, \
     format, content_type, access_level, channel_id, object_path, thumbnail_path, content_hash, \
     original_file_id, folder_id, status, expires_at, deleted_at, created_at, updated_at";

pub(crate) const CHANNEL_COLUMNS: &str = "id, name, backend, is_default, enabled, builtin, \
     hide_remote_url, custom_domain, signed_urls, created_at, updated_at";

fn parse_column<T>(row: &PgRow, column: &str) -> Result<T, sqlx::Error>
where
    T: FromStr<Err = anyhow::Error>,
{
    let raw: String = row.try_get(column)?;
    raw.parse::<T>().map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: e.into(),
    })
}

pub(crate) fn session_from_row(row: &PgRow) -> Result<UploadSession, sqlx::Error> {
    Ok(UploadSession {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        file_name: row.try_get("file_name")?,
        file_size: row.try_get("file_size")?,
        content_type: row.try_get("content_type")?,
        content_hash: row.try_get("content_hash")?,
        chunk_size: row.try_get("chunk_size")?,
        total_chunks: row.try_get("total_chunks")?,
        uploaded_chunks: row.try_get("uploaded_chunks")?,
        status: parse_column(row, "status")?,
        folder_id: row.try_get("folder_id")?,
        access_level: parse_column(row, "access_level")?,
        channel_id: row.try_get("channel_id")?,
        file_id: row.try_get("file_id")?,
        error_message: row.try_get("error_message")?,
        merge_claimed_at: row.try_get("merge_claimed_at")?,
        expires_at: row.try_get("expires_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub(crate) fn chunk_from_row(row: &PgRow) -> Result<UploadChunk, sqlx::Error> {
    Ok(UploadChunk {
        session_id: row.try_get("session_id")?,
        chunk_index: row.try_get("chunk_index")?,
        size: row.try_get("size")?,
        status: parse_column(row, "status")?,
        content_hash: row.try_get("content_hash")?,
        blob_path: row.try_get("blob_path")?,
        uploaded_at: row.try_get("uploaded_at")?,
    })
}

pub(crate) fn file_from_row(row: &PgRow) -> Result<FileRecord, sqlx::Error> {
    Ok(FileRecord {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        display_name: row.try_get("display_name")?,
        original_name: row.try_get("original_name")?,
        size: row.try_get("size")?,
        width: row.try_get("width")?,
        height: row.try_get("height")?,
        format: row.try_get("format")?,
        content_type: row.try_get("content_type")?,
        access_level: parse_column(row, "access_level")?,
        channel_id: row.try_get("channel_id")?,
        object_path: row.try_get("object_path")?,
        thumbnail_path: row.try_get("thumbnail_path")?,
        content_hash: row.try_get("content_hash")?,
        original_file_id: row.try_get("original_file_id")?,
        folder_id: row.try_get("folder_id")?,
        status: parse_column(row, "status")?,
        expires_at: row.try_get("expires_at")?,
        deleted_at: row.try_get("deleted_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Channel attributes; configuration items are loaded separately.
pub(crate) fn channel_from_row(row: &PgRow) -> Result<StorageChannel, sqlx::Error> {
    Ok(StorageChannel {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        backend: parse_column(row, "backend")?,
        is_default: row.try_get("is_default")?,
        enabled: row.try_get("enabled")?,
        builtin: row.try_get("builtin")?,
        hide_remote_url: row.try_get("hide_remote_url")?,
        custom_domain: row.try_get("custom_domain")?,
        signed_urls: row.try_get("signed_urls")?,
        config: Vec::new(),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub(crate) fn config_item_from_row(row: &PgRow) -> Result<ChannelConfigItem, sqlx::Error> {
    Ok(ChannelConfigItem {
        key: row.try_get("key")?,
        value: row.try_get("value")?,
        secret: row.try_get("secret")?,
    })
}
