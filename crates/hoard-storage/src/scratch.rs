//! Scratch area for chunk blobs.
//!
//! Every session owns one directory `{root}/{session_id}/`. Chunk bytes are
//! written to a unique file per submission (`{index}.{nonce}.part`) so that two
//! racing submissions of the same index never write to the same path; the one
//! that loses the conditional chunk transition removes its own file.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::{StorageError, StorageResult};

#[derive(Debug, Clone)]
pub struct ScratchSpace {
    root: PathBuf,
}

impl ScratchSpace {
    pub async fn new(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create scratch directory {}: {}",
                root.display(),
                e
            ))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session_dir(&self, session_id: Uuid) -> PathBuf {
        self.root.join(session_id.to_string())
    }

    /// Reserve the session directory.
    pub async fn prepare(&self, session_id: Uuid) -> StorageResult<PathBuf> {
        let dir = self.session_dir(session_id);
        fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Resolve a blob path recorded on a chunk row. Blob paths are relative to
    /// the scratch root and always `{session_id}/{file}`.
    pub fn blob_path(&self, blob: &str) -> StorageResult<PathBuf> {
        let mut parts = blob.split('/');
        let (Some(session), Some(file), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(StorageError::InvalidKey(format!("bad scratch blob path {:?}", blob)));
        };
        if Uuid::parse_str(session).is_err() || file.is_empty() || file.starts_with('.') {
            return Err(StorageError::InvalidKey(format!("bad scratch blob path {:?}", blob)));
        }
        Ok(self.root.join(session).join(file))
    }

    /// Durably write one chunk submission. Returns the relative blob path.
    pub async fn write_chunk(
        &self,
        session_id: Uuid,
        index: i32,
        data: &Bytes,
    ) -> StorageResult<String> {
        let dir = self.prepare(session_id).await?;
        let file_name = format!("{}.{}.part", index, Uuid::new_v4().simple());
        let path = dir.join(&file_name);

        let mut file = fs::File::create(&path).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to create chunk {}: {}", path.display(), e))
        })?;
        file.write_all(data).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to write chunk {}: {}", path.display(), e))
        })?;
        file.sync_all().await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to sync chunk {}: {}", path.display(), e))
        })?;

        tracing::debug!(
            session_id = %session_id,
            chunk_index = index,
            size_bytes = data.len(),
            path = %path.display(),
            "Chunk written to scratch"
        );

        Ok(format!("{}/{}", session_id, file_name))
    }

    pub async fn open_chunk(&self, blob: &str) -> StorageResult<fs::File> {
        let path = self.blob_path(blob)?;
        fs::File::open(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound(blob.to_string()),
            _ => StorageError::DownloadFailed(format!(
                "Failed to open chunk {}: {}",
                path.display(),
                e
            )),
        })
    }

    /// Remove a single submission file. Missing files are fine.
    pub async fn discard_chunk(&self, blob: &str) -> StorageResult<()> {
        let path = self.blob_path(blob)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Fresh staging file path for a merge of this session.
    pub fn staging_path(&self, session_id: Uuid) -> PathBuf {
        self.session_dir(session_id)
            .join(format!("merged.{}.bin", Uuid::new_v4().simple()))
    }

    /// Remove the whole session directory. Idempotent.
    pub async fn purge(&self, session_id: Uuid) -> StorageResult<bool> {
        let dir = self.session_dir(session_id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                tracing::info!(session_id = %session_id, path = %dir.display(), "Scratch directory removed");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Session directories currently on disk with their last modification time.
    pub async fn list_sessions(&self) -> StorageResult<Vec<(Uuid, DateTime<Utc>)>> {
        let mut entries = fs::read_dir(&self.root).await?;
        let mut sessions = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Some(session_id) = entry
                .file_name()
                .to_str()
                .and_then(|name| Uuid::parse_str(name).ok())
            else {
                continue;
            };
            let meta = entry.metadata().await?;
            if !meta.is_dir() {
                continue;
            }
            let modified = meta
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            sessions.push((session_id, modified));
        }
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn racing_writes_get_distinct_blobs() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchSpace::new(dir.path()).await.unwrap();
        let session = Uuid::new_v4();

        let a = scratch
            .write_chunk(session, 0, &Bytes::from_static(b"aaaa"))
            .await
            .unwrap();
        let b = scratch
            .write_chunk(session, 0, &Bytes::from_static(b"bbbb"))
            .await
            .unwrap();
        assert_ne!(a, b);

        scratch.discard_chunk(&b).await.unwrap();
        let mut buf = Vec::new();
        scratch
            .open_chunk(&a)
            .await
            .unwrap()
            .read_to_end(&mut buf)
            .await
            .unwrap();
        assert_eq!(buf, b"aaaa");
        assert!(matches!(
            scratch.open_chunk(&b).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn purge_is_idempotent_and_listing_sees_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchSpace::new(dir.path()).await.unwrap();
        let session = Uuid::new_v4();
        scratch.prepare(session).await.unwrap();
        std::fs::create_dir(dir.path().join("not-a-session")).unwrap();

        let listed = scratch.list_sessions().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].0, session);

        assert!(scratch.purge(session).await.unwrap());
        assert!(!scratch.purge(session).await.unwrap());
        assert!(scratch.list_sessions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn blob_paths_cannot_escape_root() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchSpace::new(dir.path()).await.unwrap();

        assert!(scratch.blob_path("../etc/passwd").is_err());
        assert!(scratch.blob_path(&format!("{}/../../x", Uuid::new_v4())).is_err());
        assert!(scratch.blob_path(&format!("{}/0.abc.part", Uuid::new_v4())).is_ok());
    }
}
