use crate::keys::validate_key;
use crate::traits::{ByteStream, Storage, StorageError, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt};
use uuid::Uuid;

/// Local filesystem storage implementation
#[derive(Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
    /// Base URL the directory is published under, if any.
    base_url: Option<String>,
}

impl LocalStorage {
    /// Create a new LocalStorage instance
    ///
    /// # Arguments
    /// * `base_path` - Root directory for file storage (e.g., "/var/lib/hoard/files")
    /// * `base_url` - Base URL for serving files directly (e.g., "http://localhost:3000/static");
    ///   without one, files are only reachable through the proxy
    pub async fn new(base_path: impl Into<PathBuf>, base_url: Option<String>) -> StorageResult<Self> {
        let base_path = base_path.into();

        fs::create_dir_all(&base_path).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create storage directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        Ok(LocalStorage {
            base_path,
            base_url: base_url.filter(|u| !u.trim().is_empty()),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Convert storage key to filesystem path with security validation
    fn key_to_path(&self, storage_key: &str) -> StorageResult<PathBuf> {
        validate_key(storage_key)?;

        let path = self.base_path.join(storage_key);

        let base_canonical = self.base_path.canonicalize().map_err(|e| {
            StorageError::ConfigError(format!("Failed to canonicalize base path: {}", e))
        })?;

        // Symlinks inside the root must not lead outside it.
        if let Ok(canonical) = path.canonicalize() {
            if canonical.strip_prefix(&base_canonical).is_err() {
                return Err(StorageError::InvalidKey(
                    "Storage key resolves outside storage directory".to_string(),
                ));
            }
        }

        Ok(path)
    }

    /// Ensure parent directory exists
    async fn ensure_parent_dir(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Sibling temp path; writes land there first and are renamed into place.
    fn temp_path_for(path: &Path) -> PathBuf {
        let mut name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(format!(".{}.tmp", Uuid::new_v4().simple()));
        path.with_file_name(name)
    }

    async fn commit_temp(&self, temp: &Path, path: &Path) -> StorageResult<()> {
        if let Err(e) = fs::rename(temp, path).await {
            let _ = fs::remove_file(temp).await;
            return Err(StorageError::UploadFailed(format!(
                "Failed to move {} into place: {}",
                path.display(),
                e
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn put(&self, key: &str, data: Bytes, _content_type: &str) -> StorageResult<()> {
        let path = self.key_to_path(key)?;
        let size = data.len();

        self.ensure_parent_dir(&path).await?;

        let start = std::time::Instant::now();
        let temp = Self::temp_path_for(&path);

        let mut file = fs::File::create(&temp).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to create file {}: {}", temp.display(), e))
        })?;

        file.write_all(&data).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to write file {}: {}", temp.display(), e))
        })?;

        file.sync_all().await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to sync file {}: {}", temp.display(), e))
        })?;
        drop(file);

        self.commit_temp(&temp, &path).await?;

        tracing::info!(
            path = %path.display(),
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage put successful"
        );

        Ok(())
    }

    async fn put_stream(
        &self,
        key: &str,
        _content_type: &str,
        mut reader: Pin<Box<dyn AsyncRead + Send + Unpin>>,
    ) -> StorageResult<u64> {
        let path = self.key_to_path(key)?;
        let start = std::time::Instant::now();

        self.ensure_parent_dir(&path).await?;
        let temp = Self::temp_path_for(&path);

        let mut file = fs::File::create(&temp).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to create file {}: {}", temp.display(), e))
        })?;

        let bytes_copied = match tokio::io::copy(&mut reader, &mut file).await {
            Ok(n) => n,
            Err(e) => {
                drop(file);
                let _ = fs::remove_file(&temp).await;
                return Err(StorageError::UploadFailed(format!(
                    "Failed to write stream to file {}: {}",
                    temp.display(),
                    e
                )));
            }
        };

        file.sync_all().await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to sync file {}: {}", temp.display(), e))
        })?;
        drop(file);

        self.commit_temp(&temp, &path).await?;

        tracing::info!(
            path = %path.display(),
            key = %key,
            size_bytes = bytes_copied,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage stream put successful"
        );

        Ok(bytes_copied)
    }

    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        let path = self.key_to_path(key)?;
        let start = std::time::Instant::now();

        let file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => {
                return Err(StorageError::DownloadFailed(format!(
                    "Failed to open file {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let key = key.to_string();
        let path_display = path.display().to_string();
        let stream = tokio_util::io::ReaderStream::new(file).map(move |item| {
            item.map_err(|e| {
                tracing::error!(
                    error = %e,
                    path = %path_display,
                    key = %key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Local storage stream read error"
                );
                StorageError::DownloadFailed(format!("Failed to read chunk: {}", e))
            })
        });

        Ok(Box::pin(stream))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.key_to_path(key)?;
        let start = std::time::Instant::now();

        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                tracing::error!(
                    error = %e,
                    path = %path.display(),
                    key = %key,
                    "Local storage delete failed"
                );
                return Err(StorageError::DeleteFailed(format!(
                    "Failed to delete file {}: {}",
                    path.display(),
                    e
                )));
            }
        }

        tracing::info!(
            path = %path.display(),
            key = %key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage delete successful"
        );

        Ok(())
    }

    fn public_url(&self, key: &str) -> Option<String> {
        self.base_url
            .as_ref()
            .map(|base| format!("{}/{}", base.trim_end_matches('/'), key))
    }

    async fn presigned_url(&self, key: &str, _expires_in: Duration) -> StorageResult<String> {
        self.key_to_path(key)?;
        self.public_url(key).ok_or_else(|| {
            StorageError::ConfigError("local channel has no base URL to sign".to_string())
        })
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }
}

#[cfg(all(test, feature = "storage-local"))]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn read_all(storage: &LocalStorage, key: &str) -> Vec<u8> {
        let mut stream = storage.get_stream(key).await.unwrap();
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_local_storage_put_read() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), Some("http://localhost:3000/static".into()))
            .await
            .unwrap();

        storage
            .put("files/a/b.txt", Bytes::from_static(b"test data"), "text/plain")
            .await
            .unwrap();

        assert_eq!(read_all(&storage, "files/a/b.txt").await, b"test data");
        assert_eq!(
            storage.public_url("files/a/b.txt").as_deref(),
            Some("http://localhost:3000/static/files/a/b.txt")
        );
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), None).await.unwrap();

        let result = storage.get_stream("../../../etc/passwd").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));

        let result = storage.delete("../etc/passwd").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));

        let result = storage
            .put("/etc/passwd", Bytes::from_static(b"x"), "text/plain")
            .await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), None).await.unwrap();

        assert!(storage.delete("nonexistent/file.txt").await.is_ok());
        assert!(storage.public_url("x").is_none());
        assert!(storage.presigned_url("x", Duration::from_secs(1)).await.is_err());
    }

    #[tokio::test]
    async fn test_stream_put_and_stream_get() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), None).await.unwrap();

        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 256) as u8).collect();
        let reader = Box::pin(std::io::Cursor::new(data.clone()))
            as Pin<Box<dyn AsyncRead + Send + Unpin>>;
        let written = storage
            .put_stream("files/big.bin", "application/octet-stream", reader)
            .await
            .unwrap();
        assert_eq!(written, data.len() as u64);

        let mut stream = storage.get_stream("files/big.bin").await.unwrap();
        let mut downloaded = Vec::new();
        while let Some(chunk) = stream.next().await {
            downloaded.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(downloaded, data);

        // no temp files left behind
        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("files"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), None).await.unwrap();

        assert!(matches!(
            storage.get_stream("files/missing").await,
            Err(StorageError::NotFound(_))
        ));
    }
}
