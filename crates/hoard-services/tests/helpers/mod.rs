//! Test helpers: a fully wired `Hoard` over in-memory repositories, a local
//! object directory and a manual clock.

#![allow(dead_code)]

pub mod fixtures;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use hoard_core::config::HoardConfig;
use hoard_core::models::file::{AccessLevel, FileDescriptor};
use hoard_core::models::upload::InitUploadRequest;
use hoard_core::{Config, ContentHasher, ManualClock};
use hoard_db::{
    MemoryChannelRepository, MemoryDependentRecordsRepository, MemoryFileRepository,
    MemoryUploadSessionRepository,
};
use hoard_services::{Hoard, HoardRepositories};
use tempfile::TempDir;
use uuid::Uuid;

/// Chunk size small enough to keep payloads tiny.
pub const SMALL_CHUNK: u64 = 4;

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 19, 9, 30, 0).unwrap()
}

pub struct TestHoard {
    pub hoard: Arc<Hoard>,
    pub sessions: Arc<MemoryUploadSessionRepository>,
    pub files: Arc<MemoryFileRepository>,
    pub channels: Arc<MemoryChannelRepository>,
    pub dependents: Arc<MemoryDependentRecordsRepository>,
    pub clock: Arc<ManualClock>,
    pub scratch_path: PathBuf,
    pub objects_path: PathBuf,
    pub _temp_dir: TempDir,
}

pub async fn setup() -> TestHoard {
    setup_with(|_| {}).await
}

/// Build a test instance, letting the caller adjust configuration first.
pub async fn setup_with(tweak: impl FnOnce(&mut HoardConfig)) -> TestHoard {
    let temp_dir = tempfile::tempdir().unwrap();
    let scratch_path = temp_dir.path().join("scratch");
    let objects_path = temp_dir.path().join("objects");

    let mut config = Config::for_local(scratch_path.clone(), objects_path.clone());
    {
        let c = config.as_hoard_mut();
        c.upload.min_chunk_size_bytes = SMALL_CHUNK;
        // Keep worker retries out of the way of assertions.
        c.worker.retry_base_delay_ms = 60_000;
        tweak(c);
    }

    let sessions = Arc::new(MemoryUploadSessionRepository::new());
    let files = Arc::new(MemoryFileRepository::new());
    let channels = Arc::new(MemoryChannelRepository::new());
    let dependents = Arc::new(MemoryDependentRecordsRepository::new());
    let repos = HoardRepositories {
        sessions: sessions.clone(),
        files: files.clone(),
        channels: channels.clone(),
        dependents: dependents.clone(),
    };

    let clock = Arc::new(ManualClock::new(start_time()));
    let hoard = Hoard::new(config, repos, clock.clone()).await.unwrap();

    TestHoard {
        hoard,
        sessions,
        files,
        channels,
        dependents,
        clock,
        scratch_path,
        objects_path,
        _temp_dir: temp_dir,
    }
}

pub fn init_request(
    owner_id: Uuid,
    file_name: &str,
    content_type: &str,
    data: &[u8],
    chunk_size: u64,
) -> InitUploadRequest {
    InitUploadRequest {
        owner_id,
        file_name: file_name.to_string(),
        file_size: data.len() as u64,
        content_type: content_type.to_string(),
        content_hash: ContentHasher::digest(data),
        chunk_size,
        folder_id: None,
        access_level: AccessLevel::Private,
        channel_id: None,
    }
}

/// Send every chunk of `data` in index order.
pub async fn put_all_chunks(hoard: &Hoard, session_id: Uuid, data: &[u8], chunk_size: u64) {
    for (index, chunk) in data.chunks(chunk_size as usize).enumerate() {
        hoard
            .put_chunk(
                session_id,
                index as i32,
                &ContentHasher::digest(chunk),
                Bytes::copy_from_slice(chunk),
            )
            .await
            .unwrap();
    }
}

/// Init, upload and complete in one go.
pub async fn upload(
    hoard: &Hoard,
    owner_id: Uuid,
    file_name: &str,
    content_type: &str,
    data: &[u8],
) -> FileDescriptor {
    let init = hoard
        .init_upload(init_request(owner_id, file_name, content_type, data, SMALL_CHUNK))
        .await
        .unwrap();
    put_all_chunks(hoard, init.session_id, data, SMALL_CHUNK).await;
    hoard.complete_upload(init.session_id).await.unwrap()
}

/// Every regular file below `root`.
pub fn files_under(root: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else {
                found.push(path);
            }
        }
    }
    found
}

/// Wait for background work (queued cascades, scratch purges) to settle.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
