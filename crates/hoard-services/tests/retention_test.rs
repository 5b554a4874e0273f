//! Deduplication, instant upload and retention integration tests.
//!
//! Run with: `cargo test -p hoard-services --test retention_test`

mod helpers;

use bytes::Bytes;
use chrono::Duration;
use futures::TryStreamExt;
use hoard_core::models::file::{AccessLevel, FileStatus, InstantUploadRequest};
use hoard_core::models::upload::SessionStatus;
use hoard_core::{AppError, Clock, ContentHasher};
use hoard_db::DependentKind;
use hoard_services::{DeduplicationIndex, DuplicateTarget};
use uuid::Uuid;

use helpers::fixtures::payload;
use helpers::{eventually, files_under, init_request, setup, upload, SMALL_CHUNK};

fn instant_request(owner_id: Uuid, data: &[u8], file_name: &str) -> InstantUploadRequest {
    InstantUploadRequest {
        owner_id,
        content_hash: ContentHasher::digest(data),
        file_size: data.len() as u64,
        file_name: file_name.to_string(),
        folder_id: None,
        access_level: AccessLevel::Private,
    }
}

#[tokio::test]
async fn second_upload_of_same_content_shares_bytes() {
    let t = setup().await;
    let owner = Uuid::new_v4();
    let data = payload(10, 1);

    let first = upload(&t.hoard, owner, "a.bin", "application/octet-stream", &data).await;
    let second = upload(&t.hoard, owner, "a.bin", "application/octet-stream", &data).await;

    assert_ne!(first.id, second.id);
    assert_eq!(first.original_file_id, None);
    assert_eq!(second.original_file_id, Some(first.id));
    assert_eq!(second.name, "a_20261019093000.bin");
    assert_eq!(t.files.len(), 2);
    assert_eq!(files_under(&t.objects_path).len(), 1);

    // Another owner's identical upload is stored separately.
    let foreign = upload(
        &t.hoard,
        Uuid::new_v4(),
        "a.bin",
        "application/octet-stream",
        &data,
    )
    .await;
    assert_eq!(foreign.original_file_id, None);
    assert_eq!(files_under(&t.objects_path).len(), 2);
}

#[tokio::test]
async fn instant_upload_precheck_and_link() {
    let t = setup().await;
    let owner = Uuid::new_v4();
    let data = payload(10, 2);
    let hash = ContentHasher::digest(&data);
    let stored = upload(&t.hoard, owner, "a.bin", "application/octet-stream", &data).await;

    let summary = t
        .hoard
        .precheck_instant_upload(owner, &hash.to_uppercase(), data.len() as u64)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.id, stored.id);
    assert_eq!(summary.size, 10);

    assert!(t
        .hoard
        .precheck_instant_upload(owner, &hash, 11)
        .await
        .unwrap()
        .is_none());
    assert!(t
        .hoard
        .precheck_instant_upload(Uuid::new_v4(), &hash, 10)
        .await
        .unwrap()
        .is_none());

    let linked = t
        .hoard
        .instant_upload(instant_request(owner, &data, "a.bin"))
        .await
        .unwrap();
    assert_eq!(linked.name, "a_20261019093000.bin");
    assert_eq!(linked.original_file_id, Some(stored.id));
    assert_eq!(linked.content_hash, hash);
    assert_eq!(files_under(&t.objects_path).len(), 1);

    let err = t
        .hoard
        .instant_upload(instant_request(owner, b"never stored", "b.bin"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    let err = t
        .hoard
        .instant_upload(instant_request(Uuid::new_v4(), &data, "a.bin"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn shared_bytes_outlive_the_canonical_record() {
    let t = setup().await;
    let owner = Uuid::new_v4();
    let data = payload(10, 3);
    let canonical = upload(&t.hoard, owner, "a.bin", "application/octet-stream", &data).await;
    let duplicate = t
        .hoard
        .instant_upload(instant_request(owner, &data, "copy.bin"))
        .await
        .unwrap();

    t.hoard.delete_file(owner, canonical.id).await.unwrap();
    let err = t.hoard.describe_file(owner, canonical.id).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    t.hoard.reaper().cascade(canonical.id).await.unwrap();
    eventually(|| t.files.all().iter().all(|f| f.id != canonical.id)).await;
    assert_eq!(files_under(&t.objects_path).len(), 1);

    let opened = t.hoard.open_file(owner, duplicate.id).await.unwrap();
    let parts: Vec<Bytes> = opened.stream.try_collect().await.unwrap();
    assert_eq!(parts.concat(), data);

    // Last reference gone: bytes go with it.
    t.hoard.delete_file(owner, duplicate.id).await.unwrap();
    t.hoard.reaper().cascade(duplicate.id).await.unwrap();
    eventually(|| t.files.is_empty() && files_under(&t.objects_path).is_empty()).await;
}

fn duplicate_target(owner_id: Uuid, file_name: &str) -> DuplicateTarget {
    DuplicateTarget {
        owner_id,
        file_name: file_name.to_string(),
        folder_id: None,
        access_level: AccessLevel::Private,
    }
}

async fn read_file(t: &helpers::TestHoard, owner_id: Uuid, file_id: Uuid) -> Vec<u8> {
    let opened = t.hoard.open_file(owner_id, file_id).await.unwrap();
    let parts: Vec<Bytes> = opened.stream.try_collect().await.unwrap();
    parts.concat()
}

#[tokio::test]
async fn link_is_refused_once_the_original_is_gone() {
    let t = setup().await;
    let owner = Uuid::new_v4();
    let data = payload(10, 10);
    let hash = ContentHasher::digest(&data);
    let original = upload(&t.hoard, owner, "a.bin", "application/octet-stream", &data).await;
    let index = DeduplicationIndex::new(t.files.clone(), t.clock.clone());

    // Lookup, then the owner deletes the record and its cascade runs.
    let found = index.find_by_content_hash(owner, &hash).await.unwrap().unwrap();
    assert_eq!(found.id, original.id);
    t.hoard.delete_file(owner, original.id).await.unwrap();
    t.hoard.reaper().cascade(original.id).await.unwrap();
    eventually(|| t.files.is_empty() && files_under(&t.objects_path).is_empty()).await;

    let linked = index
        .link_duplicate(&found, duplicate_target(owner, "late.bin"))
        .await
        .unwrap();
    assert!(linked.is_none());
    assert!(t.files.is_empty());

    let err = t
        .hoard
        .instant_upload(instant_request(owner, &data, "late.bin"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    // The next upload stores the bytes again instead of linking.
    let fresh = upload(&t.hoard, owner, "a.bin", "application/octet-stream", &data).await;
    assert_eq!(fresh.original_file_id, None);
    assert_eq!(read_file(&t, owner, fresh.id).await, data);
}

#[tokio::test]
async fn stale_lookup_links_to_a_surviving_copy() {
    let t = setup().await;
    let owner = Uuid::new_v4();
    let data = payload(10, 11);
    let hash = ContentHasher::digest(&data);
    let original = upload(&t.hoard, owner, "a.bin", "application/octet-stream", &data).await;
    let copy = t
        .hoard
        .instant_upload(instant_request(owner, &data, "copy.bin"))
        .await
        .unwrap();
    let index = DeduplicationIndex::new(t.files.clone(), t.clock.clone());

    let found = index.find_by_content_hash(owner, &hash).await.unwrap().unwrap();
    assert_eq!(found.id, original.id);
    t.hoard.delete_file(owner, original.id).await.unwrap();
    t.hoard.reaper().cascade(original.id).await.unwrap();
    eventually(|| t.files.len() == 1).await;

    assert!(index
        .link_duplicate(&found, duplicate_target(owner, "late.bin"))
        .await
        .unwrap()
        .is_none());
    let linked = index
        .link_to_live(&hash, data.len() as u64, duplicate_target(owner, "late.bin"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(linked.original_file_id, Some(copy.id));

    // The copy goes too; the late record still holds the bytes.
    t.hoard.delete_file(owner, copy.id).await.unwrap();
    t.hoard.reaper().cascade(copy.id).await.unwrap();
    eventually(|| t.files.len() == 1).await;
    assert_eq!(files_under(&t.objects_path).len(), 1);
    assert_eq!(read_file(&t, owner, linked.id).await, data);
}

#[tokio::test]
async fn interrupted_cascade_resumes_on_sweep() {
    let t = setup().await;
    let owner = Uuid::new_v4();
    let data = payload(10, 4);
    let file = upload(&t.hoard, owner, "a.bin", "application/octet-stream", &data).await;
    t.dependents.add(DependentKind::Tags, file.id);
    t.dependents.add(DependentKind::Stats, file.id);
    t.dependents.add(DependentKind::AccessLogs, file.id);

    t.dependents.set_failure(Some(DependentKind::Stats));
    t.hoard.delete_file(owner, file.id).await.unwrap();

    assert!(t.hoard.reaper().cascade(file.id).await.is_err());
    assert_eq!(t.dependents.count(DependentKind::Tags, file.id), 0);
    assert_eq!(t.dependents.count(DependentKind::Stats, file.id), 1);
    assert_eq!(t.dependents.count(DependentKind::AccessLogs, file.id), 1);
    let err = t.hoard.describe_file(owner, file.id).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    // Still inside the grace period: the sweep leaves it alone.
    t.hoard.sweep().await.unwrap();
    let record = t.files.all().into_iter().find(|f| f.id == file.id).unwrap();
    assert_eq!(record.status, FileStatus::PendingDeletion);
    assert_eq!(files_under(&t.objects_path).len(), 1);

    t.dependents.set_failure(None);
    t.clock.advance(Duration::seconds(601));
    t.hoard.sweep().await.unwrap();

    eventually(|| t.files.is_empty() && files_under(&t.objects_path).is_empty()).await;
    assert_eq!(t.dependents.total_for_file(file.id), 0);
}

#[tokio::test]
async fn expired_files_are_swept() {
    let t = setup().await;
    let owner = Uuid::new_v4();
    let keep = upload(
        &t.hoard,
        owner,
        "keep.bin",
        "application/octet-stream",
        &payload(10, 5),
    )
    .await;
    let file = upload(
        &t.hoard,
        owner,
        "temp.bin",
        "application/octet-stream",
        &payload(10, 6),
    )
    .await;

    t.hoard
        .set_file_expiry(owner, file.id, Some(t.clock.now() + Duration::hours(1)))
        .await
        .unwrap();
    t.clock.advance(Duration::hours(2));

    let report = t.hoard.sweep().await.unwrap();
    assert_eq!(report.expired_files, 1);
    assert_eq!(report.cascade_failures, 0);

    eventually(|| t.files.len() == 1 && files_under(&t.objects_path).len() == 1).await;
    assert!(t.hoard.describe_file(owner, keep.id).await.is_ok());
    let err = t.hoard.describe_file(owner, file.id).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn clearing_expiry_keeps_the_file() {
    let t = setup().await;
    let owner = Uuid::new_v4();
    let file = upload(&t.hoard, owner, "a.bin", "application/octet-stream", &payload(10, 7)).await;

    t.hoard
        .set_file_expiry(owner, file.id, Some(t.clock.now() + Duration::hours(1)))
        .await
        .unwrap();
    t.hoard.set_file_expiry(owner, file.id, None).await.unwrap();
    t.clock.advance(Duration::hours(2));

    let report = t.hoard.sweep().await.unwrap();
    assert_eq!(report.expired_files, 0);
    assert!(t.hoard.describe_file(owner, file.id).await.is_ok());
}

#[tokio::test]
async fn abandoned_sessions_are_failed_then_forgotten() {
    let t = setup().await;
    let data = payload(12, 8);
    let init = t
        .hoard
        .init_upload(init_request(
            Uuid::new_v4(),
            "a.bin",
            "application/octet-stream",
            &data,
            SMALL_CHUNK,
        ))
        .await
        .unwrap();
    t.hoard
        .put_chunk(
            init.session_id,
            0,
            &ContentHasher::digest(&data[..4]),
            Bytes::copy_from_slice(&data[..4]),
        )
        .await
        .unwrap();
    let session_dir = t.scratch_path.join(init.session_id.to_string());
    assert!(session_dir.exists());

    // A live session keeps its scratch.
    let report = t.hoard.sweep().await.unwrap();
    assert_eq!(report.sessions_failed, 0);
    assert!(session_dir.exists());

    t.clock.advance(Duration::seconds(86_401));
    let report = t.hoard.sweep().await.unwrap();
    assert_eq!(report.sessions_failed, 1);
    assert!(!session_dir.exists());
    assert_eq!(
        t.hoard.upload_status(init.session_id).await.unwrap().status,
        SessionStatus::Failed
    );

    t.clock.advance(Duration::seconds(86_401));
    let report = t.hoard.sweep().await.unwrap();
    assert_eq!(report.sessions_deleted, 1);
    let err = t.hoard.upload_status(init.session_id).await.unwrap_err();
    assert!(matches!(err, AppError::SessionNotFound(_)));
}

#[tokio::test]
async fn delete_requires_ownership() {
    let t = setup().await;
    let owner = Uuid::new_v4();
    let file = upload(&t.hoard, owner, "a.bin", "application/octet-stream", &payload(10, 9)).await;

    let err = t.hoard.delete_file(Uuid::new_v4(), file.id).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    let record = t.files.all().into_iter().next().unwrap();
    assert_eq!(record.status, FileStatus::Normal);
    assert!(t.hoard.describe_file(owner, file.id).await.is_ok());
}
