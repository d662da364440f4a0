//! End-to-end reconciler scenarios against a live in-process server,
//! matching the concrete examples enumerated in the design notes: new
//! upload, unchanged, modify one chunk, shrink, download an older
//! version, and quota exceeded. Chunk and file sizes are scaled down
//! from the original MiB-scale examples while preserving the same
//! chunk-count ratios, so the suite stays fast.

mod common;

use coldstore::client::ApiClient;
use coldstore::crypto;
use coldstore::reconciler::{self, ReconcileStatus};
use common::{TestServer, TEST_PASSPHRASE, TEST_PASSWORD, TEST_USER};

async fn login(server: &TestServer) -> (ApiClient, crypto::CryptoKey) {
    let mut client = ApiClient::new(&server.base_url);
    let resp = client.login(TEST_USER, TEST_PASSWORD).await.unwrap();
    let key = crypto::derive_crypto_key(TEST_PASSPHRASE, &resp.login_salt);
    (client, key)
}

/// Scenarios 1-4: a 9-byte file under a 4-byte chunk size stands in for the
/// design notes' "9 MiB file, 4 MiB chunks -> 3 chunks" example.
#[tokio::test]
async fn new_upload_unchanged_modify_and_shrink() {
    let server = TestServer::spawn_with(10 * 1024 * 1024, 4).await;
    let (client, key) = login(&server).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.bin");
    let chunk_size = server.config.chunk_size;

    // 1. New upload.
    std::fs::write(&path, [1u8; 9]).unwrap();
    let result = reconciler::reconcile(&client, &key, &path, "a.bin", None, chunk_size, false, None)
        .await
        .unwrap();
    assert_eq!(result.status, ReconcileStatus::LocalNewer);
    assert_eq!(result.chunks_transferred, 3);

    let remote_files = client.list_files().await.unwrap();
    assert_eq!(remote_files.len(), 1);
    assert_eq!(key.decrypt_name(&remote_files[0].name).unwrap(), "a.bin");

    // 2. Unchanged: re-run sync against the untouched file.
    let result = reconciler::reconcile(&client, &key, &path, "a.bin", None, chunk_size, false, None)
        .await
        .unwrap();
    assert_eq!(result.status, ReconcileStatus::Same);
    assert_eq!(result.chunks_transferred, 0);

    // 3. Modify one chunk: overwrite the first byte, keep the same length.
    let before = client.user_stats().await.unwrap();
    std::fs::write(&path, [9u8, 1, 1, 1, 1, 1, 1, 1, 1]).unwrap();
    let result = reconciler::reconcile(&client, &key, &path, "a.bin", None, chunk_size, false, None)
        .await
        .unwrap();
    assert_eq!(result.status, ReconcileStatus::LocalNewer);
    assert_eq!(result.chunks_transferred, 3);
    let after = client.user_stats().await.unwrap();
    assert_eq!(after.allocated - before.allocated, 9);

    let info = client.list_files().await.unwrap().into_iter().next().unwrap();
    let versions = client.list_versions(info.id).await.unwrap();
    let mut numbers: Vec<i64> = versions.iter().map(|v| v.version_number).collect();
    numbers.sort();
    assert_eq!(numbers, vec![1, 2]);
    let current = versions
        .iter()
        .find(|v| Some(v.version_id) == info.current_version_id)
        .unwrap();
    assert_eq!(current.chunk_count, 3);

    // 4. Shrink: truncate to 5 bytes -> ceil(5/4) = 2 chunks.
    std::fs::write(&path, [9u8, 1, 1, 1, 1]).unwrap();
    let result = reconciler::reconcile(&client, &key, &path, "a.bin", None, chunk_size, false, None)
        .await
        .unwrap();
    assert_eq!(result.status, ReconcileStatus::LocalNewer);
    assert_eq!(result.chunks_transferred, 2);

    let info = client.list_files().await.unwrap().into_iter().next().unwrap();
    let versions = client.list_versions(info.id).await.unwrap();
    let current = versions
        .iter()
        .find(|v| Some(v.version_id) == info.current_version_id)
        .unwrap();
    assert_eq!(current.chunk_count, 2);
}

/// Scenario 5: request an old version number with the local file absent.
#[tokio::test]
async fn download_older_version_by_number() {
    let server = TestServer::spawn_with(10 * 1024 * 1024, 4).await;
    let (client, key) = login(&server).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.bin");
    let chunk_size = server.config.chunk_size;

    std::fs::write(&path, [1u8; 9]).unwrap();
    reconciler::reconcile(&client, &key, &path, "a.bin", None, chunk_size, false, None)
        .await
        .unwrap();
    let v1_hash = coldstore::chunker::hash_bytes(&[1u8; 9]);

    std::fs::write(&path, [2u8; 9]).unwrap();
    reconciler::reconcile(&client, &key, &path, "a.bin", None, chunk_size, false, None)
        .await
        .unwrap();

    std::fs::write(&path, [3u8; 9]).unwrap();
    reconciler::reconcile(&client, &key, &path, "a.bin", None, chunk_size, false, None)
        .await
        .unwrap();

    std::fs::remove_file(&path).unwrap();
    let result = reconciler::reconcile(&client, &key, &path, "a.bin", Some(1), chunk_size, false, None)
        .await
        .unwrap();
    assert_eq!(result.status, ReconcileStatus::RemoteNewer);
    assert_eq!(result.chunks_transferred, 3);

    let downloaded = std::fs::read(&path).unwrap();
    assert_eq!(coldstore::chunker::hash_bytes(&downloaded), v1_hash);
    assert_eq!(downloaded, vec![1u8; 9]);
}

/// Scenario 6: AddFileInfo succeeds with no bytes written yet; the first
/// chunk upload over quota fails and leaves allocated bytes and the
/// missing-chunks list untouched.
#[tokio::test]
async fn quota_exceeded_on_first_chunk_upload() {
    let server = TestServer::spawn_with(1024, 4 * 1024 * 1024).await;
    let (client, key) = login(&server).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("big.bin");
    std::fs::write(&path, vec![7u8; 4 * 1024 * 1024]).unwrap();

    let err = reconciler::reconcile(&client, &key, &path, "big.bin", None, server.config.chunk_size, false, None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("API error"));

    let stats = client.user_stats().await.unwrap();
    assert_eq!(stats.allocated, 0);

    let info = client.list_files().await.unwrap().into_iter().next().unwrap();
    let remote = client.get_file(info.id).await.unwrap();
    assert_eq!(remote.missing_chunks, vec![0]);
}

/// `extra_strict` mode re-hashes every stored chunk even when file-level
/// metadata matches; a bit-rotted chunk must force a new version and a full
/// re-upload rather than falling through to row 13's generic error.
#[tokio::test]
async fn extra_strict_detects_bit_rot_and_reuploads() {
    let server = TestServer::spawn_with(10 * 1024 * 1024, 4).await;
    let (client, key) = login(&server).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.bin");
    let chunk_size = server.config.chunk_size;

    std::fs::write(&path, [1u8; 9]).unwrap();
    reconciler::reconcile(&client, &key, &path, "a.bin", None, chunk_size, false, None)
        .await
        .unwrap();

    let info = client.list_files().await.unwrap().into_iter().next().unwrap();
    let versions = client.list_versions(info.id).await.unwrap();
    let current = versions
        .iter()
        .find(|v| Some(v.version_id) == info.current_version_id)
        .unwrap();
    sqlx::query("UPDATE file_chunk SET chunk_hash = 'deadbeef' WHERE file_id = ? AND version_id = ? AND chunk_number = 0")
        .bind(info.id)
        .bind(current.version_id)
        .execute(&server.pool)
        .await
        .unwrap();

    let result = reconciler::reconcile(&client, &key, &path, "a.bin", None, chunk_size, true, None)
        .await
        .unwrap();
    assert_eq!(result.status, ReconcileStatus::LocalNewer);
    assert_eq!(result.chunks_transferred, 3);

    let versions = client.list_versions(info.id).await.unwrap();
    let mut numbers: Vec<i64> = versions.iter().map(|v| v.version_number).collect();
    numbers.sort();
    assert_eq!(numbers, vec![1, 2]);
}
