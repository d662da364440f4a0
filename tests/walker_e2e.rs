//! End-to-end directory walk: upload a small tree, then walk it down into a
//! second empty directory and confirm every byte round-trips.

mod common;

use coldstore::client::ApiClient;
use coldstore::crypto;
use coldstore::walker;
use common::{TestServer, TEST_PASSPHRASE, TEST_PASSWORD, TEST_USER};

#[tokio::test]
async fn directory_tree_round_trips_through_upload_and_download() {
    let server = TestServer::spawn_with(10 * 1024 * 1024, 64).await;
    let mut client = ApiClient::new(&server.base_url);
    let resp = client.login(TEST_USER, TEST_PASSWORD).await.unwrap();
    let key = crypto::derive_crypto_key(TEST_PASSPHRASE, &resp.login_salt);

    let src = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(src.path().join("sub")).unwrap();
    std::fs::write(src.path().join("root.txt"), b"top level contents").unwrap();
    std::fs::write(src.path().join("sub/nested.txt"), vec![42u8; 200]).unwrap();

    let up = walker::walk(&client, &key, src.path(), "/backup", server.config.chunk_size, false, None)
        .await
        .unwrap();
    assert_eq!(up.files_processed, 4); // src itself + root.txt + sub + sub/nested.txt
    assert!(up.chunks_transferred > 0);

    let dst = tempfile::tempdir().unwrap();
    let down = walker::walk(&client, &key, dst.path(), "/backup", server.config.chunk_size, false, None)
        .await
        .unwrap();
    assert_eq!(down.files_processed, 4);

    assert_eq!(
        std::fs::read(dst.path().join("root.txt")).unwrap(),
        b"top level contents"
    );
    assert_eq!(std::fs::read(dst.path().join("sub/nested.txt")).unwrap(), vec![42u8; 200]);

    // Walking either directory again transfers nothing further: both sides agree.
    let again = walker::walk(&client, &key, src.path(), "/backup", server.config.chunk_size, false, None)
        .await
        .unwrap();
    assert_eq!(again.chunks_transferred, 0);
}
