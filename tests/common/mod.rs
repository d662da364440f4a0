//! Shared harness for the reconciler end-to-end tests: an in-process
//! `coldstore serve` instance backed by an in-memory sqlite database,
//! plus a pre-registered user with a known login password and crypto
//! passphrase.

use coldstore::api::AppState;
use coldstore::config::Config;
use coldstore::db::{create_pool, run_migrations};
use coldstore::{crypto, db};

pub const TEST_USER: &str = "alice";
pub const TEST_PASSWORD: &str = "correct horse battery staple";
pub const TEST_PASSPHRASE: &str = "zero knowledge zebra";

pub struct TestServer {
    pub base_url: String,
    pub config: Config,
    pub pool: coldstore::db::DbPool,
    _handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub async fn spawn() -> Self {
        Self::spawn_with(10 * 1024 * 1024, 4 * 1024 * 1024).await
    }

    pub async fn spawn_with(quota_bytes: i64, chunk_size: usize) -> Self {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();

        let login_salt = crypto::generate_login_salt();
        let login_verifier = crypto::hash_login_password(TEST_PASSWORD, &login_salt).unwrap();
        let user = db::users::add_user(&pool, TEST_USER, &login_salt, &login_verifier, quota_bytes)
            .await
            .unwrap();
        let key = crypto::derive_crypto_key(TEST_PASSPHRASE, &user.login_salt);
        db::users::set_user_crypto_verifier(&pool, user.id, &key.verifier())
            .await
            .unwrap();

        let config = Config {
            database_url: "sqlite::memory:".into(),
            bind_addr: "127.0.0.1:0".into(),
            jwt_secret: "test-secret".into(),
            chunk_size,
        };
        let pool_for_test = pool.clone();
        let state = AppState::new(pool, config.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = coldstore::api::routes::router(state);
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            config,
            pool: pool_for_test,
            _handle: handle,
        }
    }
}
