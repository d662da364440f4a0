use serde::Deserialize;

/// Server-side configuration, loaded from the environment (precedent:
/// `Config::from_env` in the teacher's `server/src/config.rs`).
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub jwt_secret: String,
    /// Maximum bytes accepted for a single chunk upload (§5: "the per-request
    /// reader must enforce this cap so a client cannot DoS the server").
    pub chunk_size: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Config {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://coldstore.db".to_string()),
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string()),
            jwt_secret: std::env::var("JWT_SECRET").unwrap_or_else(|_| {
                tracing::warn!("JWT_SECRET not set, using an insecure default. Set it with: openssl rand -hex 32");
                "insecure-development-secret".to_string()
            }),
            chunk_size: std::env::var("CHUNK_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(4 * 1024 * 1024),
        })
    }
}
