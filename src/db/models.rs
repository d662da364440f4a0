//! §3 data model entities, as rows.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    #[serde(skip_serializing)]
    pub login_salt: String,
    #[serde(skip_serializing)]
    pub login_verifier: Vec<u8>,
    #[serde(skip_serializing)]
    pub crypto_verifier: Vec<u8>,
    pub quota_bytes: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UserStats {
    pub quota: i64,
    pub allocated: i64,
    pub revision: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub is_directory: bool,
    pub current_version_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileVersion {
    pub id: i64,
    pub file_id: i64,
    pub version_number: i64,
    pub permissions: u32,
    pub last_mod: i64,
    pub chunk_count: i64,
    pub file_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkInfo {
    pub chunk_number: i64,
    pub chunk_hash: String,
}

#[derive(Debug, Clone)]
pub struct FileChunk {
    pub file_id: i64,
    pub version_id: i64,
    pub chunk_number: i64,
    pub chunk_hash: String,
    pub bytes: Vec<u8>,
}
