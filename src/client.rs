//! HTTP client for the wire protocol of §6, used by `sync`/`syncdir` and any
//! remote-mode `file`/`versions` CLI invocation. Precedent:
//! `client/cli/src/api.rs`'s `ensure_ok` error-detail-on-failure idiom.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;

use crate::db::models::{ChunkInfo, UserStats};

pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    #[serde(rename = "login-salt")]
    pub login_salt: String,
    #[serde(rename = "crypto-verifier")]
    pub crypto_verifier: String,
    pub capabilities: Capabilities,
}

#[derive(Debug, Deserialize)]
pub struct Capabilities {
    #[serde(rename = "chunk-size")]
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteFileInfo {
    pub id: i64,
    pub name: String,
    #[serde(rename = "is-directory")]
    pub is_directory: bool,
    #[serde(rename = "current-version-id")]
    pub current_version_id: Option<i64>,
    #[serde(rename = "missing-chunks", default)]
    pub missing_chunks: Vec<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteFileVersion {
    #[serde(rename = "version-id")]
    pub version_id: i64,
    #[serde(rename = "version-number")]
    pub version_number: i64,
    #[serde(rename = "chunk-count")]
    pub chunk_count: i64,
    #[serde(rename = "file-hash")]
    pub file_hash: String,
    #[serde(rename = "last-mod")]
    pub last_mod: i64,
    pub permissions: u32,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            token: None,
        }
    }

    async fn ensure_ok(resp: reqwest::Response) -> anyhow::Result<reqwest::Response> {
        if resp.status().is_success() {
            Ok(resp)
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("API error ({status}): {body}")
        }
    }

    fn auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(t) => builder.bearer_auth(t),
            None => builder,
        }
    }

    pub async fn login(&mut self, user: &str, password: &str) -> anyhow::Result<LoginResponse> {
        let resp = self
            .client
            .post(format!("{}/api/users/login", self.base_url))
            .form(&[("user", user), ("password", password)])
            .send()
            .await?;
        let resp: LoginResponse = Self::ensure_ok(resp).await?.json().await?;
        self.token = Some(resp.token.clone());
        Ok(resp)
    }

    pub async fn user_stats(&self) -> anyhow::Result<UserStats> {
        let resp = self
            .auth(self.client.get(format!("{}/api/user/stats", self.base_url)))
            .send()
            .await?;
        #[derive(Deserialize)]
        struct Wrap {
            stats: UserStats,
        }
        let wrap: Wrap = Self::ensure_ok(resp).await?.json().await?;
        Ok(wrap.stats)
    }

    pub async fn set_crypto_hash(&self, verifier: &[u8]) -> anyhow::Result<()> {
        let resp = self
            .auth(self.client.put(format!("{}/api/user/cryptohash", self.base_url)))
            .json(&serde_json::json!({ "crypto-hash": STANDARD.encode(verifier) }))
            .send()
            .await?;
        Self::ensure_ok(resp).await?;
        Ok(())
    }

    pub async fn list_files(&self) -> anyhow::Result<Vec<RemoteFileInfo>> {
        let resp = self
            .auth(self.client.get(format!("{}/api/files", self.base_url)))
            .send()
            .await?;
        #[derive(Deserialize)]
        struct Wrap {
            files: Vec<RemoteFileInfo>,
        }
        let wrap: Wrap = Self::ensure_ok(resp).await?.json().await?;
        Ok(wrap.files)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create_file(
        &self,
        ciphertext_name: &str,
        is_dir: bool,
        permissions: u32,
        last_mod: i64,
        chunk_count: i64,
        file_hash: &str,
    ) -> anyhow::Result<RemoteFileInfo> {
        let resp = self
            .auth(self.client.post(format!("{}/api/files", self.base_url)))
            .json(&serde_json::json!({
                "file-name": ciphertext_name,
                "is-dir": is_dir,
                "permissions": permissions,
                "last-mod": last_mod,
                "chunk-count": chunk_count,
                "file-hash": file_hash,
            }))
            .send()
            .await?;
        Ok(Self::ensure_ok(resp).await?.json().await?)
    }

    pub async fn get_file(&self, id: i64) -> anyhow::Result<RemoteFileInfo> {
        let resp = self
            .auth(self.client.get(format!("{}/api/file/{}", self.base_url, id)))
            .send()
            .await?;
        Ok(Self::ensure_ok(resp).await?.json().await?)
    }

    pub async fn get_file_by_name(&self, ciphertext_name: &str) -> anyhow::Result<Option<RemoteFileInfo>> {
        let resp = self
            .auth(self.client.get(format!("{}/api/file/name", self.base_url)))
            .query(&[("file-name", ciphertext_name)])
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(Self::ensure_ok(resp).await?.json().await?))
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn tag_new_version(
        &self,
        file_id: i64,
        permissions: u32,
        last_mod: i64,
        chunk_count: i64,
        file_hash: &str,
    ) -> anyhow::Result<RemoteFileInfo> {
        let resp = self
            .auth(self.client.post(format!("{}/api/file/{}/version", self.base_url, file_id)))
            .json(&serde_json::json!({
                "permissions": permissions,
                "last-mod": last_mod,
                "chunk-count": chunk_count,
                "file-hash": file_hash,
            }))
            .send()
            .await?;
        Ok(Self::ensure_ok(resp).await?.json().await?)
    }

    pub async fn list_versions(&self, file_id: i64) -> anyhow::Result<Vec<RemoteFileVersion>> {
        let resp = self
            .auth(self.client.get(format!("{}/api/file/{}/versions", self.base_url, file_id)))
            .send()
            .await?;
        #[derive(Deserialize)]
        struct Wrap {
            versions: Vec<RemoteFileVersion>,
        }
        let wrap: Wrap = Self::ensure_ok(resp).await?.json().await?;
        Ok(wrap.versions)
    }

    pub async fn delete_versions(&self, file_id: i64, min_version: i64, max_version: i64) -> anyhow::Result<()> {
        let resp = self
            .auth(self.client.delete(format!("{}/api/file/{}/versions", self.base_url, file_id)))
            .json(&serde_json::json!({ "min-version": min_version, "max-version": max_version }))
            .send()
            .await?;
        Self::ensure_ok(resp).await?;
        Ok(())
    }

    pub async fn remove_file(&self, file_id: i64) -> anyhow::Result<()> {
        let resp = self
            .auth(self.client.delete(format!("{}/api/file/{}", self.base_url, file_id)))
            .send()
            .await?;
        Self::ensure_ok(resp).await?;
        Ok(())
    }

    pub async fn upload_chunk(
        &self,
        file_id: i64,
        version_id: i64,
        n: i64,
        hash: &str,
        bytes: Vec<u8>,
    ) -> anyhow::Result<()> {
        let resp = self
            .auth(self.client.put(format!(
                "{}/api/chunk/{}/{}/{}/{}",
                self.base_url, file_id, version_id, n, hash
            )))
            .header("Content-Type", "application/octet-stream")
            .body(bytes)
            .send()
            .await?;
        Self::ensure_ok(resp).await?;
        Ok(())
    }

    pub async fn download_chunk(&self, file_id: i64, version_id: i64, n: i64) -> anyhow::Result<Vec<u8>> {
        let resp = self
            .auth(self.client.get(format!(
                "{}/api/chunk/{}/{}/{}",
                self.base_url, file_id, version_id, n
            )))
            .send()
            .await?;
        Ok(Self::ensure_ok(resp).await?.bytes().await?.to_vec())
    }

    pub async fn list_chunk_infos(&self, file_id: i64, version_id: i64) -> anyhow::Result<Vec<ChunkInfo>> {
        let resp = self
            .auth(self.client.get(format!(
                "{}/api/chunk/{}/{}",
                self.base_url, file_id, version_id
            )))
            .send()
            .await?;
        #[derive(Deserialize)]
        struct Wrap {
            chunks: Vec<ChunkInfo>,
        }
        let wrap: Wrap = Self::ensure_ok(resp).await?.json().await?;
        Ok(wrap.chunks)
    }
}
