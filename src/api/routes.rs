//! §6 wire protocol: JSON over HTTP, bearer-token auth.

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{delete, get, post, put};
use axum::{Form, Json, Router};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use super::AppState;
use crate::auth;
use crate::crypto;
use crate::db::{chunks, files, models::FileInfo, models::FileVersion, users};
use crate::error::{CoreError, CoreResult};

pub fn router(state: AppState) -> Router {
    // Every chunk upload must fit under the configured chunk size, plus a
    // little slack for the JSON bodies the other routes send.
    let body_limit = RequestBodyLimitLayer::new(state.config.chunk_size + 4096);
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let request_id_header = axum::http::HeaderName::from_static("x-request-id");
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().include_headers(true).level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    Router::new()
        .route("/api/users/login", post(login))
        .route("/api/user/stats", get(get_user_stats))
        .route("/api/user/cryptohash", put(set_crypto_hash))
        .route("/api/files", get(list_files).post(create_file))
        .route("/api/file/name", get(get_file_by_name))
        .route(
            "/api/file/:id",
            get(get_file_by_id).delete(remove_file),
        )
        .route("/api/file/:id/version", post(tag_new_version))
        .route(
            "/api/file/:id/versions",
            get(list_versions).delete(delete_versions),
        )
        .route(
            "/api/chunk/:fileid/:versionid/:n/:hash",
            put(upload_chunk),
        )
        .route("/api/chunk/:fileid/:versionid/:n", get(download_chunk))
        .route("/api/chunk/:fileid/:versionid", get(list_chunk_infos))
        .layer(DefaultBodyLimit::disable())
        .layer(body_limit)
        .layer(cors)
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .layer(trace_layer)
        .with_state(state)
}

fn authenticate(state: &AppState, headers: &HeaderMap) -> CoreResult<(String, i64)> {
    let token = auth::extract_bearer_token(headers)?;
    auth::verify_token(&state.config.jwt_secret, token)
}

fn file_info_response(info: FileInfo) -> serde_json::Value {
    serde_json::json!({
        "id": info.id,
        "name": info.name,
        "is-directory": info.is_directory,
        "current-version-id": info.current_version_id,
    })
}

// ---- auth ----

#[derive(Deserialize)]
struct LoginRequest {
    user: String,
    password: String,
}

async fn login(
    State(state): State<AppState>,
    Form(req): Form<LoginRequest>,
) -> CoreResult<Json<serde_json::Value>> {
    let user = users::get_user(&state.db, &req.user)
        .await
        .map_err(|_| CoreError::AuthFailed)?;
    if !crypto::verify_login_password(&req.password, &user.login_verifier) {
        return Err(CoreError::AuthFailed);
    }
    let token = auth::generate_token(&state.config.jwt_secret, &user.name, user.id)?;
    Ok(Json(serde_json::json!({
        "token": token,
        "login-salt": user.login_salt,
        "crypto-verifier": STANDARD.encode(&user.crypto_verifier),
        "capabilities": { "chunk-size": state.config.chunk_size },
    })))
}

// ---- user ----

async fn get_user_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> CoreResult<Json<serde_json::Value>> {
    let (_, user_id) = authenticate(&state, &headers)?;
    let stats = users::get_user_stats(&state.db, user_id).await?;
    Ok(Json(serde_json::json!({ "stats": stats })))
}

#[derive(Deserialize)]
struct CryptoHashRequest {
    #[serde(rename = "crypto-hash")]
    crypto_hash: String,
}

async fn set_crypto_hash(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CryptoHashRequest>,
) -> CoreResult<Json<serde_json::Value>> {
    let (_, user_id) = authenticate(&state, &headers)?;
    let bytes = STANDARD
        .decode(&req.crypto_hash)
        .map_err(|e| CoreError::Other(anyhow::anyhow!(e)))?;
    users::set_user_crypto_verifier(&state.db, user_id, &bytes).await?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

// ---- files ----

async fn list_files(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> CoreResult<Json<serde_json::Value>> {
    let (_, user_id) = authenticate(&state, &headers)?;
    let infos = files::get_all_user_file_infos(&state.db, user_id).await?;
    let files: Vec<_> = infos.into_iter().map(file_info_response).collect();
    Ok(Json(serde_json::json!({ "files": files })))
}

#[derive(Deserialize)]
struct CreateFileRequest {
    #[serde(rename = "file-name")]
    file_name: String,
    #[serde(rename = "is-dir")]
    is_dir: bool,
    permissions: u32,
    #[serde(rename = "last-mod")]
    last_mod: i64,
    #[serde(rename = "chunk-count")]
    chunk_count: i64,
    #[serde(rename = "file-hash")]
    file_hash: String,
}

async fn create_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateFileRequest>,
) -> CoreResult<Json<serde_json::Value>> {
    let (_, user_id) = authenticate(&state, &headers)?;
    let info = files::add_file_info(
        &state.db,
        user_id,
        &req.file_name,
        req.is_dir,
        req.permissions,
        req.last_mod,
        req.chunk_count,
        &req.file_hash,
    )
    .await?;
    Ok(Json(file_info_response(info)))
}

async fn with_missing_chunks(state: &AppState, user_id: i64, info: FileInfo) -> CoreResult<serde_json::Value> {
    let missing = chunks::get_missing_chunk_numbers_for_file(&state.db, user_id, info.id).await?;
    let mut v = file_info_response(info);
    v["missing-chunks"] = serde_json::json!(missing);
    Ok(v)
}

async fn get_file_by_id(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> CoreResult<Json<serde_json::Value>> {
    let (_, user_id) = authenticate(&state, &headers)?;
    let info = files::get_file_info(&state.db, user_id, id).await?;
    Ok(Json(with_missing_chunks(&state, user_id, info).await?))
}

#[derive(Deserialize)]
struct FileByNameQuery {
    #[serde(rename = "file-name")]
    file_name: String,
}

async fn get_file_by_name(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<FileByNameQuery>,
) -> CoreResult<Json<serde_json::Value>> {
    let (_, user_id) = authenticate(&state, &headers)?;
    let info = files::get_file_info_by_name(&state.db, user_id, &q.file_name).await?;
    Ok(Json(with_missing_chunks(&state, user_id, info).await?))
}

async fn remove_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> CoreResult<Json<serde_json::Value>> {
    let (_, user_id) = authenticate(&state, &headers)?;
    files::remove_file(&state.db, user_id, id).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

#[derive(Deserialize)]
struct NewVersionRequest {
    permissions: u32,
    #[serde(rename = "last-mod")]
    last_mod: i64,
    #[serde(rename = "chunk-count")]
    chunk_count: i64,
    #[serde(rename = "file-hash")]
    file_hash: String,
}

async fn tag_new_version(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(req): Json<NewVersionRequest>,
) -> CoreResult<Json<serde_json::Value>> {
    let (_, user_id) = authenticate(&state, &headers)?;
    let info = files::tag_new_file_version(
        &state.db,
        user_id,
        id,
        req.permissions,
        req.last_mod,
        req.chunk_count,
        &req.file_hash,
    )
    .await?;
    let mut v = file_info_response(info);
    v["status"] = serde_json::json!("ok");
    Ok(Json(v))
}

fn version_response(v: &FileVersion) -> serde_json::Value {
    serde_json::json!({
        "version-id": v.id,
        "version-number": v.version_number,
        "chunk-count": v.chunk_count,
        "file-hash": v.file_hash,
        "last-mod": v.last_mod,
        "permissions": v.permissions,
    })
}

async fn list_versions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> CoreResult<Json<serde_json::Value>> {
    let (_, user_id) = authenticate(&state, &headers)?;
    // Ownership check: a version list is only meaningful for a file the caller owns.
    files::get_file_info(&state.db, user_id, id).await?;
    let versions = files::get_file_versions(&state.db, id).await?;
    let versions: Vec<_> = versions.iter().map(version_response).collect();
    Ok(Json(serde_json::json!({ "versions": versions })))
}

#[derive(Deserialize)]
struct DeleteVersionsRequest {
    #[serde(rename = "min-version")]
    min_version: i64,
    #[serde(rename = "max-version")]
    max_version: i64,
}

async fn delete_versions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(req): Json<DeleteVersionsRequest>,
) -> CoreResult<Json<serde_json::Value>> {
    let (_, user_id) = authenticate(&state, &headers)?;
    let info = files::get_file_info(&state.db, user_id, id).await?;
    let current_version_number = match info.current_version_id {
        Some(cvid) => files::get_file_version(&state.db, cvid).await?.version_number,
        None => 0,
    };
    files::delete_file_versions(
        &state.db,
        user_id,
        id,
        req.min_version,
        req.max_version,
        current_version_number,
    )
    .await?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

// ---- chunks ----

async fn upload_chunk(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((fileid, versionid, n, hash)): Path<(i64, i64, i64, String)>,
    body: Bytes,
) -> CoreResult<Json<serde_json::Value>> {
    let (_, user_id) = authenticate(&state, &headers)?;
    if body.len() > state.config.chunk_size {
        return Err(CoreError::OverSize);
    }
    chunks::add_file_chunk(
        &state.db,
        user_id,
        fileid,
        versionid,
        n,
        &hash,
        &body,
        state.config.chunk_size,
    )
    .await?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

async fn download_chunk(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((fileid, versionid, n)): Path<(i64, i64, i64)>,
) -> CoreResult<Bytes> {
    let (_, user_id) = authenticate(&state, &headers)?;
    files::get_file_info(&state.db, user_id, fileid).await?;
    let chunk = chunks::get_file_chunk(&state.db, fileid, n, versionid).await?;
    Ok(Bytes::from(chunk.bytes))
}

async fn list_chunk_infos(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((fileid, versionid)): Path<(i64, i64)>,
) -> CoreResult<Json<serde_json::Value>> {
    let (_, user_id) = authenticate(&state, &headers)?;
    let infos = chunks::get_file_chunk_infos(&state.db, user_id, fileid, versionid).await?;
    Ok(Json(serde_json::json!({ "chunks": infos })))
}
