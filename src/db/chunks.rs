//! §4.3 catalog operations on FileChunk.

use super::models::{ChunkInfo, FileChunk};
use super::users::update_user_stats_tx;
use super::DbPool;
use crate::error::{CoreError, CoreResult};

/// AddFileChunk(user, file-id, version-id, chunk-number, chunk-hash, bytes)
/// — verifies ownership and size, rejects over quota, writes the chunk and
/// updates stats by the net byte delta in the same transaction (I3, I4, I5).
/// Replacing an existing chunk nets out its old length first.
pub async fn add_file_chunk(
    pool: &DbPool,
    user_id: i64,
    file_id: i64,
    version_id: i64,
    chunk_number: i64,
    chunk_hash: &str,
    bytes: &[u8],
    max_chunk_size: usize,
) -> CoreResult<FileChunk> {
    if bytes.len() > max_chunk_size {
        return Err(CoreError::OverSize);
    }

    let mut tx = pool.begin().await?;

    let owner: Option<(i64,)> = sqlx::query_as("SELECT user_id FROM file_info WHERE id = ?")
        .bind(file_id)
        .fetch_optional(&mut *tx)
        .await?;
    match owner {
        Some((owner_id,)) if owner_id == user_id => {}
        Some(_) => return Err(CoreError::NotOwned(format!("file {file_id}"))),
        None => return Err(CoreError::NotFound(format!("file {file_id}"))),
    }

    let version: Option<(i64, i64)> =
        sqlx::query_as("SELECT file_id, chunk_count FROM file_version WHERE id = ?")
            .bind(version_id)
            .fetch_optional(&mut *tx)
            .await?;
    let chunk_count = match version {
        Some((vf, count)) if vf == file_id => count,
        Some(_) => return Err(CoreError::NotOwned(format!("version {version_id}"))),
        None => return Err(CoreError::NotFound(format!("version {version_id}"))),
    };
    if chunk_number < 0 || chunk_number >= chunk_count {
        return Err(CoreError::OutOfRange);
    }

    let existing_len: Option<(i64,)> = sqlx::query_as(
        "SELECT LENGTH(bytes) FROM file_chunk WHERE file_id = ? AND version_id = ? AND chunk_number = ?",
    )
    .bind(file_id)
    .bind(version_id)
    .bind(chunk_number)
    .fetch_optional(&mut *tx)
    .await?;
    let old_len = existing_len.map(|(l,)| l).unwrap_or(0);
    let delta = bytes.len() as i64 - old_len;

    if delta > 0 {
        let (allocated, quota): (i64, i64) = sqlx::query_as(
            "SELECT s.allocated_bytes, u.quota_bytes FROM user_stats s
             JOIN users u ON u.id = s.user_id WHERE s.user_id = ?",
        )
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;
        if allocated + delta > quota {
            return Err(CoreError::QuotaExceeded);
        }
    }

    sqlx::query(
        "INSERT INTO file_chunk (file_id, version_id, chunk_number, chunk_hash, bytes)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT (file_id, version_id, chunk_number)
         DO UPDATE SET chunk_hash = excluded.chunk_hash, bytes = excluded.bytes",
    )
    .bind(file_id)
    .bind(version_id)
    .bind(chunk_number)
    .bind(chunk_hash)
    .bind(bytes)
    .execute(&mut *tx)
    .await?;

    update_user_stats_tx(&mut tx, user_id, delta).await?;
    tx.commit().await?;

    Ok(FileChunk {
        file_id,
        version_id,
        chunk_number,
        chunk_hash: chunk_hash.to_string(),
        bytes: bytes.to_vec(),
    })
}

pub async fn get_file_chunk(
    pool: &DbPool,
    file_id: i64,
    chunk_number: i64,
    version_id: i64,
) -> CoreResult<FileChunk> {
    let row: Option<(i64, i64, i64, String, Vec<u8>)> = sqlx::query_as(
        "SELECT file_id, version_id, chunk_number, chunk_hash, bytes
         FROM file_chunk WHERE file_id = ? AND chunk_number = ? AND version_id = ?",
    )
    .bind(file_id)
    .bind(chunk_number)
    .bind(version_id)
    .fetch_optional(pool)
    .await?;
    row.map(|(file_id, version_id, chunk_number, chunk_hash, bytes)| FileChunk {
        file_id,
        version_id,
        chunk_number,
        chunk_hash,
        bytes,
    })
    .ok_or_else(|| CoreError::NotFound(format!("chunk {file_id}/{version_id}/{chunk_number}")))
}

pub async fn get_file_chunk_infos(
    pool: &DbPool,
    user_id: i64,
    file_id: i64,
    version_id: i64,
) -> CoreResult<Vec<ChunkInfo>> {
    let owner: Option<(i64,)> = sqlx::query_as("SELECT user_id FROM file_info WHERE id = ?")
        .bind(file_id)
        .fetch_optional(pool)
        .await?;
    match owner {
        Some((owner_id,)) if owner_id == user_id => {}
        Some(_) => return Err(CoreError::NotOwned(format!("file {file_id}"))),
        None => return Err(CoreError::NotFound(format!("file {file_id}"))),
    }
    let rows: Vec<(i64, String)> = sqlx::query_as(
        "SELECT chunk_number, chunk_hash FROM file_chunk
         WHERE file_id = ? AND version_id = ? ORDER BY chunk_number",
    )
    .bind(file_id)
    .bind(version_id)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|(chunk_number, chunk_hash)| ChunkInfo {
            chunk_number,
            chunk_hash,
        })
        .collect())
}

/// GetMissingChunkNumbersForFile(user, file-id) -> sorted [chunk-number] —
/// {0,...,chunk-count-1} minus present chunk numbers, for the current
/// version (I2).
pub async fn get_missing_chunk_numbers_for_file(
    pool: &DbPool,
    user_id: i64,
    file_id: i64,
) -> CoreResult<Vec<i64>> {
    let row: Option<(i64, Option<i64>)> =
        sqlx::query_as("SELECT user_id, current_version_id FROM file_info WHERE id = ?")
            .bind(file_id)
            .fetch_optional(pool)
            .await?;
    let (owner_id, current_version_id) = match row {
        Some((owner, version)) if owner == user_id => (owner, version),
        Some(_) => return Err(CoreError::NotOwned(format!("file {file_id}"))),
        None => return Err(CoreError::NotFound(format!("file {file_id}"))),
    };
    let _ = owner_id;
    let Some(version_id) = current_version_id else {
        return Ok(Vec::new());
    };

    let (chunk_count,): (i64,) = sqlx::query_as("SELECT chunk_count FROM file_version WHERE id = ?")
        .bind(version_id)
        .fetch_one(pool)
        .await?;

    let present: Vec<(i64,)> = sqlx::query_as(
        "SELECT chunk_number FROM file_chunk WHERE file_id = ? AND version_id = ?",
    )
    .bind(file_id)
    .bind(version_id)
    .fetch_all(pool)
    .await?;
    let present: std::collections::HashSet<i64> = present.into_iter().map(|(n,)| n).collect();

    Ok((0..chunk_count).filter(|n| !present.contains(n)).collect())
}

/// RemoveFileChunk(user, file-id, version-id, chunk-number) -> bool —
/// verifies ownership, deletes the chunk, subtracts its bytes (I3),
/// increments revision (I5).
pub async fn remove_file_chunk(
    pool: &DbPool,
    user_id: i64,
    file_id: i64,
    version_id: i64,
    chunk_number: i64,
) -> CoreResult<bool> {
    let mut tx = pool.begin().await?;
    let owner: Option<(i64,)> = sqlx::query_as("SELECT user_id FROM file_info WHERE id = ?")
        .bind(file_id)
        .fetch_optional(&mut *tx)
        .await?;
    match owner {
        Some((owner_id,)) if owner_id == user_id => {}
        Some(_) => return Err(CoreError::NotOwned(format!("file {file_id}"))),
        None => return Err(CoreError::NotFound(format!("file {file_id}"))),
    }

    let len: Option<(i64,)> = sqlx::query_as(
        "SELECT LENGTH(bytes) FROM file_chunk WHERE file_id = ? AND version_id = ? AND chunk_number = ?",
    )
    .bind(file_id)
    .bind(version_id)
    .bind(chunk_number)
    .fetch_optional(&mut *tx)
    .await?;
    let Some((len,)) = len else {
        return Ok(false);
    };

    sqlx::query(
        "DELETE FROM file_chunk WHERE file_id = ? AND version_id = ? AND chunk_number = ?",
    )
    .bind(file_id)
    .bind(version_id)
    .bind(chunk_number)
    .execute(&mut *tx)
    .await?;

    update_user_stats_tx(&mut tx, user_id, -len).await?;
    tx.commit().await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::files::add_file_info;
    use crate::db::users::{add_user, get_user_stats};

    async fn test_pool() -> DbPool {
        let pool = super::super::create_pool("sqlite::memory:").await.unwrap();
        super::super::run_migrations(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn missing_chunks_is_complement_of_present() {
        let pool = test_pool().await;
        let user = add_user(&pool, "alice", "s", b"v", 10_000_000).await.unwrap();
        let info = add_file_info(&pool, user.id, "name", false, 0o644, 0, 3, "hash")
            .await
            .unwrap();
        let version_id = info.current_version_id.unwrap();
        add_file_chunk(&pool, user.id, info.id, version_id, 1, "h1", b"data", 1024)
            .await
            .unwrap();
        let missing = get_missing_chunk_numbers_for_file(&pool, user.id, info.id)
            .await
            .unwrap();
        assert_eq!(missing, vec![0, 2]);
    }

    #[tokio::test]
    async fn oversize_chunk_is_rejected_and_leaves_state_unchanged() {
        let pool = test_pool().await;
        let user = add_user(&pool, "bob", "s", b"v", 10_000_000).await.unwrap();
        let info = add_file_info(&pool, user.id, "name", false, 0o644, 0, 1, "hash")
            .await
            .unwrap();
        let version_id = info.current_version_id.unwrap();
        let before = get_user_stats(&pool, user.id).await.unwrap();
        let err = add_file_chunk(&pool, user.id, info.id, version_id, 0, "h", &[0u8; 10], 4)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::OverSize));
        let after = get_user_stats(&pool, user.id).await.unwrap();
        assert_eq!(before.allocated, after.allocated);
        assert_eq!(before.revision, after.revision);
    }

    #[tokio::test]
    async fn quota_exceeded_is_rejected_and_leaves_state_unchanged() {
        let pool = test_pool().await;
        let user = add_user(&pool, "carol", "s", b"v", 8).await.unwrap();
        let info = add_file_info(&pool, user.id, "name", false, 0o644, 0, 1, "hash")
            .await
            .unwrap();
        let version_id = info.current_version_id.unwrap();
        let before = get_user_stats(&pool, user.id).await.unwrap();
        let err = add_file_chunk(&pool, user.id, info.id, version_id, 0, "h", &[0u8; 16], 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::QuotaExceeded));
        let after = get_user_stats(&pool, user.id).await.unwrap();
        assert_eq!(before.allocated, after.allocated);
    }

    #[tokio::test]
    async fn chunk_from_other_user_file_is_not_owned() {
        let pool = test_pool().await;
        let owner = add_user(&pool, "dave", "s", b"v", 10_000_000).await.unwrap();
        let attacker = add_user(&pool, "eve", "s", b"v", 10_000_000).await.unwrap();
        let info = add_file_info(&pool, owner.id, "name", false, 0o644, 0, 1, "hash")
            .await
            .unwrap();
        let version_id = info.current_version_id.unwrap();
        let err = add_file_chunk(&pool, attacker.id, info.id, version_id, 0, "h", b"x", 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotOwned(_)));
    }

    #[tokio::test]
    async fn out_of_range_chunk_number_is_rejected() {
        let pool = test_pool().await;
        let user = add_user(&pool, "frank", "s", b"v", 10_000_000).await.unwrap();
        let info = add_file_info(&pool, user.id, "name", false, 0o644, 0, 1, "hash")
            .await
            .unwrap();
        let version_id = info.current_version_id.unwrap();
        let err = add_file_chunk(&pool, user.id, info.id, version_id, 5, "h", b"x", 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::OutOfRange));
    }
}
