//! §4.3 catalog operations on FileInfo/FileVersion.

use super::models::{FileInfo, FileVersion};
use super::users::bump_revision_tx;
use super::DbPool;
use crate::error::{CoreError, CoreResult};

fn version_from_row(row: (i64, i64, i64, i64, i64, i64, String)) -> FileVersion {
    FileVersion {
        id: row.0,
        file_id: row.1,
        version_number: row.2,
        permissions: row.3 as u32,
        last_mod: row.4,
        chunk_count: row.5,
        file_hash: row.6,
    }
}

fn info_from_row(row: (i64, i64, String, i64, Option<i64>)) -> FileInfo {
    FileInfo {
        id: row.0,
        user_id: row.1,
        name: row.2,
        is_directory: row.3 != 0,
        current_version_id: row.4,
    }
}

/// AddFileInfo(user, ciphertext-name, is-dir, perms, last-mod, chunk-count,
/// file-hash) -> FileInfo — creates the file and version #1; Conflict if the
/// (user, name) pair exists. Does not touch allocated-bytes (I3: no chunk
/// bytes have been written yet), but does bump revision (see Open
/// Question (a) in the specification; this implementation bumps uniformly).
pub async fn add_file_info(
    pool: &DbPool,
    user_id: i64,
    ciphertext_name: &str,
    is_directory: bool,
    permissions: u32,
    last_mod: i64,
    chunk_count: i64,
    file_hash: &str,
) -> CoreResult<FileInfo> {
    let mut tx = pool.begin().await?;
    let existing: Option<(i64,)> =
        sqlx::query_as("SELECT id FROM file_info WHERE user_id = ? AND name = ?")
            .bind(user_id)
            .bind(ciphertext_name)
            .fetch_optional(&mut *tx)
            .await?;
    if existing.is_some() {
        return Err(CoreError::Conflict(format!(
            "file {ciphertext_name} already exists for this user"
        )));
    }

    let (file_id,): (i64,) = sqlx::query_as(
        "INSERT INTO file_info (user_id, name, is_directory, current_version_id)
         VALUES (?, ?, ?, NULL) RETURNING id",
    )
    .bind(user_id)
    .bind(ciphertext_name)
    .bind(is_directory as i64)
    .fetch_one(&mut *tx)
    .await?;

    let (version_id,): (i64,) = sqlx::query_as(
        "INSERT INTO file_version (file_id, version_number, permissions, last_mod, chunk_count, file_hash)
         VALUES (?, 1, ?, ?, ?, ?) RETURNING id",
    )
    .bind(file_id)
    .bind(permissions as i64)
    .bind(last_mod)
    .bind(chunk_count)
    .bind(file_hash)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query("UPDATE file_info SET current_version_id = ? WHERE id = ?")
        .bind(version_id)
        .bind(file_id)
        .execute(&mut *tx)
        .await?;

    bump_revision_tx(&mut tx, user_id).await?;
    tx.commit().await?;

    Ok(FileInfo {
        id: file_id,
        user_id,
        name: ciphertext_name.to_string(),
        is_directory,
        current_version_id: Some(version_id),
    })
}

/// TagNewFileVersion(user, file-id, perms, last-mod, chunk-count, file-hash)
/// -> FileInfo — appends version-number = previous + 1 and makes it current;
/// NotFound if the file isn't owned by the user (ownership is checked inside
/// the same transaction as the mutation, per §5).
pub async fn tag_new_file_version(
    pool: &DbPool,
    user_id: i64,
    file_id: i64,
    permissions: u32,
    last_mod: i64,
    chunk_count: i64,
    file_hash: &str,
) -> CoreResult<FileInfo> {
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

    let (prev,): (i64,) = sqlx::query_as(
        "SELECT COALESCE(MAX(version_number), 0) FROM file_version WHERE file_id = ?",
    )
    .bind(file_id)
    .fetch_one(&mut *tx)
    .await?;

    let (version_id,): (i64,) = sqlx::query_as(
        "INSERT INTO file_version (file_id, version_number, permissions, last_mod, chunk_count, file_hash)
         VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(file_id)
    .bind(prev + 1)
    .bind(permissions as i64)
    .bind(last_mod)
    .bind(chunk_count)
    .bind(file_hash)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query("UPDATE file_info SET current_version_id = ? WHERE id = ?")
        .bind(version_id)
        .bind(file_id)
        .execute(&mut *tx)
        .await?;

    bump_revision_tx(&mut tx, user_id).await?;
    tx.commit().await?;

    get_file_info(pool, user_id, file_id).await
}

pub async fn get_all_user_file_infos(pool: &DbPool, user_id: i64) -> CoreResult<Vec<FileInfo>> {
    let rows: Vec<(i64, i64, String, i64, Option<i64>)> = sqlx::query_as(
        "SELECT id, user_id, name, is_directory, current_version_id FROM file_info WHERE user_id = ?",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(info_from_row).collect())
}

pub async fn get_file_info(pool: &DbPool, user_id: i64, file_id: i64) -> CoreResult<FileInfo> {
    let row: Option<(i64, i64, String, i64, Option<i64>)> = sqlx::query_as(
        "SELECT id, user_id, name, is_directory, current_version_id FROM file_info WHERE id = ?",
    )
    .bind(file_id)
    .fetch_optional(pool)
    .await?;
    match row.map(info_from_row) {
        Some(info) if info.user_id == user_id => Ok(info),
        Some(_) => Err(CoreError::NotOwned(format!("file {file_id}"))),
        None => Err(CoreError::NotFound(format!("file {file_id}"))),
    }
}

pub async fn get_file_info_by_name(
    pool: &DbPool,
    user_id: i64,
    ciphertext_name: &str,
) -> CoreResult<FileInfo> {
    let row: Option<(i64, i64, String, i64, Option<i64>)> = sqlx::query_as(
        "SELECT id, user_id, name, is_directory, current_version_id
         FROM file_info WHERE user_id = ? AND name = ?",
    )
    .bind(user_id)
    .bind(ciphertext_name)
    .fetch_optional(pool)
    .await?;
    row.map(info_from_row)
        .ok_or_else(|| CoreError::NotFound(format!("file named {ciphertext_name}")))
}

pub async fn get_file_versions(pool: &DbPool, file_id: i64) -> CoreResult<Vec<FileVersion>> {
    let rows: Vec<(i64, i64, i64, i64, i64, i64, String)> = sqlx::query_as(
        "SELECT id, file_id, version_number, permissions, last_mod, chunk_count, file_hash
         FROM file_version WHERE file_id = ? ORDER BY version_number",
    )
    .bind(file_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(version_from_row).collect())
}

pub async fn get_file_version(pool: &DbPool, version_id: i64) -> CoreResult<FileVersion> {
    let row: Option<(i64, i64, i64, i64, i64, i64, String)> = sqlx::query_as(
        "SELECT id, file_id, version_number, permissions, last_mod, chunk_count, file_hash
         FROM file_version WHERE id = ?",
    )
    .bind(version_id)
    .fetch_optional(pool)
    .await?;
    row.map(version_from_row)
        .ok_or_else(|| CoreError::NotFound(format!("version {version_id}")))
}

/// Sum of chunk byte lengths across every version of a file (used by
/// RemoveFile/DeleteFileVersions to keep allocated-bytes consistent, I3).
async fn sum_chunk_bytes(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    file_id: i64,
    min_version_id: Option<i64>,
    max_version_id: Option<i64>,
) -> CoreResult<i64> {
    let sum: (Option<i64>,) = match (min_version_id, max_version_id) {
        (Some(min), Some(max)) => {
            sqlx::query_as(
                "SELECT SUM(LENGTH(bytes)) FROM file_chunk
                 WHERE file_id = ? AND version_id >= ? AND version_id <= ?",
            )
            .bind(file_id)
            .bind(min)
            .bind(max)
            .fetch_one(&mut **tx)
            .await?
        }
        _ => {
            sqlx::query_as("SELECT SUM(LENGTH(bytes)) FROM file_chunk WHERE file_id = ?")
                .bind(file_id)
                .fetch_one(&mut **tx)
                .await?
        }
    };
    Ok(sum.0.unwrap_or(0))
}

/// RemoveFile(user, file-id) — deletes all versions/chunks (cascade),
/// subtracts their bytes from allocated, bumps revision once (I8).
pub async fn remove_file(pool: &DbPool, user_id: i64, file_id: i64) -> CoreResult<()> {
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

    let freed = sum_chunk_bytes(&mut tx, file_id, None, None).await?;
    sqlx::query("DELETE FROM file_info WHERE id = ?")
        .bind(file_id)
        .execute(&mut *tx)
        .await?;
    if freed != 0 {
        super::users::update_user_stats_tx(&mut tx, user_id, -freed).await?;
    } else {
        bump_revision_tx(&mut tx, user_id).await?;
    }
    tx.commit().await?;
    Ok(())
}

/// RemoveFileInfo(file-id) — removes the FileInfo row without stat changes
/// (used when no chunks have been committed yet, e.g. AddFileInfo followed
/// by a failed first chunk upload).
pub async fn remove_file_info(pool: &DbPool, file_id: i64) -> CoreResult<()> {
    let result = sqlx::query("DELETE FROM file_info WHERE id = ?")
        .bind(file_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(CoreError::NotFound(format!("file {file_id}")));
    }
    Ok(())
}

/// DeleteFileVersions(user, file-id, min-version, max-version,
/// current-version-number) — deletes versions in [min, max] inclusive,
/// subtracting their chunk bytes; rejects if max >= current-version-number.
pub async fn delete_file_versions(
    pool: &DbPool,
    user_id: i64,
    file_id: i64,
    min_version: i64,
    max_version: i64,
    current_version_number: i64,
) -> CoreResult<()> {
    if max_version >= current_version_number {
        return Err(CoreError::Conflict(
            "cannot delete the current version or any later version".to_string(),
        ));
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

    let ids: Vec<(i64,)> = sqlx::query_as(
        "SELECT id FROM file_version WHERE file_id = ? AND version_number >= ? AND version_number <= ?",
    )
    .bind(file_id)
    .bind(min_version)
    .bind(max_version)
    .fetch_all(&mut *tx)
    .await?;

    let mut freed = 0i64;
    for (version_id,) in &ids {
        let (bytes,): (Option<i64>,) =
            sqlx::query_as("SELECT SUM(LENGTH(bytes)) FROM file_chunk WHERE version_id = ?")
                .bind(version_id)
                .fetch_one(&mut *tx)
                .await?;
        freed += bytes.unwrap_or(0);
    }

    sqlx::query(
        "DELETE FROM file_version WHERE file_id = ? AND version_number >= ? AND version_number <= ?",
    )
    .bind(file_id)
    .bind(min_version)
    .bind(max_version)
    .execute(&mut *tx)
    .await?;

    if freed != 0 {
        super::users::update_user_stats_tx(&mut tx, user_id, -freed).await?;
    } else {
        bump_revision_tx(&mut tx, user_id).await?;
    }
    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::users::add_user;

    async fn test_pool() -> DbPool {
        let pool = super::super::create_pool("sqlite::memory:").await.unwrap();
        super::super::run_migrations(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn add_file_info_rejects_duplicate_name() {
        let pool = test_pool().await;
        let user = add_user(&pool, "alice", "s", b"v", 1_000_000).await.unwrap();
        add_file_info(&pool, user.id, "ciphertext-a", false, 0o644, 0, 2, "hash1")
            .await
            .unwrap();
        let err = add_file_info(&pool, user.id, "ciphertext-a", false, 0o644, 0, 2, "hash2")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn current_version_tracks_highest_version_number() {
        let pool = test_pool().await;
        let user = add_user(&pool, "bob", "s", b"v", 1_000_000).await.unwrap();
        let info = add_file_info(&pool, user.id, "ciphertext-b", false, 0o644, 0, 2, "hash1")
            .await
            .unwrap();
        let updated = tag_new_file_version(&pool, user.id, info.id, 0o644, 5, 3, "hash2")
            .await
            .unwrap();
        let versions = get_file_versions(&pool, info.id).await.unwrap();
        let current = get_file_version(&pool, updated.current_version_id.unwrap())
            .await
            .unwrap();
        assert_eq!(current.version_number, versions.iter().map(|v| v.version_number).max().unwrap());
    }

    #[tokio::test]
    async fn tag_new_version_rejects_non_owner() {
        let pool = test_pool().await;
        let owner = add_user(&pool, "carol", "s", b"v", 1_000_000).await.unwrap();
        let other = add_user(&pool, "dave", "s", b"v", 1_000_000).await.unwrap();
        let info = add_file_info(&pool, owner.id, "ciphertext-c", false, 0o644, 0, 1, "hash")
            .await
            .unwrap();
        let err = tag_new_file_version(&pool, other.id, info.id, 0o644, 1, 1, "hash2")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotOwned(_)));
    }
}
