//! §4.3 catalog operations on User/UserStats.

use super::models::{User, UserStats};
use super::DbPool;
use crate::error::{CoreError, CoreResult};

pub async fn is_name_free(pool: &DbPool, name: &str) -> CoreResult<bool> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM users WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?;
    Ok(row.is_none())
}

pub async fn add_user(
    pool: &DbPool,
    name: &str,
    login_salt: &str,
    login_verifier: &[u8],
    quota_bytes: i64,
) -> CoreResult<User> {
    let mut tx = pool.begin().await?;
    let existing: Option<(i64,)> = sqlx::query_as("SELECT id FROM users WHERE name = ?")
        .bind(name)
        .fetch_optional(&mut *tx)
        .await?;
    if existing.is_some() {
        return Err(CoreError::Conflict(format!("user {name} already exists")));
    }
    let id: (i64,) = sqlx::query_as(
        "INSERT INTO users (name, login_salt, login_verifier, crypto_verifier, quota_bytes)
         VALUES (?, ?, ?, x'', ?) RETURNING id",
    )
    .bind(name)
    .bind(login_salt)
    .bind(login_verifier)
    .bind(quota_bytes)
    .fetch_one(&mut *tx)
    .await?;
    sqlx::query("INSERT INTO user_stats (user_id, allocated_bytes, revision) VALUES (?, 0, 0)")
        .bind(id.0)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(User {
        id: id.0,
        name: name.to_string(),
        login_salt: login_salt.to_string(),
        login_verifier: login_verifier.to_vec(),
        crypto_verifier: Vec::new(),
        quota_bytes,
    })
}

pub async fn remove_user(pool: &DbPool, name: &str) -> CoreResult<()> {
    let result = sqlx::query("DELETE FROM users WHERE name = ?")
        .bind(name)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(CoreError::NotFound(format!("user {name}")));
    }
    Ok(())
}

#[derive(Default)]
pub struct UserUpdate {
    pub new_name: Option<String>,
    pub new_login_salt: Option<String>,
    pub new_login_verifier: Option<Vec<u8>>,
    pub new_crypto_verifier: Option<Vec<u8>>,
    pub new_quota: Option<i64>,
}

pub async fn update_user(pool: &DbPool, id: i64, update: UserUpdate) -> CoreResult<()> {
    let current = get_user_by_id(pool, id).await?;
    let name = update.new_name.unwrap_or(current.name);
    let login_salt = update.new_login_salt.unwrap_or(current.login_salt);
    let login_verifier = update.new_login_verifier.unwrap_or(current.login_verifier);
    let crypto_verifier = update.new_crypto_verifier.unwrap_or(current.crypto_verifier);
    let quota = update.new_quota.unwrap_or(current.quota_bytes);
    sqlx::query(
        "UPDATE users SET name = ?, login_salt = ?, login_verifier = ?, crypto_verifier = ?, quota_bytes = ?
         WHERE id = ?",
    )
    .bind(name)
    .bind(login_salt)
    .bind(login_verifier)
    .bind(crypto_verifier)
    .bind(quota)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn set_user_crypto_verifier(pool: &DbPool, id: i64, verifier: &[u8]) -> CoreResult<()> {
    let result = sqlx::query("UPDATE users SET crypto_verifier = ? WHERE id = ?")
        .bind(verifier)
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(CoreError::NotFound(format!("user id {id}")));
    }
    Ok(())
}

pub async fn get_user(pool: &DbPool, name: &str) -> CoreResult<User> {
    let row: Option<(i64, String, String, Vec<u8>, Vec<u8>, i64)> = sqlx::query_as(
        "SELECT id, name, login_salt, login_verifier, crypto_verifier, quota_bytes FROM users WHERE name = ?",
    )
    .bind(name)
    .fetch_optional(pool)
    .await?;
    row.map(user_from_row)
        .ok_or_else(|| CoreError::NotFound(format!("user {name}")))
}

pub async fn get_user_by_id(pool: &DbPool, id: i64) -> CoreResult<User> {
    let row: Option<(i64, String, String, Vec<u8>, Vec<u8>, i64)> = sqlx::query_as(
        "SELECT id, name, login_salt, login_verifier, crypto_verifier, quota_bytes FROM users WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.map(user_from_row)
        .ok_or_else(|| CoreError::NotFound(format!("user id {id}")))
}

fn user_from_row(row: (i64, String, String, Vec<u8>, Vec<u8>, i64)) -> User {
    User {
        id: row.0,
        name: row.1,
        login_salt: row.2,
        login_verifier: row.3,
        crypto_verifier: row.4,
        quota_bytes: row.5,
    }
}

pub async fn get_user_stats(pool: &DbPool, id: i64) -> CoreResult<UserStats> {
    let row: Option<(i64, i64, i64)> = sqlx::query_as(
        "SELECT u.quota_bytes, s.allocated_bytes, s.revision
         FROM users u JOIN user_stats s ON s.user_id = u.id WHERE u.id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.map(|(quota, allocated, revision)| UserStats {
        quota,
        allocated,
        revision,
    })
    .ok_or_else(|| CoreError::NotFound(format!("user id {id}")))
}

pub async fn set_user_stats(
    pool: &DbPool,
    id: i64,
    quota: i64,
    allocated: i64,
    revision: i64,
) -> CoreResult<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("UPDATE users SET quota_bytes = ? WHERE id = ?")
        .bind(quota)
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("UPDATE user_stats SET allocated_bytes = ?, revision = ? WHERE user_id = ?")
        .bind(allocated)
        .bind(revision)
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

/// Atomically adjust `allocated_bytes` by `delta` and bump `revision` by one
/// (I5). Used by every mutation that changes stored bytes; callers run this
/// inside the same transaction as the row change it accompanies.
pub async fn update_user_stats_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    id: i64,
    delta_bytes: i64,
) -> CoreResult<()> {
    sqlx::query(
        "UPDATE user_stats SET allocated_bytes = allocated_bytes + ?, revision = revision + 1
         WHERE user_id = ?",
    )
    .bind(delta_bytes)
    .bind(id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Bump revision alone, without changing allocated bytes — used for
/// FileInfo-only mutations. Open Question (a) in the specification notes the
/// source is inconsistent about whether these bump revision; this
/// implementation always does, so a client polling revision never misses a
/// file-set change.
pub async fn bump_revision_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    id: i64,
) -> CoreResult<()> {
    sqlx::query("UPDATE user_stats SET revision = revision + 1 WHERE user_id = ?")
        .bind(id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_pool() -> DbPool {
        let pool = super::super::create_pool("sqlite::memory:").await.unwrap();
        super::super::run_migrations(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn add_user_rejects_duplicate_name() {
        let pool = test_pool().await;
        add_user(&pool, "alice", "salt", b"verifier", 1_000_000)
            .await
            .unwrap();
        let err = add_user(&pool, "alice", "salt2", b"verifier2", 1_000_000)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn new_user_starts_with_zero_allocation_and_revision() {
        let pool = test_pool().await;
        let user = add_user(&pool, "bob", "salt", b"v", 1_000).await.unwrap();
        let stats = get_user_stats(&pool, user.id).await.unwrap();
        assert_eq!(stats.allocated, 0);
        assert_eq!(stats.revision, 0);
        assert_eq!(stats.quota, 1_000);
    }

    #[tokio::test]
    async fn remove_user_clears_name_for_reuse() {
        let pool = test_pool().await;
        add_user(&pool, "carol", "salt", b"v", 1_000).await.unwrap();
        remove_user(&pool, "carol").await.unwrap();
        assert!(is_name_free(&pool, "carol").await.unwrap());
    }
}
