//! User repository for filevault.
//!
//! Besides CRUD, this is the quota accessor used by the upload paths:
//! usage is only ever changed with single-statement relative updates.

use chrono::Utc;
use sqlx::SqliteConnection;

use super::user::{NewUser, StorageInfo, User};
use crate::{Result, VaultError};

/// Repository for user rows and storage accounting.
pub struct UserRepository;

impl UserRepository {
    /// Create a new user in the database.
    pub async fn create(conn: &mut SqliteConnection, new_user: &NewUser) -> Result<User> {
        let result = sqlx::query(
            "INSERT INTO users (username, storage_quota, storage_used, created_at)
             VALUES (?, ?, 0, ?)",
        )
        .bind(&new_user.username)
        .bind(new_user.storage_quota)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await
        .map_err(|e| VaultError::Database(e.to_string()))?;

        let id = result.last_insert_rowid();
        Self::get_by_id(conn, id)
            .await?
            .ok_or_else(|| VaultError::NotFound("user".to_string()))
    }

    /// Get a user by ID.
    pub async fn get_by_id(conn: &mut SqliteConnection, id: i64) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, storage_quota, storage_used, created_at FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(conn)
        .await
        .map_err(|e| VaultError::Database(e.to_string()))?;

        Ok(user)
    }

    /// Get quota / usage for a user.
    pub async fn storage_info(conn: &mut SqliteConnection, id: i64) -> Result<StorageInfo> {
        Self::get_by_id(conn, id)
            .await?
            .map(|u| u.storage_info())
            .ok_or_else(|| VaultError::NotFound("user".to_string()))
    }

    /// Fail with `QuotaExceeded` unless `required` more bytes fit.
    pub async fn ensure_quota(
        conn: &mut SqliteConnection,
        id: i64,
        required: i64,
    ) -> Result<StorageInfo> {
        let info = Self::storage_info(conn, id).await?;
        if !info.has_room_for(required) {
            return Err(VaultError::QuotaExceeded {
                quota: info.quota,
                used: info.used,
                available: info.available,
                required,
            });
        }
        Ok(info)
    }

    /// Atomically add to the user's storage usage.
    pub async fn add_storage_used(conn: &mut SqliteConnection, id: i64, bytes: i64) -> Result<()> {
        let result = sqlx::query("UPDATE users SET storage_used = storage_used + ? WHERE id = ?")
            .bind(bytes)
            .bind(id)
            .execute(conn)
            .await
            .map_err(|e| VaultError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(VaultError::NotFound("user".to_string()));
        }
        Ok(())
    }

    /// Atomically subtract from the user's storage usage, floored at zero.
    pub async fn sub_storage_used(conn: &mut SqliteConnection, id: i64, bytes: i64) -> Result<()> {
        sqlx::query("UPDATE users SET storage_used = MAX(storage_used - ?, 0) WHERE id = ?")
            .bind(bytes)
            .bind(id)
            .execute(conn)
            .await
            .map_err(|e| VaultError::Database(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    async fn setup_db() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn test_create_and_get_user() {
        let db = setup_db().await;
        let mut conn = db.acquire().await.unwrap();

        let user = UserRepository::create(&mut conn, &NewUser::new("alice", 1000))
            .await
            .unwrap();
        assert_eq!(user.username, "alice");
        assert_eq!(user.storage_quota, 1000);
        assert_eq!(user.storage_used, 0);

        let fetched = UserRepository::get_by_id(&mut conn, user.id).await.unwrap();
        assert_eq!(fetched.unwrap().username, "alice");
        assert!(UserRepository::get_by_id(&mut conn, 999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_storage_accounting_floors_at_zero() {
        let db = setup_db().await;
        let mut conn = db.acquire().await.unwrap();
        let user = UserRepository::create(&mut conn, &NewUser::new("bob", 1000))
            .await
            .unwrap();

        UserRepository::add_storage_used(&mut conn, user.id, 300)
            .await
            .unwrap();
        UserRepository::sub_storage_used(&mut conn, user.id, 100)
            .await
            .unwrap();
        let info = UserRepository::storage_info(&mut conn, user.id).await.unwrap();
        assert_eq!(info.used, 200);
        assert_eq!(info.available, 800);

        UserRepository::sub_storage_used(&mut conn, user.id, 5000)
            .await
            .unwrap();
        let info = UserRepository::storage_info(&mut conn, user.id).await.unwrap();
        assert_eq!(info.used, 0);
    }

    #[tokio::test]
    async fn test_ensure_quota() {
        let db = setup_db().await;
        let mut conn = db.acquire().await.unwrap();
        let user = UserRepository::create(&mut conn, &NewUser::new("carol", 100))
            .await
            .unwrap();
        UserRepository::add_storage_used(&mut conn, user.id, 90)
            .await
            .unwrap();

        assert!(UserRepository::ensure_quota(&mut conn, user.id, 10).await.is_ok());
        let err = UserRepository::ensure_quota(&mut conn, user.id, 25)
            .await
            .unwrap_err();
        match err {
            VaultError::QuotaExceeded {
                quota,
                used,
                available,
                required,
            } => {
                assert_eq!((quota, used, available, required), (100, 90, 10, 25));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_add_storage_unknown_user() {
        let db = setup_db().await;
        let mut conn = db.acquire().await.unwrap();
        let result = UserRepository::add_storage_used(&mut conn, 42, 10).await;
        assert!(matches!(result, Err(VaultError::NotFound(_))));
    }
}
