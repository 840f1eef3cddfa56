//! Physical file objects.
//!
//! A `FileObject` is one deduplicated blob on disk. Logical files point at
//! it and `ref_count` tracks how many do; the counter is only ever changed
//! with single-statement relative updates.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::{Result, VaultError};

const OBJECT_COLUMNS: &str = "id, file_path, thumbnail_path, file_size, mime_type, is_image, \
     width, height, content_hash, ref_count, created_at";

/// A deduplicated physical blob.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FileObject {
    pub id: i64,
    /// Blob path relative to the store base.
    pub file_path: String,
    pub thumbnail_path: Option<String>,
    pub file_size: i64,
    pub mime_type: String,
    pub is_image: bool,
    pub width: Option<i64>,
    pub height: Option<i64>,
    /// Lowercase hex SHA-256 of the content.
    pub content_hash: String,
    pub ref_count: i64,
    pub created_at: DateTime<Utc>,
}

impl FileObject {
    /// Last component of the blob path, i.e. the stored name.
    pub fn stored_name(&self) -> &str {
        self.file_path
            .rsplit('/')
            .next()
            .unwrap_or(self.file_path.as_str())
    }
}

/// Data for creating a file object.
#[derive(Debug, Clone, Default)]
pub struct NewFileObject {
    pub file_path: String,
    pub thumbnail_path: Option<String>,
    pub file_size: i64,
    pub mime_type: String,
    pub is_image: bool,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub content_hash: String,
}

/// Repository for file object rows.
pub struct FileObjectRepository;

impl FileObjectRepository {
    /// Insert a new object with a reference count of 1.
    pub async fn create(conn: &mut SqliteConnection, object: &NewFileObject) -> Result<FileObject> {
        let result = sqlx::query(
            "INSERT INTO file_objects (file_path, thumbnail_path, file_size, mime_type, is_image,
                                       width, height, content_hash, ref_count, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, ?)",
        )
        .bind(&object.file_path)
        .bind(&object.thumbnail_path)
        .bind(object.file_size)
        .bind(&object.mime_type)
        .bind(object.is_image)
        .bind(object.width)
        .bind(object.height)
        .bind(&object.content_hash)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await
        .map_err(|e| VaultError::Database(e.to_string()))?;

        let id = result.last_insert_rowid();
        Self::get_by_id(conn, id)
            .await?
            .ok_or_else(|| VaultError::NotFound("file object".to_string()))
    }

    /// Get an object by ID.
    pub async fn get_by_id(conn: &mut SqliteConnection, id: i64) -> Result<Option<FileObject>> {
        let object = sqlx::query_as::<_, FileObject>(&format!(
            "SELECT {OBJECT_COLUMNS} FROM file_objects WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(conn)
        .await
        .map_err(|e| VaultError::Database(e.to_string()))?;

        Ok(object)
    }

    /// Find an object with `hash` reachable through one of the user's
    /// non-deleted files.
    pub async fn find_by_user_and_hash(
        conn: &mut SqliteConnection,
        user_id: i64,
        hash: &str,
    ) -> Result<Option<FileObject>> {
        let object = sqlx::query_as::<_, FileObject>(
            "SELECT o.id, o.file_path, o.thumbnail_path, o.file_size, o.mime_type, o.is_image,
                    o.width, o.height, o.content_hash, o.ref_count, o.created_at
             FROM file_objects o
             JOIN files f ON f.object_id = o.id
             WHERE f.user_id = ? AND o.content_hash = ? AND f.deleted_at IS NULL
             ORDER BY o.id
             LIMIT 1",
        )
        .bind(user_id)
        .bind(hash.to_lowercase())
        .fetch_optional(conn)
        .await
        .map_err(|e| VaultError::Database(e.to_string()))?;

        Ok(object)
    }

    /// Atomically add one reference.
    pub async fn increment_ref(conn: &mut SqliteConnection, id: i64) -> Result<()> {
        let result = sqlx::query("UPDATE file_objects SET ref_count = ref_count + 1 WHERE id = ?")
            .bind(id)
            .execute(conn)
            .await
            .map_err(|e| VaultError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(VaultError::NotFound("file object".to_string()));
        }
        Ok(())
    }

    /// Atomically drop one reference, returning the new count.
    ///
    /// Returns `None` if the object does not exist or is already at zero.
    pub async fn decrement_ref(conn: &mut SqliteConnection, id: i64) -> Result<Option<i64>> {
        let remaining: Option<i64> = sqlx::query_scalar(
            "UPDATE file_objects SET ref_count = ref_count - 1
             WHERE id = ? AND ref_count > 0
             RETURNING ref_count",
        )
        .bind(id)
        .fetch_optional(conn)
        .await
        .map_err(|e| VaultError::Database(e.to_string()))?;

        Ok(remaining)
    }

    /// Delete an object row that no file references any more.
    pub async fn delete_unreferenced(conn: &mut SqliteConnection, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM file_objects WHERE id = ? AND ref_count = 0")
            .bind(id)
            .execute(conn)
            .await
            .map_err(|e| VaultError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}
