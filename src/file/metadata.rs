//! Logical file entries and their repository.

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use super::folder::{push_id_list, Visibility};
use crate::{Result, VaultError};

const FILE_COLUMNS: &str = "id, user_id, folder_id, object_id, stored_name, original_name, \
     created_at, updated_at, deleted_at, deleted_by";

/// A file as the user sees it in the folder tree.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FileEntry {
    pub id: i64,
    pub user_id: i64,
    pub folder_id: i64,
    /// Backing physical object (shared, ref-counted).
    pub object_id: i64,
    /// Generated name on disk (`{uuid}_{sanitized}`).
    pub stored_name: String,
    /// Display name.
    pub original_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<i64>,
}

impl FileEntry {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Data for creating a new file entry.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub user_id: i64,
    pub folder_id: i64,
    pub object_id: i64,
    pub stored_name: String,
    pub original_name: String,
}

impl NewFile {
    pub fn new(
        user_id: i64,
        folder_id: i64,
        object_id: i64,
        stored_name: impl Into<String>,
        original_name: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            folder_id,
            object_id,
            stored_name: stored_name.into(),
            original_name: original_name.into(),
        }
    }
}

/// Builder for updating a file entry.
#[derive(Debug, Clone, Default)]
pub struct FileUpdate {
    pub original_name: Option<String>,
    pub folder_id: Option<i64>,
}

impl FileUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the display name.
    pub fn original_name(mut self, name: impl Into<String>) -> Self {
        self.original_name = Some(name.into());
        self
    }

    /// Set the containing folder.
    pub fn folder_id(mut self, folder_id: i64) -> Self {
        self.folder_id = Some(folder_id);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.original_name.is_none() && self.folder_id.is_none()
    }
}

/// Repository for logical file rows.
pub struct FileRepository;

impl FileRepository {
    /// Create a new file entry.
    pub async fn create(conn: &mut SqliteConnection, file: &NewFile) -> Result<FileEntry> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO files (user_id, folder_id, object_id, stored_name, original_name,
                                created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(file.user_id)
        .bind(file.folder_id)
        .bind(file.object_id)
        .bind(&file.stored_name)
        .bind(&file.original_name)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(|e| VaultError::Database(e.to_string()))?;

        let id = result.last_insert_rowid();
        Self::get_by_id(conn, id)
            .await?
            .ok_or_else(|| VaultError::NotFound("file".to_string()))
    }

    /// Get a file by ID regardless of owner or soft-delete state.
    pub async fn get_by_id(conn: &mut SqliteConnection, id: i64) -> Result<Option<FileEntry>> {
        let file = sqlx::query_as::<_, FileEntry>(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(conn)
        .await
        .map_err(|e| VaultError::Database(e.to_string()))?;

        Ok(file)
    }

    /// Get an active file owned by `user_id`.
    pub async fn get_active(
        conn: &mut SqliteConnection,
        user_id: i64,
        id: i64,
    ) -> Result<Option<FileEntry>> {
        let file = sqlx::query_as::<_, FileEntry>(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE id = ? AND user_id = ? AND deleted_at IS NULL"
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(conn)
        .await
        .map_err(|e| VaultError::Database(e.to_string()))?;

        Ok(file)
    }

    /// List active files in a folder, sorted by display name.
    pub async fn list_by_folder(
        conn: &mut SqliteConnection,
        user_id: i64,
        folder_id: i64,
    ) -> Result<Vec<FileEntry>> {
        let files = sqlx::query_as::<_, FileEntry>(&format!(
            "SELECT {FILE_COLUMNS} FROM files
             WHERE user_id = ? AND folder_id = ? AND deleted_at IS NULL
             ORDER BY original_name, id"
        ))
        .bind(user_id)
        .bind(folder_id)
        .fetch_all(conn)
        .await
        .map_err(|e| VaultError::Database(e.to_string()))?;

        Ok(files)
    }

    /// List files in any of the given folders.
    pub async fn list_in_folders(
        conn: &mut SqliteConnection,
        folder_ids: &[i64],
        visibility: Visibility,
    ) -> Result<Vec<FileEntry>> {
        if folder_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut query =
            QueryBuilder::<Sqlite>::new(format!("SELECT {FILE_COLUMNS} FROM files WHERE folder_id IN "));
        push_id_list(&mut query, folder_ids);
        visibility.push_filter(&mut query, "deleted_at");
        query.push(" ORDER BY id");

        let files = query
            .build_query_as::<FileEntry>()
            .fetch_all(conn)
            .await
            .map_err(|e| VaultError::Database(e.to_string()))?;
        Ok(files)
    }

    /// Thumbnail paths of the user's active files among `ids`, keyed by
    /// file ID. Files without a thumbnail map to `None`.
    pub async fn thumbnail_paths(
        conn: &mut SqliteConnection,
        user_id: i64,
        ids: &[i64],
    ) -> Result<Vec<(i64, Option<String>)>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT f.id, o.thumbnail_path FROM files f
             JOIN file_objects o ON o.id = f.object_id
             WHERE f.deleted_at IS NULL AND f.user_id = ",
        );
        query.push_bind(user_id);
        query.push(" AND f.id IN ");
        push_id_list(&mut query, ids);

        let rows = query
            .build_query_as::<(i64, Option<String>)>()
            .fetch_all(conn)
            .await
            .map_err(|e| VaultError::Database(e.to_string()))?;
        Ok(rows)
    }

    /// Whether an active file named `name` exists in the folder.
    pub async fn name_exists(
        conn: &mut SqliteConnection,
        user_id: i64,
        folder_id: i64,
        name: &str,
        exclude_id: Option<i64>,
    ) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(
                SELECT 1 FROM files
                WHERE user_id = ? AND folder_id = ? AND original_name = ?
                  AND deleted_at IS NULL AND id != ?
             )",
        )
        .bind(user_id)
        .bind(folder_id)
        .bind(name)
        .bind(exclude_id.unwrap_or(0))
        .fetch_one(conn)
        .await
        .map_err(|e| VaultError::Database(e.to_string()))?;

        Ok(exists)
    }

    /// Update a file entry. Returns false if no row matched.
    pub async fn update(conn: &mut SqliteConnection, id: i64, update: &FileUpdate) -> Result<bool> {
        if update.is_empty() {
            return Ok(true);
        }

        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE files SET ");
        let mut separated = query.separated(", ");
        if let Some(ref name) = update.original_name {
            separated.push("original_name = ");
            separated.push_bind_unseparated(name.clone());
        }
        if let Some(folder_id) = update.folder_id {
            separated.push("folder_id = ");
            separated.push_bind_unseparated(folder_id);
        }
        separated.push("updated_at = ");
        separated.push_bind_unseparated(Utc::now());

        query.push(" WHERE id = ");
        query.push_bind(id);

        let result = query
            .build()
            .execute(conn)
            .await
            .map_err(|e| VaultError::Database(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }

    /// Soft-delete a single file.
    pub async fn soft_delete(
        conn: &mut SqliteConnection,
        id: i64,
        deleted_by: i64,
        deleted_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE files SET deleted_at = ?, deleted_by = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(deleted_at)
        .bind(deleted_by)
        .bind(id)
        .execute(conn)
        .await
        .map_err(|e| VaultError::Database(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }

    /// Soft-delete every active file in the given folders.
    pub async fn soft_delete_in_folders(
        conn: &mut SqliteConnection,
        folder_ids: &[i64],
        deleted_by: i64,
        deleted_at: DateTime<Utc>,
    ) -> Result<u64> {
        if folder_ids.is_empty() {
            return Ok(0);
        }
        let mut query = QueryBuilder::<Sqlite>::new("UPDATE files SET deleted_at = ");
        query.push_bind(deleted_at);
        query.push(", deleted_by = ");
        query.push_bind(deleted_by);
        query.push(" WHERE deleted_at IS NULL AND folder_id IN ");
        push_id_list(&mut query, folder_ids);

        let result = query
            .build()
            .execute(conn)
            .await
            .map_err(|e| VaultError::Database(e.to_string()))?;
        Ok(result.rows_affected())
    }

    /// Clear the soft-delete marker and place the file.
    pub async fn restore(
        conn: &mut SqliteConnection,
        id: i64,
        folder_id: i64,
        original_name: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE files SET deleted_at = NULL, deleted_by = NULL, folder_id = ?,
                              original_name = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(folder_id)
        .bind(original_name)
        .bind(Utc::now())
        .bind(id)
        .execute(conn)
        .await
        .map_err(|e| VaultError::Database(e.to_string()))?;
        Ok(())
    }

    /// Clear the soft-delete marker of the files deleted together with
    /// the given folders. Returns the restored files.
    pub async fn restore_in_folders(
        conn: &mut SqliteConnection,
        folder_ids: &[i64],
        deleted_at: DateTime<Utc>,
    ) -> Result<Vec<FileEntry>> {
        let files =
            Self::list_in_folders(&mut *conn, folder_ids, Visibility::DeletedAt(deleted_at)).await?;
        if files.is_empty() {
            return Ok(files);
        }

        let ids: Vec<i64> = files.iter().map(|f| f.id).collect();
        let mut query = QueryBuilder::<Sqlite>::new(
            "UPDATE files SET deleted_at = NULL, deleted_by = NULL, updated_at = ",
        );
        query.push_bind(Utc::now());
        query.push(" WHERE id IN ");
        push_id_list(&mut query, &ids);
        query
            .build()
            .execute(conn)
            .await
            .map_err(|e| VaultError::Database(e.to_string()))?;

        Ok(files)
    }

    /// Hard-delete a file row.
    pub async fn hard_delete(conn: &mut SqliteConnection, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(id)
            .execute(conn)
            .await
            .map_err(|e| VaultError::Database(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }
}
