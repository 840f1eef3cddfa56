//! Upload sessions.
//!
//! One `UploadTask` row exists per in-flight resumable upload. It is
//! created at init, flipped to `completed` in the same transaction that
//! commits the file, and deleted by the reaper if it expires first.

use std::fmt;

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::{Result, VaultError};

const TASK_COLUMNS: &str = "id, upload_id, user_id, folder_id, file_name, file_size, file_hash, \
     chunk_size, total_chunks, status, temp_dir, created_at, expires_at";

/// Upload session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UploadStatus {
    #[default]
    Uploading,
    Completed,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Uploading => "uploading",
            UploadStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<String> for UploadStatus {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        match s.as_str() {
            "uploading" => Ok(UploadStatus::Uploading),
            "completed" => Ok(UploadStatus::Completed),
            _ => Err(format!("unknown upload status: {s}")),
        }
    }
}

/// A resumable upload session.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UploadTask {
    pub id: i64,
    /// Opaque session token handed to the client.
    pub upload_id: String,
    pub user_id: i64,
    /// Concrete target folder id (never the `0` alias).
    pub folder_id: i64,
    pub file_name: String,
    pub file_size: i64,
    /// Declared content hash, lowercase hex.
    pub file_hash: String,
    pub chunk_size: i64,
    pub total_chunks: i64,
    #[sqlx(try_from = "String")]
    pub status: UploadStatus,
    /// Chunk directory relative to the blob store base.
    pub temp_dir: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl UploadTask {
    pub fn is_completed(&self) -> bool {
        self.status == UploadStatus::Completed
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// Data for creating an upload session.
#[derive(Debug, Clone)]
pub struct NewUploadTask {
    pub upload_id: String,
    pub user_id: i64,
    pub folder_id: i64,
    pub file_name: String,
    pub file_size: i64,
    pub file_hash: String,
    pub chunk_size: i64,
    pub total_chunks: i64,
    pub temp_dir: String,
    pub expires_at: DateTime<Utc>,
}

/// Number of chunks needed for `file_size` bytes; an empty file still
/// takes one (empty) chunk.
pub fn chunk_count(file_size: i64, chunk_size: i64) -> i64 {
    if file_size <= 0 || chunk_size <= 0 {
        return 1;
    }
    (file_size + chunk_size - 1) / chunk_size
}

/// Repository for upload sessions.
pub struct UploadTaskRepository;

impl UploadTaskRepository {
    /// Persist a new session in `uploading` state.
    pub async fn create(conn: &mut SqliteConnection, task: &NewUploadTask) -> Result<UploadTask> {
        sqlx::query(
            "INSERT INTO upload_tasks (upload_id, user_id, folder_id, file_name, file_size, file_hash,
                                       chunk_size, total_chunks, status, temp_dir, created_at, expires_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&task.upload_id)
        .bind(task.user_id)
        .bind(task.folder_id)
        .bind(&task.file_name)
        .bind(task.file_size)
        .bind(&task.file_hash)
        .bind(task.chunk_size)
        .bind(task.total_chunks)
        .bind(UploadStatus::Uploading.as_str())
        .bind(&task.temp_dir)
        .bind(Utc::now())
        .bind(task.expires_at)
        .execute(&mut *conn)
        .await
        .map_err(|e| VaultError::Database(e.to_string()))?;

        Self::get_by_upload_id(conn, &task.upload_id)
            .await?
            .ok_or_else(|| VaultError::NotFound("upload task".to_string()))
    }

    /// Get a session by its token.
    pub async fn get_by_upload_id(
        conn: &mut SqliteConnection,
        upload_id: &str,
    ) -> Result<Option<UploadTask>> {
        let task = sqlx::query_as::<_, UploadTask>(&format!(
            "SELECT {TASK_COLUMNS} FROM upload_tasks WHERE upload_id = ?"
        ))
        .bind(upload_id)
        .fetch_optional(conn)
        .await
        .map_err(|e| VaultError::Database(e.to_string()))?;

        Ok(task)
    }

    /// Flip a session from `uploading` to `completed`.
    ///
    /// Returns false if the session was not in `uploading` state.
    pub async fn mark_completed(conn: &mut SqliteConnection, upload_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE upload_tasks SET status = ? WHERE upload_id = ? AND status = ?",
        )
        .bind(UploadStatus::Completed.as_str())
        .bind(upload_id)
        .bind(UploadStatus::Uploading.as_str())
        .execute(conn)
        .await
        .map_err(|e| VaultError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    /// List sessions past their expiry that never completed.
    pub async fn list_expired(
        conn: &mut SqliteConnection,
        now: DateTime<Utc>,
    ) -> Result<Vec<UploadTask>> {
        let tasks = sqlx::query_as::<_, UploadTask>(&format!(
            "SELECT {TASK_COLUMNS} FROM upload_tasks
             WHERE status != ? AND expires_at < ?
             ORDER BY expires_at"
        ))
        .bind(UploadStatus::Completed.as_str())
        .bind(now)
        .fetch_all(conn)
        .await
        .map_err(|e| VaultError::Database(e.to_string()))?;

        Ok(tasks)
    }

    /// Delete a session row.
    pub async fn delete(conn: &mut SqliteConnection, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM upload_tasks WHERE id = ?")
            .bind(id)
            .execute(conn)
            .await
            .map_err(|e| VaultError::Database(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }
}
