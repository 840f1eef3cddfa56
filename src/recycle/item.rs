//! Recycle bin entries.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use crate::file::push_id_list;
use crate::{Result, VaultError};

const ITEM_COLUMNS: &str = "id, user_id, original_id, item_type, original_name, original_path, \
     original_folder_id, file_size, file_object_id, metadata, deleted_at, expires_at";

/// Kind of entity a recycle bin entry stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecycleItemType {
    File,
    Folder,
}

impl RecycleItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecycleItemType::File => "file",
            RecycleItemType::Folder => "folder",
        }
    }
}

impl fmt::Display for RecycleItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<String> for RecycleItemType {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        match s.as_str() {
            "file" => Ok(RecycleItemType::File),
            "folder" => Ok(RecycleItemType::Folder),
            _ => Err(format!("unknown recycle item type: {s}")),
        }
    }
}

/// Denormalized file details captured at deletion time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSnapshot {
    pub mime_type: String,
    pub is_image: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<i64>,
    pub content_hash: String,
    pub file_object_id: i64,
}

/// Folder details captured at deletion time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderSnapshot {
    pub parent_id: Option<i64>,
}

/// A row in the recycle bin.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct RecycleBinItem {
    pub id: i64,
    pub user_id: i64,
    /// Id of the soft-deleted file or folder.
    pub original_id: i64,
    #[sqlx(try_from = "String")]
    pub item_type: RecycleItemType,
    pub original_name: String,
    pub original_path: String,
    /// Folder (files) or parent folder (folders) at deletion time.
    pub original_folder_id: Option<i64>,
    pub file_size: i64,
    pub file_object_id: Option<i64>,
    /// JSON snapshot, see [`FileSnapshot`] and [`FolderSnapshot`].
    pub metadata: String,
    pub deleted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl RecycleBinItem {
    pub fn file_snapshot(&self) -> Option<FileSnapshot> {
        match self.item_type {
            RecycleItemType::File => serde_json::from_str(&self.metadata).ok(),
            RecycleItemType::Folder => None,
        }
    }

    pub fn folder_snapshot(&self) -> Option<FolderSnapshot> {
        match self.item_type {
            RecycleItemType::Folder => serde_json::from_str(&self.metadata).ok(),
            RecycleItemType::File => None,
        }
    }
}

/// Data for a new recycle bin entry.
#[derive(Debug, Clone)]
pub struct NewRecycleBinItem {
    pub user_id: i64,
    pub original_id: i64,
    pub item_type: RecycleItemType,
    pub original_name: String,
    pub original_path: String,
    pub original_folder_id: Option<i64>,
    pub file_size: i64,
    pub file_object_id: Option<i64>,
    pub metadata: String,
    pub deleted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl NewRecycleBinItem {
    /// Serialize a snapshot into the metadata column.
    pub fn encode_metadata<T: Serialize>(snapshot: &T) -> Result<String> {
        serde_json::to_string(snapshot)
            .map_err(|e| VaultError::Validation(format!("cannot encode recycle metadata: {e}")))
    }
}

/// Repository for recycle bin rows.
pub struct RecycleBinRepository;

impl RecycleBinRepository {
    pub async fn create(
        conn: &mut SqliteConnection,
        item: &NewRecycleBinItem,
    ) -> Result<RecycleBinItem> {
        let id = sqlx::query(
            "INSERT INTO recycle_bin (user_id, original_id, item_type, original_name, original_path,
                                      original_folder_id, file_size, file_object_id, metadata,
                                      deleted_at, expires_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(item.user_id)
        .bind(item.original_id)
        .bind(item.item_type.as_str())
        .bind(&item.original_name)
        .bind(&item.original_path)
        .bind(item.original_folder_id)
        .bind(item.file_size)
        .bind(item.file_object_id)
        .bind(&item.metadata)
        .bind(item.deleted_at)
        .bind(item.expires_at)
        .execute(&mut *conn)
        .await
        .map_err(|e| VaultError::Database(e.to_string()))?
        .last_insert_rowid();

        Self::get_by_id(conn, id)
            .await?
            .ok_or_else(|| VaultError::NotFound("recycle bin item".to_string()))
    }

    pub async fn get_by_id(conn: &mut SqliteConnection, id: i64) -> Result<Option<RecycleBinItem>> {
        let item = sqlx::query_as::<_, RecycleBinItem>(&format!(
            "SELECT {ITEM_COLUMNS} FROM recycle_bin WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(conn)
        .await
        .map_err(|e| VaultError::Database(e.to_string()))?;

        Ok(item)
    }

    /// Get an entry owned by `user_id`.
    pub async fn get_for_user(
        conn: &mut SqliteConnection,
        user_id: i64,
        id: i64,
    ) -> Result<Option<RecycleBinItem>> {
        let item = sqlx::query_as::<_, RecycleBinItem>(&format!(
            "SELECT {ITEM_COLUMNS} FROM recycle_bin WHERE id = ? AND user_id = ?"
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(conn)
        .await
        .map_err(|e| VaultError::Database(e.to_string()))?;

        Ok(item)
    }

    /// One page of a user's entries, newest first.
    pub async fn list_for_user(
        conn: &mut SqliteConnection,
        user_id: i64,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<RecycleBinItem>> {
        let items = sqlx::query_as::<_, RecycleBinItem>(&format!(
            "SELECT {ITEM_COLUMNS} FROM recycle_bin
             WHERE user_id = ?
             ORDER BY deleted_at DESC, id DESC
             LIMIT ? OFFSET ?"
        ))
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(conn)
        .await
        .map_err(|e| VaultError::Database(e.to_string()))?;

        Ok(items)
    }

    pub async fn count_for_user(conn: &mut SqliteConnection, user_id: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM recycle_bin WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(conn)
            .await
            .map_err(|e| VaultError::Database(e.to_string()))?;
        Ok(count)
    }

    /// Ids of every entry a user owns, oldest first.
    pub async fn list_ids_for_user(conn: &mut SqliteConnection, user_id: i64) -> Result<Vec<i64>> {
        let ids: Vec<i64> =
            sqlx::query_scalar("SELECT id FROM recycle_bin WHERE user_id = ? ORDER BY id")
                .bind(user_id)
                .fetch_all(conn)
                .await
                .map_err(|e| VaultError::Database(e.to_string()))?;
        Ok(ids)
    }

    /// Entries whose retention ran out before `now`.
    pub async fn list_expired(
        conn: &mut SqliteConnection,
        now: DateTime<Utc>,
    ) -> Result<Vec<RecycleBinItem>> {
        let items = sqlx::query_as::<_, RecycleBinItem>(&format!(
            "SELECT {ITEM_COLUMNS} FROM recycle_bin WHERE expires_at < ? ORDER BY expires_at, id"
        ))
        .bind(now)
        .fetch_all(conn)
        .await
        .map_err(|e| VaultError::Database(e.to_string()))?;

        Ok(items)
    }

    pub async fn delete(conn: &mut SqliteConnection, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM recycle_bin WHERE id = ?")
            .bind(id)
            .execute(conn)
            .await
            .map_err(|e| VaultError::Database(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove every entry of a user that stands for one of `original_ids`.
    pub async fn delete_for_originals(
        conn: &mut SqliteConnection,
        user_id: i64,
        item_type: RecycleItemType,
        original_ids: &[i64],
    ) -> Result<u64> {
        if original_ids.is_empty() {
            return Ok(0);
        }
        let mut query = QueryBuilder::<Sqlite>::new("DELETE FROM recycle_bin WHERE user_id = ");
        query.push_bind(user_id);
        query.push(" AND item_type = ");
        query.push_bind(item_type.as_str());
        query.push(" AND original_id IN ");
        push_id_list(&mut query, original_ids);

        let result = query
            .build()
            .execute(conn)
            .await
            .map_err(|e| VaultError::Database(e.to_string()))?;
        Ok(result.rows_affected())
    }

    pub async fn delete_all_for_user(conn: &mut SqliteConnection, user_id: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM recycle_bin WHERE user_id = ?")
            .bind(user_id)
            .execute(conn)
            .await
            .map_err(|e| VaultError::Database(e.to_string()))?;
        Ok(result.rows_affected())
    }
}
