//! Folder types and repository for filevault.
//!
//! Folders form a per-user tree with a denormalized `path`. Subtrees are
//! walked through `parent_id`; `path` is kept equal to the parent's path
//! joined with the folder name for every row, deleted ones included.

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use crate::{Result, VaultError};

const FOLDER_COLUMNS: &str =
    "id, user_id, parent_id, name, path, is_root, created_at, updated_at, deleted_at";

/// A folder in a user's tree.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Folder {
    pub id: i64,
    pub user_id: i64,
    /// Parent folder ID (None for the root).
    pub parent_id: Option<i64>,
    pub name: String,
    /// Materialized path, `/` for the root, `/a/b` below it.
    pub path: String,
    pub is_root: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Soft-delete marker.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Folder {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Data for creating a new folder.
#[derive(Debug, Clone)]
pub struct NewFolder {
    pub user_id: i64,
    pub parent_id: i64,
    pub name: String,
    pub path: String,
}

/// Which rows a query should see with respect to the soft-delete marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Only rows without a soft-delete marker.
    Active,
    /// Only soft-deleted rows.
    Deleted,
    /// Only rows soft-deleted at exactly this instant (one delete operation).
    DeletedAt(DateTime<Utc>),
    /// Ignore the marker.
    Any,
}

impl Visibility {
    pub(crate) fn push_filter(self, query: &mut QueryBuilder<'_, Sqlite>, column: &str) {
        match self {
            Visibility::Active => {
                query.push(format!(" AND {column} IS NULL"));
            }
            Visibility::Deleted => {
                query.push(format!(" AND {column} IS NOT NULL"));
            }
            Visibility::DeletedAt(at) => {
                query.push(format!(" AND {column} = "));
                query.push_bind(at);
            }
            Visibility::Any => {}
        }
    }
}

pub(crate) fn push_id_list(query: &mut QueryBuilder<'_, Sqlite>, ids: &[i64]) {
    query.push("(");
    let mut separated = query.separated(", ");
    for id in ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(")");
}

/// Repository for folder rows.
pub struct FolderRepository;

impl FolderRepository {
    /// Create a new folder.
    pub async fn create(conn: &mut SqliteConnection, folder: &NewFolder) -> Result<Folder> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO folders (user_id, parent_id, name, path, is_root, created_at, updated_at)
             VALUES (?, ?, ?, ?, 0, ?, ?)",
        )
        .bind(folder.user_id)
        .bind(folder.parent_id)
        .bind(&folder.name)
        .bind(&folder.path)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(|e| VaultError::Database(e.to_string()))?;

        let id = result.last_insert_rowid();
        Self::get_by_id(conn, id)
            .await?
            .ok_or_else(|| VaultError::NotFound("folder".to_string()))
    }

    /// Insert the user's root folder unless one exists already.
    pub async fn insert_root_if_absent(conn: &mut SqliteConnection, user_id: i64) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            "INSERT OR IGNORE INTO folders (user_id, parent_id, name, path, is_root, created_at, updated_at)
             VALUES (?, NULL, '', '/', 1, ?, ?)",
        )
        .bind(user_id)
        .bind(now)
        .bind(now)
        .execute(conn)
        .await
        .map_err(|e| VaultError::Database(e.to_string()))?;
        Ok(())
    }

    /// Get a user's root folder.
    pub async fn get_root(conn: &mut SqliteConnection, user_id: i64) -> Result<Option<Folder>> {
        let folder = sqlx::query_as::<_, Folder>(&format!(
            "SELECT {FOLDER_COLUMNS} FROM folders WHERE user_id = ? AND is_root = 1"
        ))
        .bind(user_id)
        .fetch_optional(conn)
        .await
        .map_err(|e| VaultError::Database(e.to_string()))?;

        Ok(folder)
    }

    /// Get a folder by ID regardless of owner or soft-delete state.
    pub async fn get_by_id(conn: &mut SqliteConnection, id: i64) -> Result<Option<Folder>> {
        let folder = sqlx::query_as::<_, Folder>(&format!(
            "SELECT {FOLDER_COLUMNS} FROM folders WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(conn)
        .await
        .map_err(|e| VaultError::Database(e.to_string()))?;

        Ok(folder)
    }

    /// Get an active folder owned by `user_id`.
    pub async fn get_active(
        conn: &mut SqliteConnection,
        user_id: i64,
        id: i64,
    ) -> Result<Option<Folder>> {
        let folder = sqlx::query_as::<_, Folder>(&format!(
            "SELECT {FOLDER_COLUMNS} FROM folders
             WHERE id = ? AND user_id = ? AND deleted_at IS NULL"
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(conn)
        .await
        .map_err(|e| VaultError::Database(e.to_string()))?;

        Ok(folder)
    }

    /// List active child folders, sorted by name.
    pub async fn list_children(
        conn: &mut SqliteConnection,
        user_id: i64,
        parent_id: i64,
    ) -> Result<Vec<Folder>> {
        let folders = sqlx::query_as::<_, Folder>(&format!(
            "SELECT {FOLDER_COLUMNS} FROM folders
             WHERE user_id = ? AND parent_id = ? AND deleted_at IS NULL
             ORDER BY name, id"
        ))
        .bind(user_id)
        .bind(parent_id)
        .fetch_all(conn)
        .await
        .map_err(|e| VaultError::Database(e.to_string()))?;

        Ok(folders)
    }

    /// Whether an active sibling named `name` exists under `parent_id`.
    pub async fn name_exists(
        conn: &mut SqliteConnection,
        user_id: i64,
        parent_id: i64,
        name: &str,
        exclude_id: Option<i64>,
    ) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(
                SELECT 1 FROM folders
                WHERE user_id = ? AND parent_id = ? AND name = ? AND deleted_at IS NULL
                  AND id != ?
             )",
        )
        .bind(user_id)
        .bind(parent_id)
        .bind(name)
        .bind(exclude_id.unwrap_or(0))
        .fetch_one(conn)
        .await
        .map_err(|e| VaultError::Database(e.to_string()))?;

        Ok(exists)
    }

    /// List a subtree: the folder itself plus every descendant reachable
    /// through `parent_id` whose marker matches `visibility`.
    ///
    /// A descendant that does not match cuts off its own children.
    pub async fn list_subtree(
        conn: &mut SqliteConnection,
        root: &Folder,
        visibility: Visibility,
    ) -> Result<Vec<Folder>> {
        let mut query = QueryBuilder::<Sqlite>::new("WITH RECURSIVE subtree(id) AS (SELECT ");
        query.push_bind(root.id);
        query.push(
            " UNION ALL SELECT f.id FROM folders f JOIN subtree s ON f.parent_id = s.id
               WHERE f.user_id = ",
        );
        query.push_bind(root.user_id);
        visibility.push_filter(&mut query, "f.deleted_at");
        query.push(format!(
            ") SELECT {FOLDER_COLUMNS} FROM folders
               WHERE id IN (SELECT id FROM subtree)
               ORDER BY length(path), id"
        ));

        let folders = query
            .build_query_as::<Folder>()
            .fetch_all(conn)
            .await
            .map_err(|e| VaultError::Database(e.to_string()))?;

        Ok(folders)
    }

    /// Set a folder's name, path and parent.
    pub async fn relocate(
        conn: &mut SqliteConnection,
        id: i64,
        parent_id: Option<i64>,
        name: &str,
        path: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE folders SET parent_id = ?, name = ?, path = ?, updated_at = ? WHERE id = ?",
        )
        .bind(parent_id)
        .bind(name)
        .bind(path)
        .bind(Utc::now())
        .bind(id)
        .execute(conn)
        .await
        .map_err(|e| VaultError::Database(e.to_string()))?;
        Ok(())
    }

    /// Replace the `old_prefix` of the paths of the given folders with
    /// `new_prefix`.
    ///
    /// Only strict descendants of `old_prefix` are touched; the prefix is
    /// compared byte for byte. Returns the number of rows updated.
    pub async fn rewrite_descendant_paths(
        conn: &mut SqliteConnection,
        ids: &[i64],
        old_prefix: &str,
        new_prefix: &str,
    ) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let old_prefix = format!("{}/", old_prefix.trim_end_matches('/'));
        let new_prefix = new_prefix.trim_end_matches('/');
        // substr() is 1-based and counts characters
        let prefix_len = old_prefix.chars().count() as i64;

        let mut query = QueryBuilder::<Sqlite>::new("UPDATE folders SET path = ");
        query.push_bind(new_prefix.to_string());
        query.push(" || substr(path, ");
        query.push_bind(prefix_len);
        query.push("), updated_at = ");
        query.push_bind(Utc::now());
        query.push(" WHERE substr(path, 1, ");
        query.push_bind(prefix_len);
        query.push(") = ");
        query.push_bind(old_prefix);
        query.push(" AND id IN ");
        push_id_list(&mut query, ids);

        let result = query
            .build()
            .execute(conn)
            .await
            .map_err(|e| VaultError::Database(e.to_string()))?;

        Ok(result.rows_affected())
    }

    /// Soft-delete the given folders.
    pub async fn soft_delete_many(
        conn: &mut SqliteConnection,
        ids: &[i64],
        deleted_at: DateTime<Utc>,
    ) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut query = QueryBuilder::<Sqlite>::new("UPDATE folders SET deleted_at = ");
        query.push_bind(deleted_at);
        query.push(" WHERE deleted_at IS NULL AND id IN ");
        push_id_list(&mut query, ids);

        let result = query
            .build()
            .execute(conn)
            .await
            .map_err(|e| VaultError::Database(e.to_string()))?;
        Ok(result.rows_affected())
    }

    /// Clear the soft-delete marker of the given folders.
    pub async fn restore_many(conn: &mut SqliteConnection, ids: &[i64]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut query = QueryBuilder::<Sqlite>::new("UPDATE folders SET deleted_at = NULL, updated_at = ");
        query.push_bind(Utc::now());
        query.push(" WHERE id IN ");
        push_id_list(&mut query, ids);

        let result = query
            .build()
            .execute(conn)
            .await
            .map_err(|e| VaultError::Database(e.to_string()))?;
        Ok(result.rows_affected())
    }

    /// Hard-delete the given folders in one statement.
    pub async fn hard_delete_many(conn: &mut SqliteConnection, ids: &[i64]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut query = QueryBuilder::<Sqlite>::new("DELETE FROM folders WHERE id IN ");
        push_id_list(&mut query, ids);

        let result = query
            .build()
            .execute(conn)
            .await
            .map_err(|e| VaultError::Database(e.to_string()))?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{NewUser, UserRepository};
    use crate::Database;

    async fn setup() -> (Database, i64, Folder) {
        let db = Database::open_in_memory().await.unwrap();
        let mut conn = db.acquire().await.unwrap();
        let user = UserRepository::create(&mut conn, &NewUser::new("alice", 1 << 20))
            .await
            .unwrap();
        FolderRepository::insert_root_if_absent(&mut conn, user.id)
            .await
            .unwrap();
        let root = FolderRepository::get_root(&mut conn, user.id)
            .await
            .unwrap()
            .unwrap();
        drop(conn);
        (db, user.id, root)
    }

    async fn mkdir(conn: &mut SqliteConnection, user_id: i64, parent: &Folder, name: &str) -> Folder {
        let path = if parent.is_root {
            format!("/{name}")
        } else {
            format!("{}/{name}", parent.path)
        };
        FolderRepository::create(
            conn,
            &NewFolder {
                user_id,
                parent_id: parent.id,
                name: name.to_string(),
                path,
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_root_insert_is_idempotent() {
        let (db, user_id, root) = setup().await;
        let mut conn = db.acquire().await.unwrap();

        FolderRepository::insert_root_if_absent(&mut conn, user_id)
            .await
            .unwrap();
        let again = FolderRepository::get_root(&mut conn, user_id)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(again.id, root.id);
        assert!(root.is_root);
        assert_eq!(root.path, "/");
        assert!(root.parent_id.is_none());
    }

    #[tokio::test]
    async fn test_list_children_sorted_and_active() {
        let (db, user_id, root) = setup().await;
        let mut conn = db.acquire().await.unwrap();

        let b = mkdir(&mut conn, user_id, &root, "b").await;
        mkdir(&mut conn, user_id, &root, "a").await;
        FolderRepository::soft_delete_many(&mut conn, &[b.id], Utc::now())
            .await
            .unwrap();

        let children = FolderRepository::list_children(&mut conn, user_id, root.id)
            .await
            .unwrap();
        let names: Vec<_> = children.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a"]);
    }

    #[tokio::test]
    async fn test_name_exists_excludes_self() {
        let (db, user_id, root) = setup().await;
        let mut conn = db.acquire().await.unwrap();
        let docs = mkdir(&mut conn, user_id, &root, "docs").await;

        assert!(FolderRepository::name_exists(&mut conn, user_id, root.id, "docs", None)
            .await
            .unwrap());
        assert!(
            !FolderRepository::name_exists(&mut conn, user_id, root.id, "docs", Some(docs.id))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_subtree_does_not_match_sibling_prefix() {
        let (db, user_id, root) = setup().await;
        let mut conn = db.acquire().await.unwrap();

        let docs = mkdir(&mut conn, user_id, &root, "docs").await;
        let old = mkdir(&mut conn, user_id, &docs, "old").await;
        mkdir(&mut conn, user_id, &root, "docs2").await;

        let subtree = FolderRepository::list_subtree(&mut conn, &docs, Visibility::Any)
            .await
            .unwrap();
        let ids: Vec<_> = subtree.iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![docs.id, old.id]);
    }

    #[tokio::test]
    async fn test_subtree_is_case_sensitive() {
        let (db, user_id, root) = setup().await;
        let mut conn = db.acquire().await.unwrap();

        let lower = mkdir(&mut conn, user_id, &root, "docs").await;
        let upper = mkdir(&mut conn, user_id, &root, "Docs").await;
        mkdir(&mut conn, user_id, &upper, "keep").await;
        let a_b = mkdir(&mut conn, user_id, &root, "a_b").await;
        let axb = mkdir(&mut conn, user_id, &root, "axb").await;
        mkdir(&mut conn, user_id, &axb, "inner").await;

        let subtree = FolderRepository::list_subtree(&mut conn, &lower, Visibility::Any)
            .await
            .unwrap();
        assert_eq!(subtree.len(), 1);
        let subtree = FolderRepository::list_subtree(&mut conn, &a_b, Visibility::Any)
            .await
            .unwrap();
        assert_eq!(subtree.len(), 1);
    }

    #[tokio::test]
    async fn test_subtree_follows_parent_chain_and_visibility() {
        let (db, user_id, root) = setup().await;
        let mut conn = db.acquire().await.unwrap();

        let docs = mkdir(&mut conn, user_id, &root, "docs").await;
        let old = mkdir(&mut conn, user_id, &docs, "old").await;
        let deep = mkdir(&mut conn, user_id, &old, "deep").await;
        let new = mkdir(&mut conn, user_id, &docs, "new").await;
        FolderRepository::soft_delete_many(&mut conn, &[old.id, deep.id], Utc::now())
            .await
            .unwrap();

        let active = FolderRepository::list_subtree(&mut conn, &docs, Visibility::Active)
            .await
            .unwrap();
        let ids: Vec<_> = active.iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![docs.id, new.id]);

        let all = FolderRepository::list_subtree(&mut conn, &docs, Visibility::Any)
            .await
            .unwrap();
        assert_eq!(all.len(), 4);
    }

    #[tokio::test]
    async fn test_rewrite_descendant_paths() {
        let (db, user_id, root) = setup().await;
        let mut conn = db.acquire().await.unwrap();

        let docs = mkdir(&mut conn, user_id, &root, "docs").await;
        let y2024 = mkdir(&mut conn, user_id, &docs, "2024").await;
        let a = mkdir(&mut conn, user_id, &y2024, "a").await;
        let upper = mkdir(&mut conn, user_id, &root, "Docs").await;
        let keep = mkdir(&mut conn, user_id, &upper, "keep").await;

        let ids = [docs.id, y2024.id, a.id, keep.id];
        let updated =
            FolderRepository::rewrite_descendant_paths(&mut conn, &ids, "/docs", "/papers")
                .await
                .unwrap();
        assert_eq!(updated, 2);

        let a = FolderRepository::get_by_id(&mut conn, a.id).await.unwrap().unwrap();
        assert_eq!(a.path, "/papers/2024/a");
        // the subtree root itself is left to the caller
        let docs = FolderRepository::get_by_id(&mut conn, docs.id).await.unwrap().unwrap();
        assert_eq!(docs.path, "/docs");
        let keep = FolderRepository::get_by_id(&mut conn, keep.id).await.unwrap().unwrap();
        assert_eq!(keep.path, "/Docs/keep");
    }

    #[tokio::test]
    async fn test_soft_delete_restore_and_hard_delete() {
        let (db, user_id, root) = setup().await;
        let mut conn = db.acquire().await.unwrap();
        let docs = mkdir(&mut conn, user_id, &root, "docs").await;
        let old = mkdir(&mut conn, user_id, &docs, "old").await;

        let at = Utc::now();
        assert_eq!(
            FolderRepository::soft_delete_many(&mut conn, &[docs.id, old.id], at)
                .await
                .unwrap(),
            2
        );
        assert!(FolderRepository::get_active(&mut conn, user_id, docs.id)
            .await
            .unwrap()
            .is_none());

        let deleted = FolderRepository::list_subtree(&mut conn, &docs, Visibility::DeletedAt(at))
            .await
            .unwrap();
        assert_eq!(deleted.len(), 2);

        FolderRepository::restore_many(&mut conn, &[docs.id, old.id])
            .await
            .unwrap();
        assert!(FolderRepository::get_active(&mut conn, user_id, old.id)
            .await
            .unwrap()
            .is_some());

        FolderRepository::hard_delete_many(&mut conn, &[docs.id, old.id])
            .await
            .unwrap();
        assert!(FolderRepository::get_by_id(&mut conn, docs.id)
            .await
            .unwrap()
            .is_none());
    }
}
