//! Folder resolution.
//!
//! Clients address the root as folder `0`; everything else must be an
//! active folder owned by the caller. Roots are created lazily.

use sqlx::SqliteConnection;

use super::folder::{Folder, FolderRepository};
use crate::{Result, VaultError};

/// Folder id clients use to mean "my root".
pub const ROOT_ALIAS: i64 = 0;

/// Canonical path of a child named `name` under `parent_path`.
///
/// ```
/// use filevault::file::child_path;
///
/// assert_eq!(child_path("/", "docs"), "/docs");
/// assert_eq!(child_path("/docs", "2024"), "/docs/2024");
/// assert_eq!(child_path("/docs/", "2024"), "/docs/2024");
/// ```
pub fn child_path(parent_path: &str, name: &str) -> String {
    let parent = parent_path.trim_end_matches('/');
    format!("{parent}/{name}")
}

/// Maps client folder ids onto concrete folder rows.
pub struct FolderResolver;

impl FolderResolver {
    /// Return the user's root folder, creating it if absent.
    pub async fn get_or_create_root(conn: &mut SqliteConnection, user_id: i64) -> Result<Folder> {
        if let Some(root) = FolderRepository::get_root(&mut *conn, user_id).await? {
            return Ok(root);
        }
        FolderRepository::insert_root_if_absent(&mut *conn, user_id).await?;
        FolderRepository::get_root(conn, user_id)
            .await?
            .ok_or_else(|| VaultError::NotFound("root folder".to_string()))
    }

    /// Resolve a client folder id (`0` = root) to an active folder of the user.
    pub async fn resolve(conn: &mut SqliteConnection, user_id: i64, folder_id: i64) -> Result<Folder> {
        if folder_id == ROOT_ALIAS {
            return Self::get_or_create_root(conn, user_id).await;
        }
        FolderRepository::get_active(conn, user_id, folder_id)
            .await?
            .ok_or_else(|| VaultError::NotFound("folder".to_string()))
    }

    /// Resolve `folder_id` if it still names an active folder of the user,
    /// else fall back to the root. Used when restoring into a folder that
    /// may have disappeared meanwhile.
    pub async fn active_or_root(
        conn: &mut SqliteConnection,
        user_id: i64,
        folder_id: Option<i64>,
    ) -> Result<Folder> {
        if let Some(id) = folder_id.filter(|id| *id != ROOT_ALIAS) {
            if let Some(folder) = FolderRepository::get_active(&mut *conn, user_id, id).await? {
                return Ok(folder);
            }
        }
        Self::get_or_create_root(conn, user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{NewUser, UserRepository};
    use crate::file::folder::NewFolder;
    use crate::Database;
    use chrono::Utc;

    async fn setup() -> (Database, i64) {
        let db = Database::open_in_memory().await.unwrap();
        let mut conn = db.acquire().await.unwrap();
        let user = UserRepository::create(&mut conn, &NewUser::new("alice", 1 << 20))
            .await
            .unwrap();
        (db, user.id)
    }

    #[test]
    fn test_child_path() {
        assert_eq!(child_path("/", "a"), "/a");
        assert_eq!(child_path("/a", "b"), "/a/b");
        assert_eq!(child_path("/a/b/", "c"), "/a/b/c");
    }

    #[tokio::test]
    async fn test_get_or_create_root_is_idempotent() {
        let (db, user_id) = setup().await;
        let mut conn = db.acquire().await.unwrap();

        let first = FolderResolver::get_or_create_root(&mut conn, user_id)
            .await
            .unwrap();
        let second = FolderResolver::get_or_create_root(&mut conn, user_id)
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert!(first.is_root);
        assert_eq!(first.path, "/");
    }

    #[tokio::test]
    async fn test_resolve_zero_means_root() {
        let (db, user_id) = setup().await;
        let mut conn = db.acquire().await.unwrap();

        let root = FolderResolver::resolve(&mut conn, user_id, ROOT_ALIAS)
            .await
            .unwrap();
        assert!(root.is_root);
    }

    #[tokio::test]
    async fn test_resolve_rejects_foreign_and_deleted_folders() {
        let (db, alice) = setup().await;
        let mut conn = db.acquire().await.unwrap();
        let bob = UserRepository::create(&mut conn, &NewUser::new("bob", 1 << 20))
            .await
            .unwrap()
            .id;

        let root = FolderResolver::get_or_create_root(&mut conn, alice).await.unwrap();
        let docs = FolderRepository::create(
            &mut conn,
            &NewFolder {
                user_id: alice,
                parent_id: root.id,
                name: "docs".to_string(),
                path: "/docs".to_string(),
            },
        )
        .await
        .unwrap();

        assert!(FolderResolver::resolve(&mut conn, alice, docs.id).await.is_ok());
        assert!(matches!(
            FolderResolver::resolve(&mut conn, bob, docs.id).await,
            Err(VaultError::NotFound(_))
        ));

        FolderRepository::soft_delete_many(&mut conn, &[docs.id], Utc::now())
            .await
            .unwrap();
        assert!(matches!(
            FolderResolver::resolve(&mut conn, alice, docs.id).await,
            Err(VaultError::NotFound(_))
        ));

        let fallback = FolderResolver::active_or_root(&mut conn, alice, Some(docs.id))
            .await
            .unwrap();
        assert_eq!(fallback.id, root.id);
    }
}
