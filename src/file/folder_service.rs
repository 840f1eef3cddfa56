//! Folder service.
//!
//! Folder paths are materialized, so rename and move rewrite the path
//! prefix of every descendant in the same transaction as the folder
//! itself. Soft-deleted descendants are rewritten too so they can still be
//! restored or purged by their own recycle bin entry.

use sqlx::SqliteConnection;
use tracing::info;

use super::folder::{Folder, FolderRepository, NewFolder, Visibility};
use super::resolver::{child_path, FolderResolver};
use super::service::validate_name;
use super::storage::BlobStore;
use crate::config::RecycleBinConfig;
use crate::db::Database;
use crate::recycle::{RecycleBinItem, RecycleBinService};
use crate::{Result, VaultError};

/// Whether `path` is `ancestor` itself or lies below it.
fn is_within(path: &str, ancestor: &str) -> bool {
    let ancestor = ancestor.trim_end_matches('/');
    path == ancestor
        || path
            .strip_prefix(ancestor)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Every folder below `folder` through `parent_id`, deleted or not.
async fn subtree_ids(conn: &mut SqliteConnection, folder: &Folder) -> Result<Vec<i64>> {
    let subtree = FolderRepository::list_subtree(conn, folder, Visibility::Any).await?;
    Ok(subtree.into_iter().map(|f| f.id).collect())
}

/// Folder service.
pub struct FolderService<'a> {
    db: &'a Database,
    storage: &'a BlobStore,
    recycle_config: &'a RecycleBinConfig,
}

impl<'a> FolderService<'a> {
    pub fn new(db: &'a Database, storage: &'a BlobStore, recycle_config: &'a RecycleBinConfig) -> Self {
        Self {
            db,
            storage,
            recycle_config,
        }
    }

    /// The user's root folder, created on first use.
    pub async fn root(&self, user_id: i64) -> Result<Folder> {
        let mut conn = self.db.acquire().await?;
        FolderResolver::get_or_create_root(&mut conn, user_id).await
    }

    /// Get an active folder (`0` = root).
    pub async fn get(&self, user_id: i64, folder_id: i64) -> Result<Folder> {
        let mut conn = self.db.acquire().await?;
        FolderResolver::resolve(&mut conn, user_id, folder_id).await
    }

    /// List the active children of a folder (`0` = root), sorted by name.
    pub async fn list(&self, user_id: i64, parent_id: i64) -> Result<Vec<Folder>> {
        let mut conn = self.db.acquire().await?;
        let parent = FolderResolver::resolve(&mut conn, user_id, parent_id).await?;
        FolderRepository::list_children(&mut conn, user_id, parent.id).await
    }

    /// Create a folder under `parent_id` (`0` = root).
    pub async fn create(&self, user_id: i64, parent_id: i64, name: &str) -> Result<Folder> {
        let name = validate_name(name, "folder name")?;
        let mut tx = self.db.begin().await?;

        let parent = FolderResolver::resolve(&mut tx, user_id, parent_id).await?;
        if FolderRepository::name_exists(&mut tx, user_id, parent.id, &name, None).await? {
            return Err(VaultError::Conflict(format!("folder {name} already exists")));
        }

        let folder = FolderRepository::create(
            &mut tx,
            &NewFolder {
                user_id,
                parent_id: parent.id,
                path: child_path(&parent.path, &name),
                name,
            },
        )
        .await?;

        tx.commit()
            .await
            .map_err(|e| VaultError::Database(e.to_string()))?;
        info!(user_id, folder_id = folder.id, path = %folder.path, "folder created");
        Ok(folder)
    }

    /// Rename a folder and rewrite its descendants' paths.
    pub async fn rename(&self, user_id: i64, folder_id: i64, name: &str) -> Result<Folder> {
        let name = validate_name(name, "folder name")?;
        let mut tx = self.db.begin().await?;

        let folder = FolderRepository::get_active(&mut tx, user_id, folder_id)
            .await?
            .ok_or_else(|| VaultError::NotFound("folder".to_string()))?;
        if folder.is_root {
            return Err(VaultError::Conflict("root folder cannot be renamed".to_string()));
        }
        let parent_id = folder
            .parent_id
            .ok_or_else(|| VaultError::NotFound("parent folder".to_string()))?;
        if FolderRepository::name_exists(&mut tx, user_id, parent_id, &name, Some(folder.id)).await? {
            return Err(VaultError::Conflict(format!("folder {name} already exists")));
        }
        let parent = FolderRepository::get_active(&mut tx, user_id, parent_id)
            .await?
            .ok_or_else(|| VaultError::NotFound("parent folder".to_string()))?;

        let new_path = child_path(&parent.path, &name);
        let subtree = subtree_ids(&mut tx, &folder).await?;
        FolderRepository::relocate(&mut tx, folder.id, Some(parent.id), &name, &new_path).await?;
        let rewritten =
            FolderRepository::rewrite_descendant_paths(&mut tx, &subtree, &folder.path, &new_path)
                .await?;

        let renamed = FolderRepository::get_by_id(&mut tx, folder.id)
            .await?
            .ok_or_else(|| VaultError::NotFound("folder".to_string()))?;
        tx.commit()
            .await
            .map_err(|e| VaultError::Database(e.to_string()))?;

        info!(
            user_id,
            folder_id,
            from = %folder.path,
            to = %new_path,
            descendants = rewritten,
            "folder renamed"
        );
        Ok(renamed)
    }

    /// Move a folder under a new parent (`0` = root).
    pub async fn move_to(&self, user_id: i64, folder_id: i64, target_id: i64) -> Result<Folder> {
        let mut tx = self.db.begin().await?;

        let folder = FolderRepository::get_active(&mut tx, user_id, folder_id)
            .await?
            .ok_or_else(|| VaultError::NotFound("folder".to_string()))?;
        if folder.is_root {
            return Err(VaultError::Conflict("root folder cannot be moved".to_string()));
        }
        let target = FolderResolver::resolve(&mut tx, user_id, target_id).await?;
        if is_within(&target.path, &folder.path) {
            return Err(VaultError::Conflict(
                "cannot move a folder into itself or its descendant".to_string(),
            ));
        }
        if folder.parent_id == Some(target.id) {
            return Ok(folder);
        }
        if FolderRepository::name_exists(&mut tx, user_id, target.id, &folder.name, Some(folder.id))
            .await?
        {
            return Err(VaultError::Conflict(format!(
                "folder {} already exists in target",
                folder.name
            )));
        }

        let new_path = child_path(&target.path, &folder.name);
        let subtree = subtree_ids(&mut tx, &folder).await?;
        FolderRepository::relocate(&mut tx, folder.id, Some(target.id), &folder.name, &new_path)
            .await?;
        FolderRepository::rewrite_descendant_paths(&mut tx, &subtree, &folder.path, &new_path)
            .await?;

        let moved = FolderRepository::get_by_id(&mut tx, folder.id)
            .await?
            .ok_or_else(|| VaultError::NotFound("folder".to_string()))?;
        tx.commit()
            .await
            .map_err(|e| VaultError::Database(e.to_string()))?;

        info!(user_id, folder_id, from = %folder.path, to = %new_path, "folder moved");
        Ok(moved)
    }

    /// Move a folder subtree to the recycle bin.
    pub async fn delete(&self, user_id: i64, folder_id: i64) -> Result<RecycleBinItem> {
        RecycleBinService::new(self.db, self.storage, self.recycle_config)
            .soft_delete_folder(user_id, folder_id)
            .await
    }
}
