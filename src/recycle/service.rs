//! Recycle bin service.
//!
//! Soft deletes write a recycle bin entry and tombstone the catalog rows in
//! one transaction. A folder entry stands for its whole subtree: members
//! deleted by the same operation share the entry's `deleted_at`, which is
//! what restore uses to find them again.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::{info, warn};

use super::item::{
    FileSnapshot, FolderSnapshot, NewRecycleBinItem, RecycleBinItem, RecycleBinRepository,
    RecycleItemType,
};
use crate::config::RecycleBinConfig;
use crate::db::{Database, UserRepository};
use crate::file::{
    child_path, BlobStore, FileEntry, FileObject, FileObjectRepository, FileRepository, Folder,
    FolderRepository, FolderResolver, ObjectManager, Visibility,
};
use crate::{Result, VaultError};

/// Default number of entries per page.
pub const DEFAULT_PAGE_SIZE: i64 = 20;

/// Largest accepted page size.
pub const MAX_PAGE_SIZE: i64 = 100;

/// Suffix appended to a restored name that collides with an active sibling.
const RESTORED_SUFFIX: &str = "(restored)";

/// One page of recycle bin entries.
#[derive(Debug, Clone, Serialize)]
pub struct RecycleBinPage {
    pub items: Vec<RecycleBinItem>,
    pub page: i64,
    pub page_size: i64,
    pub total: i64,
    pub total_pages: i64,
}

impl RecycleBinPage {
    pub fn has_next(&self) -> bool {
        self.page < self.total_pages
    }

    pub fn has_prev(&self) -> bool {
        self.page > 1
    }
}

/// What a restore brought back.
#[derive(Debug, Clone)]
pub enum RestoredItem {
    File(FileEntry),
    Folder(Folder),
}

fn restored_name(name: &str) -> String {
    format!("{name}{RESTORED_SUFFIX}")
}

/// Recycle bin lifecycle: soft delete, restore, permanent delete, empty.
pub struct RecycleBinService<'a> {
    db: &'a Database,
    storage: &'a BlobStore,
    config: &'a RecycleBinConfig,
}

impl<'a> RecycleBinService<'a> {
    pub fn new(db: &'a Database, storage: &'a BlobStore, config: &'a RecycleBinConfig) -> Self {
        Self {
            db,
            storage,
            config,
        }
    }

    fn objects(&self) -> ObjectManager<'a> {
        ObjectManager::new(self.db, self.storage)
    }

    fn expiry_from(&self, deleted_at: DateTime<Utc>) -> DateTime<Utc> {
        deleted_at + Duration::days(self.config.retention_days)
    }

    /// List a user's entries, newest first.
    ///
    /// `page` below 1 reads as 1; a `page_size` outside `1..=100` falls back
    /// to the default.
    pub async fn list(&self, user_id: i64, page: i64, page_size: i64) -> Result<RecycleBinPage> {
        let page = page.max(1);
        let page_size = if (1..=MAX_PAGE_SIZE).contains(&page_size) {
            page_size
        } else {
            DEFAULT_PAGE_SIZE
        };

        let mut conn = self.db.acquire().await?;
        let total = RecycleBinRepository::count_for_user(&mut conn, user_id).await?;
        let items =
            RecycleBinRepository::list_for_user(&mut conn, user_id, (page - 1) * page_size, page_size)
                .await?;
        let total_pages = ((total + page_size - 1) / page_size).max(1);

        Ok(RecycleBinPage {
            items,
            page,
            page_size,
            total,
            total_pages,
        })
    }

    /// Move a file to the recycle bin.
    pub async fn soft_delete_file(&self, user_id: i64, file_id: i64) -> Result<RecycleBinItem> {
        let mut tx = self.db.begin().await?;
        let item = self
            .soft_delete_file_in(&mut tx, user_id, file_id, Utc::now())
            .await?
            .ok_or_else(|| VaultError::NotFound("file".to_string()))?;
        tx.commit()
            .await
            .map_err(|e| VaultError::Database(e.to_string()))?;

        info!(user_id, file_id, item_id = item.id, "file moved to recycle bin");
        Ok(item)
    }

    /// Move several files to the recycle bin in one transaction. Ids that
    /// do not name an active file of the user are skipped.
    pub async fn soft_delete_files(&self, user_id: i64, file_ids: &[i64]) -> Result<Vec<RecycleBinItem>> {
        let now = Utc::now();
        let mut tx = self.db.begin().await?;
        let mut items = Vec::with_capacity(file_ids.len());
        for &file_id in file_ids {
            if let Some(item) = self.soft_delete_file_in(&mut tx, user_id, file_id, now).await? {
                items.push(item);
            }
        }
        tx.commit()
            .await
            .map_err(|e| VaultError::Database(e.to_string()))?;

        info!(
            user_id,
            requested = file_ids.len(),
            deleted = items.len(),
            "files moved to recycle bin"
        );
        Ok(items)
    }

    async fn soft_delete_file_in(
        &self,
        conn: &mut SqliteConnection,
        user_id: i64,
        file_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<RecycleBinItem>> {
        let Some(file) = FileRepository::get_active(&mut *conn, user_id, file_id).await? else {
            return Ok(None);
        };
        let object = FileObjectRepository::get_by_id(&mut *conn, file.object_id)
            .await?
            .ok_or_else(|| VaultError::NotFound("file object".to_string()))?;

        let snapshot = FileSnapshot {
            mime_type: object.mime_type.clone(),
            is_image: object.is_image,
            thumbnail_path: object.thumbnail_path.clone(),
            width: object.width,
            height: object.height,
            content_hash: object.content_hash.clone(),
            file_object_id: object.id,
        };
        let item = RecycleBinRepository::create(
            &mut *conn,
            &NewRecycleBinItem {
                user_id,
                original_id: file.id,
                item_type: RecycleItemType::File,
                original_name: file.original_name.clone(),
                original_path: object.file_path.clone(),
                original_folder_id: Some(file.folder_id),
                file_size: object.file_size,
                file_object_id: Some(object.id),
                metadata: NewRecycleBinItem::encode_metadata(&snapshot)?,
                deleted_at: now,
                expires_at: self.expiry_from(now),
            },
        )
        .await?;

        FileRepository::soft_delete(conn, file.id, user_id, now).await?;
        Ok(Some(item))
    }

    /// Move a folder and everything below it to the recycle bin.
    ///
    /// Only the folder itself gets an entry; active descendants and their
    /// files are tombstoned with the same timestamp.
    pub async fn soft_delete_folder(&self, user_id: i64, folder_id: i64) -> Result<RecycleBinItem> {
        let mut tx = self.db.begin().await?;

        let folder = FolderRepository::get_active(&mut tx, user_id, folder_id)
            .await?
            .ok_or_else(|| VaultError::NotFound("folder".to_string()))?;
        if folder.is_root {
            return Err(VaultError::Conflict("root folder cannot be deleted".to_string()));
        }

        let now = Utc::now();
        let item = RecycleBinRepository::create(
            &mut tx,
            &NewRecycleBinItem {
                user_id,
                original_id: folder.id,
                item_type: RecycleItemType::Folder,
                original_name: folder.name.clone(),
                original_path: folder.path.clone(),
                original_folder_id: folder.parent_id,
                file_size: 0,
                file_object_id: None,
                metadata: NewRecycleBinItem::encode_metadata(&FolderSnapshot {
                    parent_id: folder.parent_id,
                })?,
                deleted_at: now,
                expires_at: self.expiry_from(now),
            },
        )
        .await?;

        let subtree = FolderRepository::list_subtree(&mut tx, &folder, Visibility::Active).await?;
        let ids: Vec<i64> = subtree.iter().map(|f| f.id).collect();
        let folders = FolderRepository::soft_delete_many(&mut tx, &ids, now).await?;
        let files = FileRepository::soft_delete_in_folders(&mut tx, &ids, user_id, now).await?;

        tx.commit()
            .await
            .map_err(|e| VaultError::Database(e.to_string()))?;

        info!(
            user_id,
            folder_id,
            path = %folder.path,
            folders,
            files,
            "folder moved to recycle bin"
        );
        Ok(item)
    }

    /// Put an entry back where it came from, or under the root if that
    /// place is gone.
    pub async fn restore(&self, user_id: i64, item_id: i64) -> Result<RestoredItem> {
        let mut tx = self.db.begin().await?;

        let item = RecycleBinRepository::get_for_user(&mut tx, user_id, item_id)
            .await?
            .ok_or_else(|| VaultError::NotFound("recycle bin item".to_string()))?;

        let restored = match item.item_type {
            RecycleItemType::File => {
                RestoredItem::File(self.restore_file(&mut tx, user_id, &item).await?)
            }
            RecycleItemType::Folder => {
                RestoredItem::Folder(self.restore_folder(&mut tx, user_id, &item).await?)
            }
        };
        RecycleBinRepository::delete(&mut tx, item.id).await?;

        tx.commit()
            .await
            .map_err(|e| VaultError::Database(e.to_string()))?;

        info!(
            user_id,
            item_id,
            item_type = %item.item_type,
            original_id = item.original_id,
            "recycle bin item restored"
        );
        Ok(restored)
    }

    async fn restore_file(
        &self,
        conn: &mut SqliteConnection,
        user_id: i64,
        item: &RecycleBinItem,
    ) -> Result<FileEntry> {
        let file = FileRepository::get_by_id(&mut *conn, item.original_id)
            .await?
            .filter(|f| f.user_id == user_id)
            .ok_or_else(|| VaultError::NotFound("file to restore".to_string()))?;

        let target = item.original_folder_id.or(Some(file.folder_id));
        let folder = FolderResolver::active_or_root(&mut *conn, user_id, target).await?;

        let mut name = item.original_name.clone();
        if FileRepository::name_exists(&mut *conn, user_id, folder.id, &name, Some(file.id)).await? {
            name = restored_name(&name);
        }

        FileRepository::restore(&mut *conn, file.id, folder.id, &name).await?;
        FileRepository::get_by_id(conn, file.id)
            .await?
            .ok_or_else(|| VaultError::NotFound("file".to_string()))
    }

    async fn restore_folder(
        &self,
        conn: &mut SqliteConnection,
        user_id: i64,
        item: &RecycleBinItem,
    ) -> Result<Folder> {
        let folder = FolderRepository::get_by_id(&mut *conn, item.original_id)
            .await?
            .filter(|f| f.user_id == user_id)
            .ok_or_else(|| VaultError::NotFound("folder to restore".to_string()))?;
        if folder.is_root {
            return Err(VaultError::Conflict("root folder cannot be restored".to_string()));
        }
        let Some(deleted_at) = folder.deleted_at else {
            warn!(user_id, folder_id = folder.id, "folder already active, dropping stale entry");
            return Ok(folder);
        };

        let parent =
            FolderResolver::active_or_root(&mut *conn, user_id, folder.parent_id.or(item.original_folder_id))
                .await?;

        let mut name = if item.original_name.is_empty() {
            folder.name.clone()
        } else {
            item.original_name.clone()
        };
        if FolderRepository::name_exists(&mut *conn, user_id, parent.id, &name, Some(folder.id)).await? {
            name = restored_name(&name);
        }
        let new_path = child_path(&parent.path, &name);

        let subtree =
            FolderRepository::list_subtree(&mut *conn, &folder, Visibility::DeletedAt(deleted_at))
                .await?;
        if subtree.is_empty() {
            return Err(VaultError::NotFound("folder subtree".to_string()));
        }
        let ids: Vec<i64> = subtree.iter().map(|f| f.id).collect();

        // descendants deleted on their own stay in the bin but move along
        let all: Vec<i64> = FolderRepository::list_subtree(&mut *conn, &folder, Visibility::Any)
            .await?
            .into_iter()
            .map(|f| f.id)
            .collect();
        FolderRepository::rewrite_descendant_paths(&mut *conn, &all, &folder.path, &new_path)
            .await?;
        FolderRepository::relocate(&mut *conn, folder.id, Some(parent.id), &name, &new_path).await?;
        FolderRepository::restore_many(&mut *conn, &ids).await?;
        let files = FileRepository::restore_in_folders(&mut *conn, &ids, deleted_at).await?;

        // entries for members that just came back would point at live rows
        let file_ids: Vec<i64> = files.iter().map(|f| f.id).collect();
        RecycleBinRepository::delete_for_originals(&mut *conn, user_id, RecycleItemType::File, &file_ids)
            .await?;
        let stale: Vec<i64> = ids.iter().copied().filter(|id| *id != folder.id).collect();
        RecycleBinRepository::delete_for_originals(&mut *conn, user_id, RecycleItemType::Folder, &stale)
            .await?;

        FolderRepository::get_by_id(conn, folder.id)
            .await?
            .ok_or_else(|| VaultError::NotFound("folder".to_string()))
    }

    /// Permanently delete one entry and whatever it stands for.
    pub async fn permanent_delete(&self, user_id: i64, item_id: i64) -> Result<()> {
        let mut reclaimed = Vec::new();
        let mut tx = self.db.begin().await?;

        let item = RecycleBinRepository::get_for_user(&mut tx, user_id, item_id)
            .await?
            .ok_or_else(|| VaultError::NotFound("recycle bin item".to_string()))?;
        self.purge_in(&mut tx, &item, &mut reclaimed).await?;

        tx.commit()
            .await
            .map_err(|e| VaultError::Database(e.to_string()))?;
        self.objects().reclaim(&reclaimed).await;

        info!(
            user_id,
            item_id,
            item_type = %item.item_type,
            original_id = item.original_id,
            "recycle bin item permanently deleted"
        );
        Ok(())
    }

    /// Permanently delete every entry of a user in one transaction.
    /// Returns the number of entries processed.
    pub async fn empty(&self, user_id: i64) -> Result<usize> {
        let mut reclaimed = Vec::new();
        let mut tx = self.db.begin().await?;

        let ids = RecycleBinRepository::list_ids_for_user(&mut tx, user_id).await?;
        let mut purged = 0;
        for id in ids {
            // a folder purge earlier in the loop may already have taken it
            let Some(item) = RecycleBinRepository::get_by_id(&mut tx, id).await? else {
                continue;
            };
            self.purge_in(&mut tx, &item, &mut reclaimed).await?;
            purged += 1;
        }
        RecycleBinRepository::delete_all_for_user(&mut tx, user_id).await?;

        tx.commit()
            .await
            .map_err(|e| VaultError::Database(e.to_string()))?;
        self.objects().reclaim(&reclaimed).await;

        info!(user_id, purged, reclaimed = reclaimed.len(), "recycle bin emptied");
        Ok(purged)
    }

    /// Permanently delete one entry regardless of owner, in its own
    /// transaction. Returns false if the entry was already gone.
    pub async fn purge_item(&self, item_id: i64) -> Result<bool> {
        let mut reclaimed = Vec::new();
        let mut tx = self.db.begin().await?;

        let Some(item) = RecycleBinRepository::get_by_id(&mut tx, item_id).await? else {
            return Ok(false);
        };
        self.purge_in(&mut tx, &item, &mut reclaimed).await?;

        tx.commit()
            .await
            .map_err(|e| VaultError::Database(e.to_string()))?;
        self.objects().reclaim(&reclaimed).await;
        Ok(true)
    }

    async fn purge_in(
        &self,
        conn: &mut SqliteConnection,
        item: &RecycleBinItem,
        reclaimed: &mut Vec<FileObject>,
    ) -> Result<()> {
        match item.item_type {
            RecycleItemType::File => {
                self.purge_file(
                    &mut *conn,
                    item.user_id,
                    item.original_id,
                    item.file_size,
                    item.file_object_id,
                    reclaimed,
                )
                .await?;
            }
            RecycleItemType::Folder => {
                self.purge_folder(&mut *conn, item.user_id, item.original_id, reclaimed)
                    .await?;
            }
        }
        RecycleBinRepository::delete(conn, item.id).await?;
        Ok(())
    }

    /// Hard-delete a file row, uncharge its size and release its object.
    ///
    /// The live row wins over the snapshot values; a row that is already
    /// gone falls back to them.
    async fn purge_file(
        &self,
        conn: &mut SqliteConnection,
        user_id: i64,
        file_id: i64,
        snapshot_size: i64,
        snapshot_object_id: Option<i64>,
        reclaimed: &mut Vec<FileObject>,
    ) -> Result<()> {
        let file = FileRepository::get_by_id(&mut *conn, file_id)
            .await?
            .filter(|f| f.user_id == user_id);

        let (size, object_id) = match file {
            Some(ref file) => {
                let size = FileObjectRepository::get_by_id(&mut *conn, file.object_id)
                    .await?
                    .map(|o| o.file_size)
                    .unwrap_or(snapshot_size);
                (size, Some(file.object_id))
            }
            None => (snapshot_size, snapshot_object_id),
        };

        if file.is_some() {
            FileRepository::hard_delete(&mut *conn, file_id).await?;
        }
        if size > 0 {
            UserRepository::sub_storage_used(&mut *conn, user_id, size).await?;
        }
        if let Some(object_id) = object_id {
            if let Some(object) = self.objects().release(conn, object_id).await? {
                reclaimed.push(object);
            }
        }
        Ok(())
    }

    /// Hard-delete a deleted folder, the folders below it by parent chain
    /// and every file in them.
    async fn purge_folder(
        &self,
        conn: &mut SqliteConnection,
        user_id: i64,
        folder_id: i64,
        reclaimed: &mut Vec<FileObject>,
    ) -> Result<()> {
        let Some(folder) = FolderRepository::get_by_id(&mut *conn, folder_id)
            .await?
            .filter(|f| f.user_id == user_id)
        else {
            return Ok(());
        };
        if folder.is_root {
            return Ok(());
        }

        if !folder.is_deleted() {
            warn!(user_id, folder_id, "folder is active, dropping stale entry");
            return Ok(());
        }

        // everything still hanging below it was deleted with it or before it
        let subtree = FolderRepository::list_subtree(&mut *conn, &folder, Visibility::Any).await?;
        if subtree.is_empty() {
            return Ok(());
        }
        let folder_ids: Vec<i64> = subtree.iter().map(|f| f.id).collect();

        let files = FileRepository::list_in_folders(&mut *conn, &folder_ids, Visibility::Any).await?;
        let mut file_ids = Vec::with_capacity(files.len());
        for file in &files {
            file_ids.push(file.id);
            self.purge_file(&mut *conn, user_id, file.id, 0, Some(file.object_id), reclaimed)
                .await?;
        }

        FolderRepository::hard_delete_many(&mut *conn, &folder_ids).await?;
        RecycleBinRepository::delete_for_originals(&mut *conn, user_id, RecycleItemType::File, &file_ids)
            .await?;
        RecycleBinRepository::delete_for_originals(conn, user_id, RecycleItemType::Folder, &folder_ids)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NewUser;
    use crate::file::{content_hash, FilePlacement, NewFolder, PendingObject};
    use crate::file::ImageInfo;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        db: Database,
        storage: BlobStore,
        config: RecycleBinConfig,
        user_id: i64,
        root: Folder,
    }

    impl Fixture {
        fn service(&self) -> RecycleBinService<'_> {
            RecycleBinService::new(&self.db, &self.storage, &self.config)
        }

        async fn folder(&self, parent: &Folder, name: &str) -> Folder {
            let mut conn = self.db.acquire().await.unwrap();
            FolderRepository::create(
                &mut conn,
                &NewFolder {
                    user_id: self.user_id,
                    parent_id: parent.id,
                    name: name.to_string(),
                    path: child_path(&parent.path, name),
                },
            )
            .await
            .unwrap()
        }

        async fn file(&self, folder: &Folder, name: &str, content: &[u8]) -> (FileEntry, FileObject) {
            let manager = ObjectManager::new(&self.db, &self.storage);
            let placement = FilePlacement {
                user_id: self.user_id,
                folder_id: folder.id,
                original_name: name.to_string(),
            };
            let hash = content_hash(content);
            if let Some(linked) = manager.link_existing(&placement, &hash).await.unwrap() {
                return linked;
            }
            let loc = self.storage.allocate_blob(self.user_id, name);
            self.storage.write(&loc.relative_path, content).await.unwrap();
            let pending = PendingObject {
                stored_name: loc.stored_name,
                file_path: loc.relative_path,
                size: content.len() as i64,
                hash,
                mime_type: "text/plain".to_string(),
                image: ImageInfo::default(),
            };
            manager.commit_fresh(&placement, &pending, None).await.unwrap()
        }

        async fn used(&self) -> i64 {
            let mut conn = self.db.acquire().await.unwrap();
            UserRepository::storage_info(&mut conn, self.user_id)
                .await
                .unwrap()
                .used
        }
    }

    async fn setup() -> Fixture {
        let dir = TempDir::new().unwrap();
        let storage = BlobStore::new(dir.path()).unwrap();
        let db = Database::open_in_memory().await.unwrap();
        let mut conn = db.acquire().await.unwrap();
        let user_id = UserRepository::create(&mut conn, &NewUser::new("alice", 1 << 20))
            .await
            .unwrap()
            .id;
        let root = FolderResolver::get_or_create_root(&mut conn, user_id)
            .await
            .unwrap();
        drop(conn);
        Fixture {
            _dir: dir,
            db,
            storage,
            config: RecycleBinConfig::default(),
            user_id,
            root,
        }
    }

    #[tokio::test]
    async fn test_file_round_trip_with_name_collision() {
        let fx = setup().await;
        let docs = fx.folder(&fx.root, "docs").await;
        let (file, _) = fx.file(&docs, "a.txt", b"first").await;

        let item = fx.service().soft_delete_file(fx.user_id, file.id).await.unwrap();
        assert_eq!(item.original_folder_id, Some(docs.id));
        assert_eq!(item.file_snapshot().unwrap().mime_type, "text/plain");

        fx.file(&docs, "a.txt", b"second").await;

        let RestoredItem::File(restored) = fx.service().restore(fx.user_id, item.id).await.unwrap()
        else {
            panic!("expected a file");
        };
        assert_eq!(restored.original_name, "a.txt(restored)");
        assert_eq!(restored.folder_id, docs.id);
        assert!(!restored.is_deleted());

        let page = fx.service().list(fx.user_id, 1, 20).await.unwrap();
        assert_eq!(page.total, 0);
    }

    #[tokio::test]
    async fn test_restore_file_falls_back_to_root() {
        let fx = setup().await;
        let docs = fx.folder(&fx.root, "docs").await;
        let (file, _) = fx.file(&docs, "a.txt", b"x").await;

        let file_item = fx.service().soft_delete_file(fx.user_id, file.id).await.unwrap();
        fx.service().soft_delete_folder(fx.user_id, docs.id).await.unwrap();

        let RestoredItem::File(restored) =
            fx.service().restore(fx.user_id, file_item.id).await.unwrap()
        else {
            panic!("expected a file");
        };
        assert_eq!(restored.folder_id, fx.root.id);
    }

    #[tokio::test]
    async fn test_folder_subtree_delete_and_restore() {
        let fx = setup().await;
        let docs = fx.folder(&fx.root, "docs").await;
        let old = fx.folder(&docs, "old").await;
        let (f, _) = fx.file(&docs, "f.txt", b"f").await;
        let (g, _) = fx.file(&old, "g.txt", b"g").await;

        let item = fx.service().soft_delete_folder(fx.user_id, docs.id).await.unwrap();
        let page = fx.service().list(fx.user_id, 1, 20).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(item.folder_snapshot().unwrap().parent_id, Some(fx.root.id));

        {
            let mut conn = fx.db.acquire().await.unwrap();
            for id in [docs.id, old.id] {
                let folder = FolderRepository::get_by_id(&mut conn, id).await.unwrap().unwrap();
                assert_eq!(folder.deleted_at, Some(item.deleted_at));
            }
            for id in [f.id, g.id] {
                assert!(FileRepository::get_by_id(&mut conn, id)
                    .await
                    .unwrap()
                    .unwrap()
                    .is_deleted());
            }
        }

        // a new active "docs" forces the suffix
        fx.folder(&fx.root, "docs").await;

        let RestoredItem::Folder(restored) = fx.service().restore(fx.user_id, item.id).await.unwrap()
        else {
            panic!("expected a folder");
        };
        assert_eq!(restored.name, "docs(restored)");
        assert_eq!(restored.path, "/docs(restored)");

        let mut conn = fx.db.acquire().await.unwrap();
        let old = FolderRepository::get_by_id(&mut conn, old.id).await.unwrap().unwrap();
        assert_eq!(old.path, "/docs(restored)/old");
        assert!(!old.is_deleted());
        for id in [f.id, g.id] {
            assert!(!FileRepository::get_by_id(&mut conn, id)
                .await
                .unwrap()
                .unwrap()
                .is_deleted());
        }
    }

    #[tokio::test]
    async fn test_folder_delete_leaves_case_variant_sibling() {
        let fx = setup().await;
        let lower = fx.folder(&fx.root, "docs").await;
        let upper = fx.folder(&fx.root, "Docs").await;
        let keep = fx.folder(&upper, "keep").await;
        let (k, _) = fx.file(&keep, "k.txt", b"keep me").await;
        let used = fx.used().await;

        let item = fx.service().soft_delete_folder(fx.user_id, lower.id).await.unwrap();
        {
            let mut conn = fx.db.acquire().await.unwrap();
            assert!(FolderRepository::get_active(&mut conn, fx.user_id, keep.id)
                .await
                .unwrap()
                .is_some());
            assert!(!FileRepository::get_by_id(&mut conn, k.id)
                .await
                .unwrap()
                .unwrap()
                .is_deleted());
        }

        fx.service().permanent_delete(fx.user_id, item.id).await.unwrap();
        let mut conn = fx.db.acquire().await.unwrap();
        assert!(FolderRepository::get_active(&mut conn, fx.user_id, keep.id)
            .await
            .unwrap()
            .is_some());
        assert!(FileRepository::get_by_id(&mut conn, k.id).await.unwrap().is_some());
        drop(conn);
        assert_eq!(fx.used().await, used);
    }

    #[tokio::test]
    async fn test_purging_reused_name_keeps_renamed_entry() {
        let fx = setup().await;
        let folders = crate::file::FolderService::new(&fx.db, &fx.storage, &fx.config);
        let docs = fx.folder(&fx.root, "docs").await;
        let old = fx.folder(&docs, "old").await;
        let (g, _) = fx.file(&old, "g.txt", b"g").await;

        let old_item = fx.service().soft_delete_folder(fx.user_id, old.id).await.unwrap();
        folders.rename(fx.user_id, docs.id, "papers").await.unwrap();

        let reused = fx.folder(&fx.root, "docs").await;
        let reused_item = fx.service().soft_delete_folder(fx.user_id, reused.id).await.unwrap();
        fx.service()
            .permanent_delete(fx.user_id, reused_item.id)
            .await
            .unwrap();

        let RestoredItem::Folder(restored) =
            fx.service().restore(fx.user_id, old_item.id).await.unwrap()
        else {
            panic!("expected a folder");
        };
        assert_eq!(restored.path, "/papers/old");
        assert_eq!(restored.parent_id, Some(docs.id));

        let mut conn = fx.db.acquire().await.unwrap();
        let g = FileRepository::get_by_id(&mut conn, g.id).await.unwrap().unwrap();
        assert!(!g.is_deleted());
        assert_eq!(g.folder_id, old.id);
    }

    #[tokio::test]
    async fn test_root_cannot_be_deleted() {
        let fx = setup().await;
        let err = fx
            .service()
            .soft_delete_folder(fx.user_id, fx.root.id)
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_permanent_delete_shared_object() {
        let fx = setup().await;
        let (a, object) = fx.file(&fx.root, "a.txt", b"shared").await;
        let (b, _) = fx.file(&fx.root, "b.txt", b"shared").await;
        assert_eq!(fx.used().await, 12);

        let item_a = fx.service().soft_delete_file(fx.user_id, a.id).await.unwrap();
        fx.service().permanent_delete(fx.user_id, item_a.id).await.unwrap();

        assert_eq!(fx.used().await, 6);
        assert!(fx.storage.exists(&object.file_path).await);
        {
            let mut conn = fx.db.acquire().await.unwrap();
            let object = FileObjectRepository::get_by_id(&mut conn, object.id)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(object.ref_count, 1);
        }

        let item_b = fx.service().soft_delete_file(fx.user_id, b.id).await.unwrap();
        fx.service().permanent_delete(fx.user_id, item_b.id).await.unwrap();

        assert_eq!(fx.used().await, 0);
        assert!(!fx.storage.exists(&object.file_path).await);
        let mut conn = fx.db.acquire().await.unwrap();
        assert!(FileObjectRepository::get_by_id(&mut conn, object.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_empty_purges_everything() {
        let fx = setup().await;
        let docs = fx.folder(&fx.root, "docs").await;
        let old = fx.folder(&docs, "old").await;
        let (g, _) = fx.file(&old, "g.txt", b"g").await;
        let (f, _) = fx.file(&fx.root, "f.txt", b"ff").await;

        // g gets its own entry before its ancestor goes
        fx.service().soft_delete_file(fx.user_id, g.id).await.unwrap();
        fx.service().soft_delete_folder(fx.user_id, docs.id).await.unwrap();
        fx.service().soft_delete_file(fx.user_id, f.id).await.unwrap();

        let purged = fx.service().empty(fx.user_id).await.unwrap();
        assert_eq!(purged, 3);
        assert_eq!(fx.used().await, 0);
        assert_eq!(fx.service().list(fx.user_id, 1, 20).await.unwrap().total, 0);

        let mut conn = fx.db.acquire().await.unwrap();
        assert!(FolderRepository::get_by_id(&mut conn, old.id).await.unwrap().is_none());
        assert!(FileRepository::get_by_id(&mut conn, g.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_paging() {
        let fx = setup().await;
        for i in 0..3 {
            let (file, _) = fx.file(&fx.root, &format!("{i}.txt"), format!("{i}").as_bytes()).await;
            fx.service().soft_delete_file(fx.user_id, file.id).await.unwrap();
        }

        let page = fx.service().list(fx.user_id, 2, 2).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.total_pages, 2);
        assert!(page.has_prev());
        assert!(!page.has_next());

        let page = fx.service().list(fx.user_id, 0, 500).await.unwrap();
        assert_eq!(page.page, 1);
        assert_eq!(page.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(page.items.len(), 3);
    }

    #[tokio::test]
    async fn test_purge_item_twice() {
        let fx = setup().await;
        let (file, _) = fx.file(&fx.root, "a.txt", b"abc").await;
        let item = fx.service().soft_delete_file(fx.user_id, file.id).await.unwrap();

        assert!(fx.service().purge_item(item.id).await.unwrap());
        assert!(!fx.service().purge_item(item.id).await.unwrap());
        assert_eq!(fx.used().await, 0);
    }
}
