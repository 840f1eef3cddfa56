//! File object manager: per-user content deduplication and reclamation.
//!
//! Every path that creates a logical file goes through [`ObjectManager`]
//! so that object creation, the file row and the storage charge commit
//! together. Every permanent file deletion releases exactly one reference
//! through [`ObjectManager::release`]; physical bytes are only removed once
//! the catalog change that orphaned them has committed.

use sqlx::SqliteConnection;
use tracing::{info, warn};

use super::metadata::{FileEntry, FileRepository, NewFile};
use super::object::{FileObject, FileObjectRepository, NewFileObject};
use super::storage::BlobStore;
use super::thumbnail::ImageInfo;
use crate::db::{Database, UserRepository};
use crate::upload::UploadTaskRepository;
use crate::{Result, VaultError};

/// Where a new logical file is placed.
#[derive(Debug, Clone)]
pub struct FilePlacement {
    pub user_id: i64,
    /// Concrete folder id.
    pub folder_id: i64,
    pub original_name: String,
}

/// Bytes already written to the blob store, waiting for catalog rows.
#[derive(Debug, Clone)]
pub struct PendingObject {
    pub stored_name: String,
    pub file_path: String,
    pub size: i64,
    pub hash: String,
    pub mime_type: String,
    pub image: ImageInfo,
}

/// Creates, ref-counts and reclaims file objects.
pub struct ObjectManager<'a> {
    db: &'a Database,
    storage: &'a BlobStore,
}

impl<'a> ObjectManager<'a> {
    pub fn new(db: &'a Database, storage: &'a BlobStore) -> Self {
        Self { db, storage }
    }

    /// Look up an object the user already holds with this content hash.
    pub async fn find_by_user_and_hash(&self, user_id: i64, hash: &str) -> Result<Option<FileObject>> {
        let mut conn = self.db.acquire().await?;
        FileObjectRepository::find_by_user_and_hash(&mut conn, user_id, hash).await
    }

    /// Instant upload: point a new file at an existing object of the same
    /// user and content, without writing any bytes.
    ///
    /// Returns `None` when the user holds no such object.
    pub async fn link_existing(
        &self,
        placement: &FilePlacement,
        hash: &str,
    ) -> Result<Option<(FileEntry, FileObject)>> {
        let mut tx = self.db.begin().await?;

        let Some(object) =
            FileObjectRepository::find_by_user_and_hash(&mut tx, placement.user_id, hash).await?
        else {
            return Ok(None);
        };

        FileObjectRepository::increment_ref(&mut tx, object.id).await?;
        let file = FileRepository::create(
            &mut tx,
            &NewFile::new(
                placement.user_id,
                placement.folder_id,
                object.id,
                object.stored_name(),
                placement.original_name.clone(),
            ),
        )
        .await?;
        UserRepository::add_storage_used(&mut tx, placement.user_id, object.file_size).await?;

        tx.commit()
            .await
            .map_err(|e| VaultError::Database(e.to_string()))?;

        info!(
            user_id = placement.user_id,
            file_id = file.id,
            object_id = object.id,
            "instant upload linked existing object"
        );
        Ok(Some((file, object)))
    }

    /// Commit freshly written bytes: object row with one reference, file
    /// row, storage charge and (for chunked uploads) the session's
    /// `completed` transition, all in one transaction.
    ///
    /// If the transaction fails the blob and its thumbnail are removed.
    pub async fn commit_fresh(
        &self,
        placement: &FilePlacement,
        pending: &PendingObject,
        upload_id: Option<&str>,
    ) -> Result<(FileEntry, FileObject)> {
        match self.try_commit_fresh(placement, pending, upload_id).await {
            Ok(committed) => Ok(committed),
            Err(e) => {
                warn!(
                    user_id = placement.user_id,
                    path = %pending.file_path,
                    error = %e,
                    "catalog commit failed, discarding written blob"
                );
                self.storage.delete_quietly(&pending.file_path).await;
                if let Some(ref thumb) = pending.image.thumbnail_path {
                    self.storage.delete_quietly(thumb).await;
                }
                Err(e)
            }
        }
    }

    async fn try_commit_fresh(
        &self,
        placement: &FilePlacement,
        pending: &PendingObject,
        upload_id: Option<&str>,
    ) -> Result<(FileEntry, FileObject)> {
        let mut tx = self.db.begin().await?;

        let object = FileObjectRepository::create(
            &mut tx,
            &NewFileObject {
                file_path: pending.file_path.clone(),
                thumbnail_path: pending.image.thumbnail_path.clone(),
                file_size: pending.size,
                mime_type: pending.mime_type.clone(),
                is_image: pending.image.is_image,
                width: pending.image.width,
                height: pending.image.height,
                content_hash: pending.hash.to_lowercase(),
            },
        )
        .await?;

        let file = FileRepository::create(
            &mut tx,
            &NewFile::new(
                placement.user_id,
                placement.folder_id,
                object.id,
                pending.stored_name.clone(),
                placement.original_name.clone(),
            ),
        )
        .await?;

        UserRepository::add_storage_used(&mut tx, placement.user_id, pending.size).await?;

        if let Some(upload_id) = upload_id {
            if !UploadTaskRepository::mark_completed(&mut tx, upload_id).await? {
                return Err(VaultError::Conflict(format!(
                    "upload {upload_id} is already completed"
                )));
            }
        }

        tx.commit()
            .await
            .map_err(|e| VaultError::Database(e.to_string()))?;

        info!(
            user_id = placement.user_id,
            file_id = file.id,
            object_id = object.id,
            size = pending.size,
            "file object created"
        );
        Ok((file, object))
    }

    /// Drop one reference to an object inside the caller's transaction.
    ///
    /// When the last reference goes, the object row is deleted and the
    /// object is returned so the caller can [`reclaim`](Self::reclaim) its
    /// bytes after committing. A missing object is a no-op.
    pub async fn release(
        &self,
        conn: &mut SqliteConnection,
        object_id: i64,
    ) -> Result<Option<FileObject>> {
        let Some(object) = FileObjectRepository::get_by_id(&mut *conn, object_id).await? else {
            return Ok(None);
        };

        match FileObjectRepository::decrement_ref(&mut *conn, object_id).await? {
            Some(remaining) if remaining > 0 => Ok(None),
            _ => {
                FileObjectRepository::delete_unreferenced(conn, object_id).await?;
                Ok(Some(object))
            }
        }
    }

    /// Remove the bytes of objects whose last reference was released.
    /// Best-effort; failures are logged.
    pub async fn reclaim(&self, objects: &[FileObject]) {
        for object in objects {
            self.storage.delete_quietly(&object.file_path).await;
            if let Some(ref thumb) = object.thumbnail_path {
                self.storage.delete_quietly(thumb).await;
            }
            info!(
                object_id = object.id,
                size = object.file_size,
                "file object reclaimed"
            );
        }
    }
}
