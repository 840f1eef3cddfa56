//! File service.
//!
//! High-level operations on logical files:
//! - Single-shot upload with per-user deduplication
//! - Listing, rename and move
//! - Soft delete into the recycle bin
//! - Download, preview and thumbnail access info

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Serialize;
use tracing::info;

use super::dedup::{FilePlacement, ObjectManager, PendingObject};
use super::metadata::{FileEntry, FileRepository, FileUpdate};
use super::object::{FileObject, FileObjectRepository};
use super::resolver::FolderResolver;
use super::storage::{content_hash, BlobStore};
use super::thumbnail::{inspect_image, ThumbnailGenerator};
use crate::config::{Config, StorageConfig};
use crate::db::{Database, UserRepository};
use crate::recycle::{RecycleBinItem, RecycleBinService};
use crate::{Result, VaultError};

/// Content type of generated thumbnails.
pub const THUMBNAIL_CONTENT_TYPE: &str = "image/jpeg";

/// Where to find the bytes of a file and how to serve them.
#[derive(Debug, Clone)]
pub struct AccessInfo {
    pub file: FileEntry,
    pub object: FileObject,
    pub abs_path: PathBuf,
    pub content_type: String,
    pub download_name: String,
}

/// Thumbnail availability of one requested file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThumbnailStatus {
    pub file_id: i64,
    /// The file is active and owned by the user.
    pub exists: bool,
    pub has_thumbnail: bool,
}

/// Guess a MIME type from a file name.
pub fn guess_mime_type(name: &str) -> String {
    mime_guess::from_path(name)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Reject empty or whitespace-only names. Returns the trimmed name.
pub(crate) fn validate_name(name: &str, what: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(VaultError::Validation(format!("{what} must not be empty")));
    }
    if trimmed.contains(['/', '\\']) {
        return Err(VaultError::Validation(format!(
            "{what} must not contain path separators"
        )));
    }
    Ok(trimmed.to_string())
}

/// Check a client file name and declared size against the storage limits.
/// Returns the trimmed name.
pub(crate) fn check_upload_limits(storage: &StorageConfig, name: &str, size: i64) -> Result<String> {
    let name = validate_name(name, "file name")?;
    if size < 0 {
        return Err(VaultError::Validation("file size must not be negative".to_string()));
    }
    if size > storage.max_file_size {
        return Err(VaultError::Validation(format!(
            "file is too large ({size} bytes, limit {} bytes)",
            storage.max_file_size
        )));
    }
    if !storage.allows_extension(&name) {
        return Err(VaultError::Validation(format!("file type not allowed: {name}")));
    }
    Ok(name)
}

/// File service.
pub struct FileService<'a> {
    db: &'a Database,
    storage: &'a BlobStore,
    config: &'a Config,
    thumbnailer: &'a dyn ThumbnailGenerator,
}

impl<'a> FileService<'a> {
    pub fn new(
        db: &'a Database,
        storage: &'a BlobStore,
        config: &'a Config,
        thumbnailer: &'a dyn ThumbnailGenerator,
    ) -> Self {
        Self {
            db,
            storage,
            config,
            thumbnailer,
        }
    }

    fn objects(&self) -> ObjectManager<'a> {
        ObjectManager::new(self.db, self.storage)
    }

    fn recycle_bin(&self) -> RecycleBinService<'a> {
        RecycleBinService::new(self.db, self.storage, &self.config.recycle_bin)
    }

    /// Upload a whole file in one call.
    ///
    /// `folder_id` 0 means the root. Identical content the user already
    /// holds is linked instead of written again.
    pub async fn upload(
        &self,
        user_id: i64,
        folder_id: i64,
        name: &str,
        content: &[u8],
    ) -> Result<FileEntry> {
        let size = content.len() as i64;
        let name = check_upload_limits(&self.config.storage, name, size)?;

        let folder = {
            let mut conn = self.db.acquire().await?;
            let folder = FolderResolver::resolve(&mut conn, user_id, folder_id).await?;
            UserRepository::ensure_quota(&mut conn, user_id, size).await?;
            folder
        };

        let placement = FilePlacement {
            user_id,
            folder_id: folder.id,
            original_name: name.clone(),
        };
        let hash = content_hash(content);

        let objects = self.objects();
        if let Some((file, _)) = objects.link_existing(&placement, &hash).await? {
            return Ok(file);
        }

        let location = self.storage.allocate_blob(user_id, &name);
        if let Err(e) = self.storage.write(&location.relative_path, content).await {
            self.storage.delete_quietly(&location.relative_path).await;
            return Err(e);
        }

        let image = inspect_image(
            self.thumbnailer,
            self.storage,
            user_id,
            &name,
            &location.relative_path,
        )
        .await;
        let pending = PendingObject {
            stored_name: location.stored_name,
            file_path: location.relative_path,
            size,
            hash,
            mime_type: guess_mime_type(&name),
            image,
        };

        let (file, _) = objects.commit_fresh(&placement, &pending, None).await?;
        info!(user_id, file_id = file.id, size, name = %name, "file uploaded");
        Ok(file)
    }

    /// Get an active file of the user.
    pub async fn get(&self, user_id: i64, file_id: i64) -> Result<FileEntry> {
        let mut conn = self.db.acquire().await?;
        FileRepository::get_active(&mut conn, user_id, file_id)
            .await?
            .ok_or_else(|| VaultError::NotFound("file".to_string()))
    }

    /// List active files in a folder (`0` = root), sorted by name.
    pub async fn list(&self, user_id: i64, folder_id: i64) -> Result<Vec<FileEntry>> {
        let mut conn = self.db.acquire().await?;
        let folder = FolderResolver::resolve(&mut conn, user_id, folder_id).await?;
        FileRepository::list_by_folder(&mut conn, user_id, folder.id).await
    }

    /// Change a file's display name.
    pub async fn rename(&self, user_id: i64, file_id: i64, name: &str) -> Result<FileEntry> {
        let name = validate_name(name, "file name")?;
        let mut conn = self.db.acquire().await?;
        let file = FileRepository::get_active(&mut conn, user_id, file_id)
            .await?
            .ok_or_else(|| VaultError::NotFound("file".to_string()))?;

        FileRepository::update(&mut conn, file.id, &FileUpdate::new().original_name(name)).await?;
        FileRepository::get_by_id(&mut conn, file.id)
            .await?
            .ok_or_else(|| VaultError::NotFound("file".to_string()))
    }

    /// Move a file into another folder (`0` = root).
    pub async fn move_to(&self, user_id: i64, file_id: i64, folder_id: i64) -> Result<FileEntry> {
        let mut conn = self.db.acquire().await?;
        let file = FileRepository::get_active(&mut conn, user_id, file_id)
            .await?
            .ok_or_else(|| VaultError::NotFound("file".to_string()))?;
        let folder = FolderResolver::resolve(&mut conn, user_id, folder_id).await?;

        FileRepository::update(&mut conn, file.id, &FileUpdate::new().folder_id(folder.id)).await?;
        FileRepository::get_by_id(&mut conn, file.id)
            .await?
            .ok_or_else(|| VaultError::NotFound("file".to_string()))
    }

    /// Move a file to the recycle bin.
    pub async fn delete(&self, user_id: i64, file_id: i64) -> Result<RecycleBinItem> {
        self.recycle_bin().soft_delete_file(user_id, file_id).await
    }

    /// Move several files to the recycle bin at once; unknown ids are skipped.
    pub async fn batch_delete(&self, user_id: i64, file_ids: &[i64]) -> Result<Vec<RecycleBinItem>> {
        self.recycle_bin().soft_delete_files(user_id, file_ids).await
    }

    /// Move several files into one folder. Returns how many moved; ids that
    /// do not name an active file of the user are skipped.
    pub async fn batch_move(&self, user_id: i64, file_ids: &[i64], folder_id: i64) -> Result<usize> {
        let mut tx = self.db.begin().await?;
        let folder = FolderResolver::resolve(&mut tx, user_id, folder_id).await?;

        let mut moved = 0;
        for &file_id in file_ids {
            if FileRepository::get_active(&mut tx, user_id, file_id).await?.is_none() {
                continue;
            }
            FileRepository::update(&mut tx, file_id, &FileUpdate::new().folder_id(folder.id)).await?;
            moved += 1;
        }

        tx.commit()
            .await
            .map_err(|e| VaultError::Database(e.to_string()))?;
        info!(user_id, folder_id = folder.id, moved, "files moved");
        Ok(moved)
    }

    async fn load_with_object(&self, user_id: i64, file_id: i64) -> Result<(FileEntry, FileObject)> {
        let mut conn = self.db.acquire().await?;
        let file = FileRepository::get_active(&mut conn, user_id, file_id)
            .await?
            .ok_or_else(|| VaultError::NotFound("file".to_string()))?;
        let object = FileObjectRepository::get_by_id(&mut conn, file.object_id)
            .await?
            .ok_or_else(|| VaultError::NotFound("file object".to_string()))?;
        Ok((file, object))
    }

    /// Locate the bytes of a file for download.
    pub async fn download_info(&self, user_id: i64, file_id: i64) -> Result<AccessInfo> {
        let (file, object) = self.load_with_object(user_id, file_id).await?;
        if !self.storage.exists(&object.file_path).await {
            return Err(VaultError::NotFound("file in storage".to_string()));
        }

        Ok(AccessInfo {
            abs_path: self.storage.full_path(&object.file_path),
            content_type: object.mime_type.clone(),
            download_name: file.original_name.clone(),
            file,
            object,
        })
    }

    /// Locate the bytes of a file for inline display.
    pub async fn preview_info(&self, user_id: i64, file_id: i64) -> Result<AccessInfo> {
        self.download_info(user_id, file_id).await
    }

    /// Thumbnail availability for several files, in request order.
    ///
    /// Unknown, foreign and deleted files are reported with `exists: false`
    /// instead of failing the whole batch.
    pub async fn batch_thumbnails(
        &self,
        user_id: i64,
        file_ids: &[i64],
    ) -> Result<Vec<ThumbnailStatus>> {
        let mut conn = self.db.acquire().await?;
        let found: HashMap<i64, Option<String>> =
            FileRepository::thumbnail_paths(&mut conn, user_id, file_ids)
                .await?
                .into_iter()
                .collect();

        Ok(file_ids
            .iter()
            .map(|&file_id| match found.get(&file_id) {
                Some(thumb) => ThumbnailStatus {
                    file_id,
                    exists: true,
                    has_thumbnail: thumb.as_deref().is_some_and(|t| !t.is_empty()),
                },
                None => ThumbnailStatus {
                    file_id,
                    exists: false,
                    has_thumbnail: false,
                },
            })
            .collect())
    }

    /// Locate the thumbnail of an image file.
    pub async fn thumbnail_info(&self, user_id: i64, file_id: i64) -> Result<AccessInfo> {
        let (file, object) = self.load_with_object(user_id, file_id).await?;
        let Some(thumb) = object.thumbnail_path.clone().filter(|t| !t.is_empty()) else {
            return Err(VaultError::NotFound("thumbnail".to_string()));
        };
        if !self.storage.exists(&thumb).await {
            return Err(VaultError::NotFound("thumbnail in storage".to_string()));
        }

        Ok(AccessInfo {
            abs_path: self.storage.full_path(&thumb),
            content_type: THUMBNAIL_CONTENT_TYPE.to_string(),
            download_name: file.original_name.clone(),
            file,
            object,
        })
    }
}
