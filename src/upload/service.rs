//! Chunked upload state machine.
//!
//! `init` either links existing content (instant upload) or opens a session;
//! chunks land in the session's temp directory and are acknowledged in the
//! progress store; `complete` merges them, verifies the declared hash and
//! commits the file through the object manager.

use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::lock::CompletionLocks;
use super::progress::UploadProgressStore;
use super::task::{chunk_count, NewUploadTask, UploadTask, UploadTaskRepository};
use crate::config::Config;
use crate::db::{Database, UserRepository};
use crate::file::{
    check_upload_limits, guess_mime_type, inspect_image, BlobStore, FileEntry, FilePlacement,
    FolderResolver, ObjectManager, PendingObject, ThumbnailGenerator,
};
use crate::{Result, VaultError};

/// Parameters of a new upload.
#[derive(Debug, Clone, Deserialize)]
pub struct InitUpload {
    /// Target folder, `0` for the root.
    #[serde(default)]
    pub folder_id: i64,
    pub file_name: String,
    pub file_size: i64,
    /// Declared content hash of the whole file, hex.
    pub file_hash: String,
}

/// Result of [`UploadService::init`].
#[derive(Debug, Clone)]
pub enum InitOutcome {
    /// The user already holds this content; the file exists now.
    Instant { file: FileEntry },
    /// A session was opened; send `total_chunks` chunks of `chunk_size`.
    Started {
        upload_id: String,
        chunk_size: i64,
        total_chunks: i64,
    },
}

/// Acknowledgement of one chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkReceipt {
    pub chunk_index: i64,
    pub uploaded_chunks: i64,
    pub total_chunks: i64,
    /// The chunk had been received before and was not written again.
    pub already_present: bool,
}

/// Resume information for a session.
#[derive(Debug, Clone, Serialize)]
pub struct UploadProgress {
    pub upload_id: String,
    pub file_name: String,
    pub file_size: i64,
    pub chunk_size: i64,
    pub total_chunks: i64,
    pub uploaded_count: i64,
    /// Received chunk indices, ascending.
    pub uploaded_chunks: Vec<i64>,
    pub status: String,
}

/// Resumable upload service.
pub struct UploadService<'a> {
    db: &'a Database,
    storage: &'a BlobStore,
    config: &'a Config,
    thumbnailer: &'a dyn ThumbnailGenerator,
    progress: &'a dyn UploadProgressStore,
    locks: &'a CompletionLocks,
}

impl<'a> UploadService<'a> {
    pub fn new(
        db: &'a Database,
        storage: &'a BlobStore,
        config: &'a Config,
        thumbnailer: &'a dyn ThumbnailGenerator,
        progress: &'a dyn UploadProgressStore,
        locks: &'a CompletionLocks,
    ) -> Self {
        Self {
            db,
            storage,
            config,
            thumbnailer,
            progress,
            locks,
        }
    }

    fn progress_ttl(&self) -> StdDuration {
        StdDuration::from_secs(self.config.upload.progress_ttl_secs)
    }

    /// Load a session and check that `user_id` owns it.
    async fn load_task(&self, user_id: i64, upload_id: &str) -> Result<UploadTask> {
        let mut conn = self.db.acquire().await?;
        let task = UploadTaskRepository::get_by_upload_id(&mut conn, upload_id)
            .await?
            .ok_or_else(|| VaultError::NotFound("upload task".to_string()))?;
        if task.user_id != user_id {
            return Err(VaultError::Permission(
                "upload task belongs to another user".to_string(),
            ));
        }
        Ok(task)
    }

    /// Start an upload.
    ///
    /// Quota is checked against the declared size. If the user already
    /// holds content with the declared hash the file is linked right away
    /// and no session is created.
    pub async fn init(&self, user_id: i64, request: &InitUpload) -> Result<InitOutcome> {
        let name = check_upload_limits(&self.config.storage, &request.file_name, request.file_size)?;
        let hash = request.file_hash.trim().to_lowercase();
        if hash.is_empty() {
            return Err(VaultError::Validation("file hash must not be empty".to_string()));
        }

        let folder = {
            let mut conn = self.db.acquire().await?;
            let folder = FolderResolver::resolve(&mut conn, user_id, request.folder_id).await?;
            UserRepository::ensure_quota(&mut conn, user_id, request.file_size).await?;
            folder
        };

        let placement = FilePlacement {
            user_id,
            folder_id: folder.id,
            original_name: name.clone(),
        };
        if let Some((file, _)) = ObjectManager::new(self.db, self.storage)
            .link_existing(&placement, &hash)
            .await?
        {
            return Ok(InitOutcome::Instant { file });
        }

        let chunk_size = self.config.storage.chunk_size;
        let total_chunks = chunk_count(request.file_size, chunk_size);
        let upload_id = Uuid::new_v4().to_string();
        let temp_dir = self.storage.create_temp_dir(&upload_id).await?;

        let created = {
            let mut conn = self.db.acquire().await?;
            UploadTaskRepository::create(
                &mut conn,
                &NewUploadTask {
                    upload_id: upload_id.clone(),
                    user_id,
                    folder_id: folder.id,
                    file_name: name.clone(),
                    file_size: request.file_size,
                    file_hash: hash,
                    chunk_size,
                    total_chunks,
                    temp_dir: temp_dir.clone(),
                    expires_at: Utc::now() + Duration::hours(self.config.upload.task_expiry_hours),
                },
            )
            .await
        };
        if let Err(e) = created {
            if let Err(cleanup) = self.storage.remove_dir(&temp_dir).await {
                warn!(upload_id = %upload_id, error = %cleanup, "failed to remove temp dir");
            }
            return Err(e);
        }

        info!(
            user_id,
            upload_id = %upload_id,
            name = %name,
            size = request.file_size,
            total_chunks,
            "upload initialized"
        );
        Ok(InitOutcome::Started {
            upload_id,
            chunk_size,
            total_chunks,
        })
    }

    /// Store one chunk. Re-sending a chunk that already arrived is a no-op.
    pub async fn upload_chunk(
        &self,
        user_id: i64,
        upload_id: &str,
        chunk_index: i64,
        content: &[u8],
    ) -> Result<ChunkReceipt> {
        let task = self.load_task(user_id, upload_id).await?;
        if task.is_completed() {
            return Err(VaultError::Conflict(format!("upload {upload_id} is already completed")));
        }
        if !(0..task.total_chunks).contains(&chunk_index) {
            return Err(VaultError::Validation(format!(
                "chunk index {chunk_index} out of range 0..{}",
                task.total_chunks
            )));
        }
        if content.len() as i64 > task.chunk_size {
            return Err(VaultError::Validation(format!(
                "chunk is larger than the chunk size of {} bytes",
                task.chunk_size
            )));
        }

        if self.progress.is_member(upload_id, chunk_index).await? {
            return Ok(ChunkReceipt {
                chunk_index,
                uploaded_chunks: self.progress.count(upload_id).await?,
                total_chunks: task.total_chunks,
                already_present: true,
            });
        }

        self.storage
            .write_chunk(&task.temp_dir, chunk_index, content)
            .await?;
        self.progress
            .add(upload_id, chunk_index, self.progress_ttl())
            .await?;
        let uploaded_chunks = self.progress.count(upload_id).await?;

        debug!(
            upload_id,
            chunk_index,
            size = content.len(),
            uploaded_chunks,
            total_chunks = task.total_chunks,
            "chunk received"
        );
        Ok(ChunkReceipt {
            chunk_index,
            uploaded_chunks,
            total_chunks: task.total_chunks,
            already_present: false,
        })
    }

    /// Describe a session so the client can resume it.
    pub async fn status(&self, user_id: i64, upload_id: &str) -> Result<UploadProgress> {
        let task = self.load_task(user_id, upload_id).await?;
        let uploaded_chunks = self.progress.list_indices(upload_id).await?;

        Ok(UploadProgress {
            upload_id: task.upload_id,
            file_name: task.file_name,
            file_size: task.file_size,
            chunk_size: task.chunk_size,
            total_chunks: task.total_chunks,
            uploaded_count: uploaded_chunks.len() as i64,
            uploaded_chunks,
            status: task.status.to_string(),
        })
    }

    /// Merge the chunks, verify the hash and commit the file.
    ///
    /// Completions of the same session are serialized; a session that is
    /// already completed is rejected.
    pub async fn complete(&self, user_id: i64, upload_id: &str) -> Result<FileEntry> {
        let _guard = self.locks.acquire(upload_id).await;

        let task = self.load_task(user_id, upload_id).await?;
        if task.is_completed() {
            return Err(VaultError::Conflict(format!("upload {upload_id} is already completed")));
        }
        let folder = {
            let mut conn = self.db.acquire().await?;
            FolderResolver::resolve(&mut conn, user_id, task.folder_id).await?
        };

        let uploaded = self.progress.count(upload_id).await?;
        if uploaded < task.total_chunks {
            return Err(VaultError::Integrity(format!(
                "not all chunks uploaded, uploaded {uploaded}/{}",
                task.total_chunks
            )));
        }

        let location = self.storage.allocate_blob(user_id, &task.file_name);
        let merged = self
            .storage
            .merge_chunks(&task.temp_dir, task.total_chunks, &location.relative_path)
            .await?;
        if !merged.hash.eq_ignore_ascii_case(&task.file_hash) {
            self.storage.delete_quietly(&location.relative_path).await;
            warn!(
                upload_id,
                expected = %task.file_hash,
                actual = %merged.hash,
                "merged content does not match declared hash"
            );
            return Err(VaultError::Integrity(
                "content hash mismatch after merging chunks".to_string(),
            ));
        }

        let image = inspect_image(
            self.thumbnailer,
            self.storage,
            user_id,
            &task.file_name,
            &location.relative_path,
        )
        .await;
        let pending = PendingObject {
            stored_name: location.stored_name,
            file_path: location.relative_path,
            size: merged.size,
            hash: merged.hash,
            mime_type: guess_mime_type(&task.file_name),
            image,
        };
        let placement = FilePlacement {
            user_id,
            folder_id: folder.id,
            original_name: task.file_name.clone(),
        };

        let (file, _) = ObjectManager::new(self.db, self.storage)
            .commit_fresh(&placement, &pending, Some(upload_id))
            .await?;

        if let Err(e) = self.storage.remove_dir(&task.temp_dir).await {
            warn!(upload_id, error = %e, "failed to remove upload temp dir");
        }
        if let Err(e) = self.progress.clear(upload_id).await {
            warn!(upload_id, error = %e, "failed to clear upload progress");
        }

        info!(
            user_id,
            upload_id,
            file_id = file.id,
            size = pending.size,
            "upload completed"
        );
        Ok(file)
    }
}
