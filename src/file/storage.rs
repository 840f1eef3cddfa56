//! Physical blob storage for filevault.
//!
//! The blob store owns a directory tree and knows nothing about the catalog.
//! Everything it hands out is a path *relative* to its base, which is what
//! the catalog persists:
//!
//! ```text
//! {base_path}/
//! ├── files/{user_id}/{shard}/{uuid}_{sanitized_name}
//! ├── thumbnails/{user_id}/{shard}/{uuid}_thumb.jpg
//! └── temp/{upload_id}/chunk_{index}
//! ```
//!
//! `shard` is the first 2 characters of the generated UUID, so every
//! generated path is unique and writers never contend on a file.

use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{Result, VaultError};

const FILES_DIR: &str = "files";
const THUMBNAILS_DIR: &str = "thumbnails";
const TEMP_DIR: &str = "temp";

/// Read buffer used when streaming chunks into the merged file.
const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Compute the content hash (lowercase hex SHA-256) of a byte slice.
pub fn content_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Reduce a client-supplied name to a safe single path component.
///
/// Keeps the base name and replaces `..`, `/` and `\` with `_`.
pub fn sanitize_filename(name: &str) -> String {
    let base = name
        .rsplit(['/', '\\'])
        .find(|part| !part.is_empty())
        .unwrap_or("");
    let cleaned = base.replace("..", "_").replace(['/', '\\'], "_");
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}

/// A blob location handed out before any bytes are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobLocation {
    /// `{uuid}_{sanitized_name}`, recorded as the File's stored name.
    pub stored_name: String,
    /// Path relative to the store base.
    pub relative_path: String,
}

/// Result of merging an upload's chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedBlob {
    pub size: i64,
    pub hash: String,
}

/// Blob store rooted at a base directory.
#[derive(Debug, Clone)]
pub struct BlobStore {
    base_path: PathBuf,
}

impl BlobStore {
    /// Create a new BlobStore with the given base path.
    ///
    /// The base directory will be created if it doesn't exist.
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        std::fs::create_dir_all(&base_path)?;

        Ok(Self { base_path })
    }

    /// Get the base path of this storage.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Absolute path of a stored relative path.
    pub fn full_path(&self, relative: &str) -> PathBuf {
        self.base_path.join(relative)
    }

    /// Get the shard directory name for a generated name.
    fn get_shard(name: &str) -> &str {
        name.get(..2).unwrap_or(name)
    }

    /// Allocate a fresh, unique location for a user's blob.
    pub fn allocate_blob(&self, user_id: i64, original_name: &str) -> BlobLocation {
        let uuid = Uuid::new_v4().to_string();
        let stored_name = format!("{uuid}_{}", sanitize_filename(original_name));
        let relative_path = format!(
            "{FILES_DIR}/{user_id}/{}/{stored_name}",
            Self::get_shard(&uuid)
        );
        BlobLocation {
            stored_name,
            relative_path,
        }
    }

    /// Allocate a fresh, unique location for a user's thumbnail.
    pub fn allocate_thumbnail(&self, user_id: i64) -> String {
        let uuid = Uuid::new_v4().to_string();
        format!(
            "{THUMBNAILS_DIR}/{user_id}/{}/{uuid}_thumb.jpg",
            Self::get_shard(&uuid)
        )
    }

    /// Write content to a relative path, creating parent directories.
    pub async fn write(&self, relative: &str, content: &[u8]) -> Result<()> {
        let path = self.full_path(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, content).await?;
        debug!(path = %relative, size = content.len(), "blob written");
        Ok(())
    }

    /// Read a stored blob.
    pub async fn read(&self, relative: &str) -> Result<Vec<u8>> {
        match fs::read(self.full_path(relative)).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(VaultError::NotFound(format!("blob {relative}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete a stored file.
    ///
    /// Returns `true` if the file was deleted, `false` if it didn't exist.
    pub async fn delete(&self, relative: &str) -> Result<bool> {
        match fs::remove_file(self.full_path(relative)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Best-effort delete; failures are logged and swallowed.
    pub async fn delete_quietly(&self, relative: &str) {
        if let Err(e) = self.delete(relative).await {
            warn!(path = %relative, error = %e, "failed to remove blob");
        }
    }

    /// Check if a file exists in storage.
    pub async fn exists(&self, relative: &str) -> bool {
        fs::try_exists(self.full_path(relative))
            .await
            .unwrap_or(false)
    }

    /// Get the size of a stored file.
    pub async fn file_size(&self, relative: &str) -> Result<u64> {
        match fs::metadata(self.full_path(relative)).await {
            Ok(m) => Ok(m.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(VaultError::NotFound(format!("blob {relative}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Relative temp directory of an upload session.
    pub fn temp_dir(upload_id: &str) -> String {
        format!("{TEMP_DIR}/{upload_id}")
    }

    /// Relative path of one chunk inside a temp directory.
    pub fn chunk_path(temp_dir: &str, index: i64) -> String {
        format!("{temp_dir}/chunk_{index}")
    }

    /// Create an empty temp directory for an upload session.
    pub async fn create_temp_dir(&self, upload_id: &str) -> Result<String> {
        let relative = Self::temp_dir(upload_id);
        fs::create_dir_all(self.full_path(&relative)).await?;
        Ok(relative)
    }

    /// Remove a directory tree. A missing directory is not an error.
    pub async fn remove_dir(&self, relative: &str) -> Result<()> {
        match fs::remove_dir_all(self.full_path(relative)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write one chunk. A failed write leaves no partial chunk behind.
    pub async fn write_chunk(&self, temp_dir: &str, index: i64, content: &[u8]) -> Result<()> {
        let relative = Self::chunk_path(temp_dir, index);
        if let Err(e) = self.write(&relative, content).await {
            self.delete_quietly(&relative).await;
            return Err(e);
        }
        Ok(())
    }

    /// Concatenate chunks `0..total_chunks` of `temp_dir` into `dest`,
    /// hashing while copying.
    ///
    /// On any failure the partially written destination is removed.
    pub async fn merge_chunks(
        &self,
        temp_dir: &str,
        total_chunks: i64,
        dest: &str,
    ) -> Result<MergedBlob> {
        match self.merge_chunks_inner(temp_dir, total_chunks, dest).await {
            Ok(merged) => Ok(merged),
            Err(e) => {
                self.delete_quietly(dest).await;
                Err(e)
            }
        }
    }

    async fn merge_chunks_inner(
        &self,
        temp_dir: &str,
        total_chunks: i64,
        dest: &str,
    ) -> Result<MergedBlob> {
        let dest_path = self.full_path(dest);
        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut out = BufWriter::new(fs::File::create(&dest_path).await?);
        let mut hasher = Sha256::new();
        let mut size: i64 = 0;
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];

        for index in 0..total_chunks {
            let chunk = Self::chunk_path(temp_dir, index);
            let mut input = match fs::File::open(self.full_path(&chunk)).await {
                Ok(f) => f,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(VaultError::Integrity(format!("chunk {index} is missing")));
                }
                Err(e) => return Err(e.into()),
            };

            loop {
                let n = input.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
                out.write_all(&buf[..n]).await?;
                size += n as i64;
            }
        }

        out.flush().await?;
        out.into_inner().sync_all().await?;

        Ok(MergedBlob {
            size,
            hash: hex::encode(hasher.finalize()),
        })
    }
}
