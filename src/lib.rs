//! filevault - personal file storage core
//!
//! Content-addressed blob storage with per-user deduplication, resumable
//! chunked uploads, hierarchical folders and a recycle bin, backed by a
//! SQLite catalog.

pub mod config;
pub mod db;
pub mod error;
pub mod file;
pub mod logging;
pub mod reaper;
pub mod recycle;
pub mod upload;
pub mod vault;

pub use config::Config;
pub use db::{Database, NewUser, StorageInfo, User, UserRepository};
pub use error::{Result, VaultError};
pub use file::{
    AccessInfo, BlobStore, FileEntry, FileObject, FileService, Folder, FolderService,
    ThumbnailGenerator,
};
pub use reaper::{start_reapers, RecycleBinReaper, UploadReaper};
pub use recycle::{RecycleBinItem, RecycleBinPage, RecycleBinService, RestoredItem};
pub use upload::{
    ChunkReceipt, InitOutcome, InitUpload, UploadProgress, UploadProgressStore, UploadService,
};
pub use vault::Vault;
