//! File storage core.
//!
//! This module provides:
//! - Hierarchical folders with materialized paths
//! - Logical files pointing at deduplicated, ref-counted file objects
//! - Physical blob storage with generated, collision-free names
//! - Thumbnails for image uploads

mod dedup;
mod folder;
mod folder_service;
mod metadata;
mod object;
mod resolver;
mod service;
mod storage;
mod thumbnail;

pub use dedup::{FilePlacement, ObjectManager, PendingObject};
pub use folder::{Folder, FolderRepository, NewFolder, Visibility};
pub use folder_service::FolderService;
pub use metadata::{FileEntry, FileRepository, FileUpdate, NewFile};
pub use object::{FileObject, FileObjectRepository, NewFileObject};
pub use resolver::{child_path, FolderResolver, ROOT_ALIAS};
pub use service::{
    guess_mime_type, AccessInfo, FileService, ThumbnailStatus, THUMBNAIL_CONTENT_TYPE,
};
pub use storage::{content_hash, sanitize_filename, BlobLocation, BlobStore, MergedBlob};
pub use thumbnail::{inspect_image, ImageInfo, ImageThumbnailer, ThumbnailGenerator};

pub(crate) use folder::push_id_list;
pub(crate) use service::check_upload_limits;
