//! Recycle bin.
//!
//! Deleted files and folders stay in the catalog as tombstones until they
//! are restored, purged by hand, or expire and get swept by the reaper.

mod item;
mod service;

pub use item::{
    FileSnapshot, FolderSnapshot, NewRecycleBinItem, RecycleBinItem, RecycleBinRepository,
    RecycleItemType,
};
pub use service::{
    RecycleBinPage, RecycleBinService, RestoredItem, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
};
