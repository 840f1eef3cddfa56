//! Resumable chunked uploads.
//!
//! A session is opened with the file's size and declared hash, receives
//! fixed-size chunks in any order and is completed by merging them into a
//! single blob. Sessions that never complete are removed by the upload
//! reaper once they expire.

mod lock;
mod progress;
mod service;
mod task;

pub use lock::{CompletionGuard, CompletionLocks};
pub use progress::{MemoryProgressStore, UploadProgressStore};
pub use service::{ChunkReceipt, InitOutcome, InitUpload, UploadProgress, UploadService};
pub use task::{chunk_count, NewUploadTask, UploadStatus, UploadTask, UploadTaskRepository};
