//! Upload progress tracking.
//!
//! Which chunk indices have landed is kept outside the catalog: chunk
//! acknowledgements and status polling are frequent and must not contend
//! with catalog transactions. Entries carry a sliding TTL refreshed on
//! every `add`.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::Result;

/// Ephemeral per-session set of uploaded chunk indices.
#[async_trait]
pub trait UploadProgressStore: Send + Sync {
    async fn is_member(&self, upload_id: &str, index: i64) -> Result<bool>;

    /// Record `index` and push the session's expiry `ttl` into the future.
    async fn add(&self, upload_id: &str, index: i64, ttl: Duration) -> Result<()>;

    async fn count(&self, upload_id: &str) -> Result<i64>;

    /// Uploaded indices in ascending order.
    async fn list_indices(&self, upload_id: &str) -> Result<Vec<i64>>;

    async fn clear(&self, upload_id: &str) -> Result<()>;

    /// Drop every expired session. Returns how many were removed.
    async fn purge_expired(&self) -> Result<usize>;
}

#[derive(Debug)]
struct ProgressEntry {
    indices: BTreeSet<i64>,
    expires_at: Instant,
}

impl ProgressEntry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// In-process progress store.
#[derive(Debug, Default)]
pub struct MemoryProgressStore {
    entries: DashMap<String, ProgressEntry>,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a live entry; expired ones read as empty.
    fn with_live<T>(&self, upload_id: &str, f: impl FnOnce(&ProgressEntry) -> T) -> Option<T> {
        self.entries.remove_if(upload_id, |_, entry| entry.is_expired());
        self.entries.get(upload_id).map(|entry| f(entry.value()))
    }
}

#[async_trait]
impl UploadProgressStore for MemoryProgressStore {
    async fn is_member(&self, upload_id: &str, index: i64) -> Result<bool> {
        Ok(self
            .with_live(upload_id, |e| e.indices.contains(&index))
            .unwrap_or(false))
    }

    async fn add(&self, upload_id: &str, index: i64, ttl: Duration) -> Result<()> {
        let expires_at = Instant::now() + ttl;
        let mut entry = self
            .entries
            .entry(upload_id.to_string())
            .or_insert_with(|| ProgressEntry {
                indices: BTreeSet::new(),
                expires_at,
            });
        if entry.is_expired() {
            entry.indices.clear();
        }
        entry.indices.insert(index);
        entry.expires_at = expires_at;
        Ok(())
    }

    async fn count(&self, upload_id: &str) -> Result<i64> {
        Ok(self
            .with_live(upload_id, |e| e.indices.len() as i64)
            .unwrap_or(0))
    }

    async fn list_indices(&self, upload_id: &str) -> Result<Vec<i64>> {
        Ok(self
            .with_live(upload_id, |e| e.indices.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn clear(&self, upload_id: &str) -> Result<()> {
        self.entries.remove(upload_id);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize> {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(removed, "expired upload progress entries purged");
        }
        Ok(removed)
    }
}
