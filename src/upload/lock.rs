//! Per-session completion locks.
//!
//! Completing an upload merges chunks into a new blob; two concurrent
//! completions of the same session must not interleave. Locks are created
//! on demand and dropped from the map once nobody holds or waits on them.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap = DashMap<String, Arc<Mutex<()>>>;

/// Keyed async mutexes, one per upload session.
#[derive(Debug, Default)]
pub struct CompletionLocks {
    locks: Arc<LockMap>,
}

/// Held while a completion runs.
#[derive(Debug)]
pub struct CompletionGuard {
    upload_id: String,
    locks: Arc<LockMap>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl CompletionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive completion rights on `upload_id`.
    pub async fn acquire(&self, upload_id: &str) -> CompletionGuard {
        let mutex = self
            .locks
            .entry(upload_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        CompletionGuard {
            upload_id: upload_id.to_string(),
            locks: Arc::clone(&self.locks),
            guard: Some(guard),
        }
    }

    /// Number of sessions with a live lock.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        // release first so only the map's own Arc is left when unused
        self.guard.take();
        self.locks
            .remove_if(&self.upload_id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_lock_is_removed_after_release() {
        let locks = CompletionLocks::new();
        {
            let _guard = locks.acquire("s").await;
            assert_eq!(locks.len(), 1);
        }
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_same_session_is_serialized() {
        let locks = Arc::new(CompletionLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let locks = Arc::clone(&locks);
            let inside = Arc::clone(&inside);
            let max_seen = Arc::clone(&max_seen);
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire("same").await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_different_sessions_do_not_block() {
        let locks = CompletionLocks::new();
        let _a = locks.acquire("a").await;
        let _b = locks.acquire("b").await;
        assert_eq!(locks.len(), 2);
    }
}
