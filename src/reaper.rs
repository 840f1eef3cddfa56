//! Background reapers.
//!
//! Two periodic sweeps keep the vault tidy: abandoned upload sessions are
//! removed together with their chunks, and recycle bin entries past their
//! retention are purged for good. A failure on one item is logged and the
//! sweep moves on to the next.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::recycle::RecycleBinRepository;
use crate::upload::{UploadProgressStore, UploadTask, UploadTaskRepository};
use crate::vault::Vault;
use crate::Result;

/// Removes upload sessions that expired without completing.
pub struct UploadReaper {
    vault: Arc<Vault>,
    check_interval: Duration,
}

impl UploadReaper {
    /// Create a reaper using `upload.cleanup_interval_secs`.
    pub fn new(vault: Arc<Vault>) -> Self {
        let secs = vault.config().upload.cleanup_interval_secs;
        Self::with_interval(vault, secs)
    }

    pub fn with_interval(vault: Arc<Vault>, interval_secs: u64) -> Self {
        Self {
            vault,
            check_interval: Duration::from_secs(interval_secs.max(1)),
        }
    }

    /// Run the sweep loop forever.
    pub async fn run(&self) {
        info!(
            interval_secs = self.check_interval.as_secs(),
            "upload reaper started"
        );

        let mut timer = interval(self.check_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            timer.tick().await;
            self.sweep().await;
        }
    }

    /// Sweep sessions expired as of now. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        self.sweep_at(Utc::now()).await
    }

    /// Sweep sessions whose expiry is before `now`.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        if let Err(e) = self.vault.progress().purge_expired().await {
            warn!(error = %e, "failed to purge expired upload progress");
        }

        let tasks = {
            let mut conn = match self.vault.db().acquire().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!(error = %e, "upload reaper could not get a connection");
                    return 0;
                }
            };
            match UploadTaskRepository::list_expired(&mut conn, now).await {
                Ok(tasks) => tasks,
                Err(e) => {
                    error!(error = %e, "failed to list expired upload tasks");
                    return 0;
                }
            }
        };

        if tasks.is_empty() {
            debug!("no expired upload tasks");
            return 0;
        }

        let mut removed = 0;
        for task in &tasks {
            match self.remove_task(task).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(upload_id = %task.upload_id, error = %e, "failed to remove expired upload")
                }
            }
        }
        info!(removed, candidates = tasks.len(), "expired uploads swept");
        removed
    }

    async fn remove_task(&self, task: &UploadTask) -> Result<bool> {
        // A completion in flight finishes first; the task is re-read after.
        let _guard = self.vault.locks().acquire(&task.upload_id).await;

        let mut conn = self.vault.db().acquire().await?;
        let Some(current) = UploadTaskRepository::get_by_upload_id(&mut conn, &task.upload_id).await?
        else {
            return Ok(false);
        };
        if current.is_completed() {
            return Ok(false);
        }

        if let Err(e) = self.vault.storage().remove_dir(&current.temp_dir).await {
            warn!(upload_id = %current.upload_id, error = %e, "failed to remove upload temp dir");
        }
        if let Err(e) = self.vault.progress().clear(&current.upload_id).await {
            warn!(upload_id = %current.upload_id, error = %e, "failed to clear upload progress");
        }
        let deleted = UploadTaskRepository::delete(&mut conn, current.id).await?;

        debug!(upload_id = %current.upload_id, user_id = current.user_id, "expired upload removed");
        Ok(deleted)
    }
}

/// Purges recycle bin entries past their retention.
pub struct RecycleBinReaper {
    vault: Arc<Vault>,
    check_interval: Duration,
}

impl RecycleBinReaper {
    /// Create a reaper using `recycle_bin.cleanup_interval_secs`.
    pub fn new(vault: Arc<Vault>) -> Self {
        let secs = vault.config().recycle_bin.cleanup_interval_secs;
        Self::with_interval(vault, secs)
    }

    pub fn with_interval(vault: Arc<Vault>, interval_secs: u64) -> Self {
        Self {
            vault,
            check_interval: Duration::from_secs(interval_secs.max(1)),
        }
    }

    /// Run the sweep loop forever.
    pub async fn run(&self) {
        info!(
            interval_secs = self.check_interval.as_secs(),
            "recycle bin reaper started"
        );

        let mut timer = interval(self.check_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            timer.tick().await;
            self.sweep().await;
        }
    }

    /// Purge entries expired as of now. Returns how many were purged.
    pub async fn sweep(&self) -> usize {
        self.sweep_at(Utc::now()).await
    }

    /// Purge entries whose expiry is before `now`.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let items = {
            let mut conn = match self.vault.db().acquire().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!(error = %e, "recycle bin reaper could not get a connection");
                    return 0;
                }
            };
            match RecycleBinRepository::list_expired(&mut conn, now).await {
                Ok(items) => items,
                Err(e) => {
                    error!(error = %e, "failed to list expired recycle bin items");
                    return 0;
                }
            }
        };

        if items.is_empty() {
            debug!("no expired recycle bin items");
            return 0;
        }

        let recycle_bin = self.vault.recycle_bin();
        let mut purged = 0;
        for item in &items {
            match recycle_bin.purge_item(item.id).await {
                Ok(true) => purged += 1,
                // Already gone, e.g. purged along with its folder.
                Ok(false) => {}
                Err(e) => error!(item_id = item.id, error = %e, "failed to purge recycle bin item"),
            }
        }
        info!(purged, candidates = items.len(), "expired recycle bin items purged");
        purged
    }
}

/// Spawn both reapers on the current runtime.
pub fn start_reapers(vault: Arc<Vault>) -> (JoinHandle<()>, JoinHandle<()>) {
    let uploads = UploadReaper::new(Arc::clone(&vault));
    let recycle_bin = RecycleBinReaper::new(vault);
    (
        tokio::spawn(async move { uploads.run().await }),
        tokio::spawn(async move { recycle_bin.run().await }),
    )
}
