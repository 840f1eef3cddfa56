//! User model for filevault.
//!
//! Users only carry what the storage core needs: identity and the
//! quota/usage pair consulted by uploads.

use chrono::{DateTime, Utc};

/// User entity.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    /// Quota in bytes.
    pub storage_quota: i64,
    /// Bytes charged to this user. Never negative.
    pub storage_used: i64,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Snapshot of the quota figures.
    pub fn storage_info(&self) -> StorageInfo {
        StorageInfo::new(self.storage_quota, self.storage_used)
    }
}

/// Data for creating a new user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub storage_quota: i64,
}

impl NewUser {
    /// Create a new user with the given quota in bytes.
    pub fn new(username: impl Into<String>, storage_quota: i64) -> Self {
        Self {
            username: username.into(),
            storage_quota,
        }
    }
}

/// Quota / usage summary for a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageInfo {
    pub quota: i64,
    pub used: i64,
    pub available: i64,
}

impl StorageInfo {
    pub fn new(quota: i64, used: i64) -> Self {
        Self {
            quota,
            used,
            available: (quota - used).max(0),
        }
    }

    /// Whether `required` more bytes fit in the remaining quota.
    pub fn has_room_for(&self, required: i64) -> bool {
        required <= self.available
    }
}
