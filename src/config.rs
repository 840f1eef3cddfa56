//! Configuration module for filevault.
//!
//! Every section has serde defaults, so an empty file is a valid
//! configuration. The loaded [`Config`] is handed to each service
//! constructor; nothing reads it through a global.

use serde::Deserialize;
use std::path::Path;

use crate::{Result, VaultError};

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "data/filevault.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Blob storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root directory of the blob store.
    #[serde(default = "default_storage_path")]
    pub base_path: String,
    /// Maximum size of a single file in bytes.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: i64,
    /// Allowed extensions. Empty, or a single `"*"`, allows everything.
    #[serde(default)]
    pub allowed_extensions: Vec<String>,
    /// Chunk size for resumable uploads in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: i64,
    /// Quota assigned to newly created users in bytes.
    #[serde(default = "default_user_quota")]
    pub default_user_quota: i64,
}

fn default_storage_path() -> String {
    "data/storage".to_string()
}

fn default_max_file_size() -> i64 {
    1024 * 1024 * 1024 // 1GB
}

fn default_chunk_size() -> i64 {
    5 * 1024 * 1024 // 5MB
}

fn default_user_quota() -> i64 {
    10 * 1024 * 1024 * 1024 // 10GB
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_path: default_storage_path(),
            max_file_size: default_max_file_size(),
            allowed_extensions: Vec::new(),
            chunk_size: default_chunk_size(),
            default_user_quota: default_user_quota(),
        }
    }
}

impl StorageConfig {
    /// Check a file name against the extension allow-list.
    ///
    /// Entries are compared case-insensitively and may be written with or
    /// without the leading dot.
    pub fn allows_extension(&self, filename: &str) -> bool {
        if self.allowed_extensions.is_empty()
            || self.allowed_extensions.iter().any(|e| e.trim() == "*")
        {
            return true;
        }

        let ext = match Path::new(filename).extension().and_then(|e| e.to_str()) {
            Some(ext) => format!(".{}", ext.to_lowercase()),
            None => return false,
        };

        self.allowed_extensions.iter().any(|allowed| {
            let allowed = allowed.trim().to_lowercase();
            let allowed = if allowed.starts_with('.') {
                allowed
            } else {
                format!(".{allowed}")
            };
            allowed == ext
        })
    }
}

/// Resumable upload configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Hours an upload session stays valid after init.
    #[serde(default = "default_task_expiry_hours")]
    pub task_expiry_hours: i64,
    /// Sliding TTL of the chunk progress set in seconds.
    #[serde(default = "default_progress_ttl")]
    pub progress_ttl_secs: u64,
    /// Interval of the expired-upload sweep in seconds.
    #[serde(default = "default_upload_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

fn default_task_expiry_hours() -> i64 {
    24
}

fn default_progress_ttl() -> u64 {
    86400 // 24 hours
}

fn default_upload_cleanup_interval() -> u64 {
    3600 // 1 hour
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            task_expiry_hours: default_task_expiry_hours(),
            progress_ttl_secs: default_progress_ttl(),
            cleanup_interval_secs: default_upload_cleanup_interval(),
        }
    }
}

/// Thumbnail configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ThumbnailConfig {
    #[serde(default = "default_thumb_size")]
    pub width: u32,
    #[serde(default = "default_thumb_size")]
    pub height: u32,
    /// JPEG quality (1-100).
    #[serde(default = "default_thumb_quality")]
    pub quality: u8,
}

fn default_thumb_size() -> u32 {
    200
}

fn default_thumb_quality() -> u8 {
    80
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            width: default_thumb_size(),
            height: default_thumb_size(),
            quality: default_thumb_quality(),
        }
    }
}

/// Recycle bin configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RecycleBinConfig {
    /// Days a deleted item is kept before it is purged.
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    /// Interval of the expired-item sweep in seconds.
    #[serde(default = "default_recycle_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

fn default_retention_days() -> i64 {
    30
}

fn default_recycle_cleanup_interval() -> u64 {
    86400 // 24 hours
}

impl Default for RecycleBinConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            cleanup_interval_secs: default_recycle_cleanup_interval(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file. Empty disables file output.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/filevault.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub thumbnail: ThumbnailConfig,
    #[serde(default)]
    pub recycle_bin: RecycleBinConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(VaultError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| VaultError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `FILEVAULT_STORAGE_PATH`: blob store root
    /// - `FILEVAULT_DATABASE_PATH`: SQLite file
    /// - `FILEVAULT_LOG_LEVEL`: log level
    pub fn apply_env_overrides(&mut self) {
        let overrides: [(&str, &mut String); 3] = [
            ("FILEVAULT_STORAGE_PATH", &mut self.storage.base_path),
            ("FILEVAULT_DATABASE_PATH", &mut self.database.path),
            ("FILEVAULT_LOG_LEVEL", &mut self.logging.level),
        ];
        for (name, target) in overrides {
            if let Ok(value) = std::env::var(name) {
                if !value.is_empty() {
                    *target = value;
                }
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        let storage = &self.storage;
        if storage.chunk_size <= 0 {
            return Err(VaultError::Config("storage.chunk_size must be positive".into()));
        }
        if storage.max_file_size <= 0 {
            return Err(VaultError::Config(
                "storage.max_file_size must be positive".into(),
            ));
        }
        if storage.chunk_size > storage.max_file_size {
            return Err(VaultError::Config(
                "storage.chunk_size must not exceed storage.max_file_size".into(),
            ));
        }
        if storage.default_user_quota < 0 {
            return Err(VaultError::Config(
                "storage.default_user_quota must not be negative".into(),
            ));
        }
        if self.thumbnail.width == 0 || self.thumbnail.height == 0 {
            return Err(VaultError::Config(
                "thumbnail dimensions must be positive".into(),
            ));
        }
        if !(1..=100).contains(&self.thumbnail.quality) {
            return Err(VaultError::Config(
                "thumbnail.quality must be between 1 and 100".into(),
            ));
        }
        if self.upload.task_expiry_hours <= 0 || self.recycle_bin.retention_days <= 0 {
            return Err(VaultError::Config(
                "upload.task_expiry_hours and recycle_bin.retention_days must be positive".into(),
            ));
        }
        if self.upload.cleanup_interval_secs == 0 || self.recycle_bin.cleanup_interval_secs == 0 {
            return Err(VaultError::Config(
                "cleanup intervals must be positive".into(),
            ));
        }
        Ok(())
    }
}
