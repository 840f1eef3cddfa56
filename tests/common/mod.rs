//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use tempfile::TempDir;

use filevault::db::UserRepository;
use filevault::file::BlobStore;
use filevault::{Config, Database, Vault};

/// A vault on a temporary blob directory and either an in-memory catalog
/// or a file-backed one.
pub struct TestVault {
    _dir: TempDir,
    pub vault: Arc<Vault>,
}

impl TestVault {
    pub async fn new() -> Self {
        Self::with_config(Config::default()).await
    }

    /// Small chunks keep chunked-upload tests fast.
    pub async fn with_chunk_size(chunk_size: i64) -> Self {
        let mut config = Config::default();
        config.storage.chunk_size = chunk_size;
        Self::with_config(config).await
    }

    pub async fn with_config(config: Config) -> Self {
        let dir = TempDir::new().unwrap();
        let db = Database::open_in_memory().await.unwrap();
        let storage = BlobStore::new(dir.path()).unwrap();
        Self {
            _dir: dir,
            vault: Arc::new(Vault::new(db, storage, config)),
        }
    }

    /// A vault whose catalog is a WAL database file with a full connection
    /// pool, so transactions really run side by side.
    pub async fn on_disk(config: Config) -> Self {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path().join("catalog").join("vault.db"))
            .await
            .unwrap();
        let storage = BlobStore::new(dir.path().join("blobs")).unwrap();
        Self {
            _dir: dir,
            vault: Arc::new(Vault::new(db, storage, config)),
        }
    }

    pub async fn on_disk_with_chunk_size(chunk_size: i64) -> Self {
        let mut config = Config::default();
        config.storage.chunk_size = chunk_size;
        Self::on_disk(config).await
    }

    pub async fn user(&self, username: &str) -> i64 {
        self.vault.create_user(username).await.unwrap().id
    }

    pub async fn storage_used(&self, user_id: i64) -> i64 {
        let mut conn = self.vault.db().acquire().await.unwrap();
        UserRepository::storage_info(&mut conn, user_id)
            .await
            .unwrap()
            .used
    }

    pub async fn count_rows(&self, table: &str) -> i64 {
        let mut conn = self.vault.db().acquire().await.unwrap();
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&mut *conn)
            .await
            .unwrap()
    }
}
