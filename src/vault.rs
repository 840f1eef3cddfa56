//! Shared context that wires the catalog, the blob store and the upload
//! coordination state together and hands out services.

use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::db::{Database, NewUser, User, UserRepository};
use crate::file::{
    BlobStore, FileService, FolderService, ImageThumbnailer, ObjectManager, ThumbnailGenerator,
};
use crate::recycle::RecycleBinService;
use crate::upload::{CompletionLocks, MemoryProgressStore, UploadProgressStore, UploadService};
use crate::Result;

/// A file vault instance.
///
/// Services borrow from the vault and are cheap to create per request.
pub struct Vault {
    db: Database,
    storage: BlobStore,
    config: Config,
    progress: Arc<dyn UploadProgressStore>,
    thumbnailer: Arc<dyn ThumbnailGenerator>,
    locks: CompletionLocks,
}

impl Vault {
    /// Assemble a vault from an open catalog and blob store, with the
    /// in-process progress store and the image thumbnailer.
    pub fn new(db: Database, storage: BlobStore, config: Config) -> Self {
        let thumbnailer = Arc::new(ImageThumbnailer::new(&config.thumbnail));
        Self {
            db,
            storage,
            config,
            progress: Arc::new(MemoryProgressStore::new()),
            thumbnailer,
            locks: CompletionLocks::new(),
        }
    }

    /// Open the catalog and blob store named by `config`.
    pub async fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let db = Database::open(&config.database.path).await?;
        let storage = BlobStore::new(&config.storage.base_path)?;
        info!(
            database = %config.database.path,
            storage = %config.storage.base_path,
            "vault opened"
        );
        Ok(Self::new(db, storage, config))
    }

    /// Replace the upload progress store.
    pub fn with_progress_store(mut self, progress: Arc<dyn UploadProgressStore>) -> Self {
        self.progress = progress;
        self
    }

    /// Replace the thumbnail generator.
    pub fn with_thumbnailer(mut self, thumbnailer: Arc<dyn ThumbnailGenerator>) -> Self {
        self.thumbnailer = thumbnailer;
        self
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn storage(&self) -> &BlobStore {
        &self.storage
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn progress(&self) -> &dyn UploadProgressStore {
        self.progress.as_ref()
    }

    pub fn locks(&self) -> &CompletionLocks {
        &self.locks
    }

    /// Register a user with the configured default quota.
    pub async fn create_user(&self, username: &str) -> Result<User> {
        let mut conn = self.db.acquire().await?;
        let user = UserRepository::create(
            &mut conn,
            &NewUser::new(username, self.config.storage.default_user_quota),
        )
        .await?;
        info!(user_id = user.id, username, "user created");
        Ok(user)
    }

    pub fn files(&self) -> FileService<'_> {
        FileService::new(&self.db, &self.storage, &self.config, self.thumbnailer.as_ref())
    }

    pub fn folders(&self) -> FolderService<'_> {
        FolderService::new(&self.db, &self.storage, &self.config.recycle_bin)
    }

    pub fn uploads(&self) -> UploadService<'_> {
        UploadService::new(
            &self.db,
            &self.storage,
            &self.config,
            self.thumbnailer.as_ref(),
            self.progress.as_ref(),
            &self.locks,
        )
    }

    pub fn recycle_bin(&self) -> RecycleBinService<'_> {
        RecycleBinService::new(&self.db, &self.storage, &self.config.recycle_bin)
    }

    pub fn objects(&self) -> ObjectManager<'_> {
        ObjectManager::new(&self.db, &self.storage)
    }
}
