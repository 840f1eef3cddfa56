//! Database schema and migrations for filevault.
//!
//! Migrations are applied sequentially when the database is first opened
//! or upgraded. Timestamps are RFC 3339 UTC text written by the application.

/// Database migrations.
///
/// Each migration is a SQL script that will be executed in order.
/// The schema_version table tracks which migrations have been applied.
pub const MIGRATIONS: &[&str] = &[
    // v1: Users with storage accounting
    r#"
CREATE TABLE users (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    username        TEXT NOT NULL UNIQUE,
    storage_quota   INTEGER NOT NULL,
    storage_used    INTEGER NOT NULL DEFAULT 0 CHECK (storage_used >= 0),
    created_at      TEXT NOT NULL
);
"#,
    // v2: Folder tree with materialized paths
    r#"
CREATE TABLE folders (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id     INTEGER NOT NULL REFERENCES users(id),
    parent_id   INTEGER REFERENCES folders(id),
    name        TEXT NOT NULL,
    path        TEXT NOT NULL,
    is_root     INTEGER NOT NULL DEFAULT 0,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    deleted_at  TEXT
);

-- at most one root per user, so concurrent lazy creation cannot duplicate it
CREATE UNIQUE INDEX idx_folders_user_root ON folders(user_id) WHERE is_root = 1;
CREATE INDEX idx_folders_parent ON folders(user_id, parent_id);
CREATE INDEX idx_folders_path ON folders(user_id, path);
"#,
    // v3: Deduplicated physical objects and the logical files pointing at them
    r#"
CREATE TABLE file_objects (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    file_path       TEXT NOT NULL UNIQUE,
    thumbnail_path  TEXT,
    file_size       INTEGER NOT NULL,
    mime_type       TEXT NOT NULL,
    is_image        INTEGER NOT NULL DEFAULT 0,
    width           INTEGER,
    height          INTEGER,
    content_hash    TEXT NOT NULL,
    ref_count       INTEGER NOT NULL DEFAULT 1 CHECK (ref_count >= 0),
    created_at      TEXT NOT NULL
);

CREATE INDEX idx_file_objects_hash ON file_objects(content_hash);

CREATE TABLE files (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id         INTEGER NOT NULL REFERENCES users(id),
    folder_id       INTEGER NOT NULL REFERENCES folders(id),
    object_id       INTEGER NOT NULL REFERENCES file_objects(id),
    stored_name     TEXT NOT NULL,
    original_name   TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    deleted_at      TEXT,
    deleted_by      INTEGER
);

CREATE INDEX idx_files_folder ON files(user_id, folder_id);
CREATE INDEX idx_files_object ON files(object_id);
"#,
    // v4: Resumable upload sessions
    r#"
CREATE TABLE upload_tasks (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    upload_id       TEXT NOT NULL UNIQUE,
    user_id         INTEGER NOT NULL REFERENCES users(id),
    folder_id       INTEGER NOT NULL,
    file_name       TEXT NOT NULL,
    file_size       INTEGER NOT NULL,
    file_hash       TEXT NOT NULL,
    chunk_size      INTEGER NOT NULL,
    total_chunks    INTEGER NOT NULL,
    status          TEXT NOT NULL DEFAULT 'uploading',  -- 'uploading', 'completed'
    temp_dir        TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    expires_at      TEXT NOT NULL
);

CREATE INDEX idx_upload_tasks_expiry ON upload_tasks(status, expires_at);
"#,
    // v5: Recycle bin
    r#"
CREATE TABLE recycle_bin (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id             INTEGER NOT NULL REFERENCES users(id),
    original_id         INTEGER NOT NULL,
    item_type           TEXT NOT NULL CHECK (item_type IN ('file', 'folder')),
    original_name       TEXT NOT NULL,
    original_path       TEXT NOT NULL,
    original_folder_id  INTEGER,
    file_size           INTEGER NOT NULL DEFAULT 0,
    file_object_id      INTEGER,
    metadata            TEXT NOT NULL DEFAULT '{}',
    deleted_at          TEXT NOT NULL,
    expires_at          TEXT NOT NULL
);

CREATE INDEX idx_recycle_bin_user ON recycle_bin(user_id, deleted_at);
CREATE INDEX idx_recycle_bin_original ON recycle_bin(item_type, original_id);
CREATE INDEX idx_recycle_bin_expiry ON recycle_bin(expires_at);
"#,
];
