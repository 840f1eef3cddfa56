//! Deduplication, folder tree and recycle bin behaviour through the public
//! vault API.

mod common;

use common::TestVault;
use filevault::recycle::RecycleItemType;
use filevault::{RestoredItem, VaultError};

async fn object_row(tv: &TestVault, object_id: i64) -> Option<(String, i64)> {
    let mut conn = tv.vault.db().acquire().await.unwrap();
    sqlx::query_as("SELECT file_path, ref_count FROM file_objects WHERE id = ?")
        .bind(object_id)
        .fetch_optional(&mut *conn)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_identical_content_shares_one_object() {
    let tv = TestVault::new().await;
    let alice = tv.user("alice").await;
    let files = tv.vault.files();

    let a = files.upload(alice, 0, "a.txt", b"hello").await.unwrap();
    let b = files.upload(alice, 0, "b.txt", b"hello").await.unwrap();
    assert_eq!(a.object_id, b.object_id);
    assert_ne!(a.stored_name, "");
    assert_eq!(tv.count_rows("file_objects").await, 1);
    assert_eq!(tv.storage_used(alice).await, 10);

    let (path, refs) = object_row(&tv, a.object_id).await.unwrap();
    assert_eq!(refs, 2);

    // soft delete keeps the charge
    let item_a = files.delete(alice, a.id).await.unwrap();
    assert_eq!(tv.storage_used(alice).await, 10);

    tv.vault
        .recycle_bin()
        .permanent_delete(alice, item_a.id)
        .await
        .unwrap();
    assert_eq!(tv.storage_used(alice).await, 5);
    assert_eq!(object_row(&tv, a.object_id).await.unwrap().1, 1);
    assert!(tv.vault.storage().exists(&path).await);

    let item_b = files.delete(alice, b.id).await.unwrap();
    tv.vault
        .recycle_bin()
        .permanent_delete(alice, item_b.id)
        .await
        .unwrap();
    assert_eq!(tv.storage_used(alice).await, 0);
    assert!(object_row(&tv, a.object_id).await.is_none());
    assert!(!tv.vault.storage().exists(&path).await);
}

#[tokio::test]
async fn test_deduplication_is_per_user() {
    let tv = TestVault::new().await;
    let alice = tv.user("alice").await;
    let bob = tv.user("bob").await;

    let a = tv.vault.files().upload(alice, 0, "x.bin", b"same").await.unwrap();
    let b = tv.vault.files().upload(bob, 0, "x.bin", b"same").await.unwrap();
    assert_ne!(a.object_id, b.object_id);
    assert_eq!(tv.count_rows("file_objects").await, 2);

    let err = tv.vault.files().get(bob, a.id).await.unwrap_err();
    assert!(matches!(err, VaultError::NotFound(_)));
}

#[tokio::test]
async fn test_download_reads_shared_blob() {
    let tv = TestVault::new().await;
    let alice = tv.user("alice").await;
    let file = tv
        .vault
        .files()
        .upload(alice, 0, "notes.txt", b"remember the milk")
        .await
        .unwrap();

    let info = tv.vault.files().download_info(alice, file.id).await.unwrap();
    assert_eq!(info.download_name, "notes.txt");
    assert_eq!(info.content_type, "text/plain");
    assert_eq!(std::fs::read(&info.abs_path).unwrap(), b"remember the milk");
}

#[tokio::test]
async fn test_rename_rewrites_descendant_paths_only() {
    let tv = TestVault::new().await;
    let alice = tv.user("alice").await;
    let folders = tv.vault.folders();

    let docs = folders.create(alice, 0, "docs").await.unwrap();
    let a = folders.create(alice, docs.id, "a").await.unwrap();
    let b = folders.create(alice, a.id, "b").await.unwrap();
    let docsx = folders.create(alice, 0, "docsx").await.unwrap();
    assert_eq!(b.path, "/docs/a/b");

    let renamed = folders.rename(alice, docs.id, "papers").await.unwrap();
    assert_eq!(renamed.path, "/papers");
    assert_eq!(folders.get(alice, a.id).await.unwrap().path, "/papers/a");
    assert_eq!(folders.get(alice, b.id).await.unwrap().path, "/papers/a/b");
    assert_eq!(folders.get(alice, docsx.id).await.unwrap().path, "/docsx");
}

#[tokio::test]
async fn test_folder_delete_is_case_sensitive() {
    let tv = TestVault::new().await;
    let alice = tv.user("alice").await;
    let folders = tv.vault.folders();

    let lower = folders.create(alice, 0, "docs").await.unwrap();
    let upper = folders.create(alice, 0, "Docs").await.unwrap();
    let keep = folders.create(alice, upper.id, "keep").await.unwrap();
    let k = tv
        .vault
        .files()
        .upload(alice, keep.id, "k.txt", b"keep")
        .await
        .unwrap();

    let item = folders.delete(alice, lower.id).await.unwrap();
    assert_eq!(folders.get(alice, keep.id).await.unwrap().path, "/Docs/keep");
    assert_eq!(tv.vault.files().list(alice, keep.id).await.unwrap().len(), 1);

    tv.vault
        .recycle_bin()
        .permanent_delete(alice, item.id)
        .await
        .unwrap();
    assert!(tv.vault.files().download_info(alice, k.id).await.is_ok());
    assert_eq!(tv.storage_used(alice).await, 4);
}

#[tokio::test]
async fn test_purging_reused_folder_name_spares_renamed_subtree() {
    let tv = TestVault::new().await;
    let alice = tv.user("alice").await;
    let folders = tv.vault.folders();
    let recycle_bin = tv.vault.recycle_bin();

    let docs = folders.create(alice, 0, "docs").await.unwrap();
    let old = folders.create(alice, docs.id, "old").await.unwrap();
    let g = tv
        .vault
        .files()
        .upload(alice, old.id, "g.txt", b"g")
        .await
        .unwrap();
    let old_item = folders.delete(alice, old.id).await.unwrap();
    folders.rename(alice, docs.id, "papers").await.unwrap();

    let reused = folders.create(alice, 0, "docs").await.unwrap();
    let reused_item = folders.delete(alice, reused.id).await.unwrap();
    recycle_bin.permanent_delete(alice, reused_item.id).await.unwrap();

    let RestoredItem::Folder(restored) = recycle_bin.restore(alice, old_item.id).await.unwrap()
    else {
        panic!("expected a folder");
    };
    assert_eq!(restored.path, "/papers/old");
    let listed = tv.vault.files().list(alice, old.id).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, g.id);
    assert_eq!(tv.storage_used(alice).await, 1);
}

#[tokio::test]
async fn test_move_into_own_subtree_is_rejected() {
    let tv = TestVault::new().await;
    let alice = tv.user("alice").await;
    let folders = tv.vault.folders();

    let top = folders.create(alice, 0, "top").await.unwrap();
    let child = folders.create(alice, top.id, "child").await.unwrap();

    let err = folders.move_to(alice, top.id, child.id).await.unwrap_err();
    assert!(matches!(err, VaultError::Conflict(_)));
    let err = folders.move_to(alice, top.id, top.id).await.unwrap_err();
    assert!(matches!(err, VaultError::Conflict(_)));

    let other = folders.create(alice, 0, "other").await.unwrap();
    let moved = folders.move_to(alice, top.id, other.id).await.unwrap();
    assert_eq!(moved.path, "/other/top");
    assert_eq!(
        folders.get(alice, child.id).await.unwrap().path,
        "/other/top/child"
    );
}

#[tokio::test]
async fn test_folder_delete_and_restore_with_collision() {
    let tv = TestVault::new().await;
    let alice = tv.user("alice").await;
    let folders = tv.vault.folders();

    let docs = folders.create(alice, 0, "docs").await.unwrap();
    let sub = folders.create(alice, docs.id, "sub").await.unwrap();
    let file = tv
        .vault
        .files()
        .upload(alice, sub.id, "deep.txt", b"deep")
        .await
        .unwrap();

    let item = folders.delete(alice, docs.id).await.unwrap();
    assert_eq!(item.item_type, RecycleItemType::Folder);
    assert!(folders.list(alice, 0).await.unwrap().is_empty());
    assert!(matches!(
        tv.vault.files().get(alice, file.id).await,
        Err(VaultError::NotFound(_))
    ));

    // a new folder takes the name meanwhile
    folders.create(alice, 0, "docs").await.unwrap();

    let restored = tv.vault.recycle_bin().restore(alice, item.id).await.unwrap();
    let RestoredItem::Folder(folder) = restored else {
        panic!("expected a folder");
    };
    assert_eq!(folder.name, "docs(restored)");
    assert_eq!(folder.path, "/docs(restored)");
    assert_eq!(
        folders.get(alice, sub.id).await.unwrap().path,
        "/docs(restored)/sub"
    );
    let back = tv.vault.files().get(alice, file.id).await.unwrap();
    assert_eq!(back.folder_id, sub.id);

    let page = tv.vault.recycle_bin().list(alice, 1, 20).await.unwrap();
    assert_eq!(page.total, 0);
}

#[tokio::test]
async fn test_restore_file_falls_back_to_root() {
    let tv = TestVault::new().await;
    let alice = tv.user("alice").await;
    let folders = tv.vault.folders();
    let recycle_bin = tv.vault.recycle_bin();

    let tmp = folders.create(alice, 0, "tmp").await.unwrap();
    let file = tv
        .vault
        .files()
        .upload(alice, tmp.id, "keep.txt", b"keep")
        .await
        .unwrap();

    let file_item = tv.vault.files().delete(alice, file.id).await.unwrap();
    folders.delete(alice, tmp.id).await.unwrap();

    let restored = recycle_bin.restore(alice, file_item.id).await.unwrap();
    let RestoredItem::File(entry) = restored else {
        panic!("expected a file");
    };
    let root = folders.root(alice).await.unwrap();
    assert_eq!(entry.folder_id, root.id);
    assert_eq!(entry.original_name, "keep.txt");
    assert_eq!(tv.storage_used(alice).await, 4);
}

#[tokio::test]
async fn test_empty_recycle_bin_releases_storage() {
    let tv = TestVault::new().await;
    let alice = tv.user("alice").await;
    let files = tv.vault.files();

    let ids = vec![
        files.upload(alice, 0, "1.txt", b"one").await.unwrap().id,
        files.upload(alice, 0, "2.txt", b"two!").await.unwrap().id,
    ];
    let items = files.batch_delete(alice, &ids).await.unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(tv.storage_used(alice).await, 7);

    let purged = tv.vault.recycle_bin().empty(alice).await.unwrap();
    assert_eq!(purged, 2);
    assert_eq!(tv.storage_used(alice).await, 0);
    assert_eq!(tv.count_rows("files").await, 0);
    assert_eq!(tv.count_rows("file_objects").await, 0);
}
