use super::*;

struct Fixture {
    _tmp: tempfile::TempDir,
    root: PathBuf,
    trash: TrashStore,
}

fn fixture() -> Fixture {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("uploads");
    std::fs::create_dir_all(&root).unwrap();
    let trash = TrashStore::new(root.clone(), tmp.path().join("trash"));
    Fixture { _tmp: tmp, root, trash }
}

#[tokio::test]
async fn put_writes_blob_and_sidecar() {
    let f = fixture();
    std::fs::create_dir_all(f.root.join("Portrait")).unwrap();
    let file = f.root.join("Portrait").join("b.jpg");
    std::fs::write(&file, b"bytes").unwrap();

    let entry = f.trash.put(&file).await.unwrap();
    assert!(!file.exists());
    assert_eq!(entry.trash_name, "b.jpg");
    assert_eq!(entry.original_path, "Portrait/b.jpg");
    assert!(!entry.is_dir);

    let blob = f.trash.root().join("b.jpg");
    assert_eq!(std::fs::read(&blob).unwrap(), b"bytes");
    let sidecar = f.trash.root().join(META_DIR).join("b.jpg.json");
    assert_eq!(f.trash.sidecar_path(&blob).unwrap(), sidecar);
    let sc: Sidecar = serde_json::from_slice(&std::fs::read(&sidecar).unwrap()).unwrap();
    assert_eq!(sc.original_dir, "Portrait");
    assert_eq!(sc.original_name, "b.jpg");
    assert_eq!(sc.id, entry.id);
}

#[tokio::test]
async fn same_basename_from_two_folders_is_disambiguated() {
    let f = fixture();
    for dir in ["A", "B"] {
        std::fs::create_dir_all(f.root.join(dir)).unwrap();
        std::fs::write(f.root.join(dir).join("x.jpg"), dir.as_bytes()).unwrap();
    }
    let a = f.trash.put(&f.root.join("A").join("x.jpg")).await.unwrap();
    let b = f.trash.put(&f.root.join("B").join("x.jpg")).await.unwrap();
    assert_eq!(a.trash_name, "x.jpg");
    assert_eq!(b.trash_name, "x__1.jpg");

    // restore by original location picks the right one regardless of blob name
    let (blob, sc) = f.trash.find_for_path("A/x.jpg").await.unwrap();
    assert_eq!(sc.id, a.id);
    assert_eq!(blob.file_name().unwrap(), "x.jpg");
    let (blob, sc) = f.trash.find_for_path("B/x.jpg").await.unwrap();
    assert_eq!(sc.id, b.id);
    assert_eq!(blob.file_name().unwrap(), "x__1.jpg");

    // unknown folder falls back to the exact blob name
    let (_, sc) = f.trash.find_for_path("C/x.jpg").await.unwrap();
    assert_eq!(sc.id, a.id);
}

#[tokio::test]
async fn lookup_failures() {
    let f = fixture();
    assert!(matches!(f.trash.find_for_path("P/none.jpg").await, Err(StoreError::NotInTrash(_))));

    std::fs::create_dir_all(f.trash.root()).unwrap();
    std::fs::write(f.trash.root().join("orphan.jpg"), b"o").unwrap();
    assert!(matches!(f.trash.find_for_path("P/orphan.jpg").await, Err(StoreError::MetadataMissing(_))));
    // orphans are not listed
    assert!(f.trash.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn take_back_recreates_folder_and_avoids_overwrite() {
    let f = fixture();
    std::fs::create_dir_all(f.root.join("Gone").join("Deep")).unwrap();
    let file = f.root.join("Gone").join("Deep").join("a.jpg");
    std::fs::write(&file, b"old").unwrap();
    f.trash.put(&file).await.unwrap();
    std::fs::remove_dir_all(f.root.join("Gone")).unwrap();

    let (blob, sc) = f.trash.find_for_path("Gone/Deep/a.jpg").await.unwrap();
    let dest = f.trash.take_back(&blob, &sc).await.unwrap();
    assert_eq!(dest, file);
    assert_eq!(std::fs::read(&file).unwrap(), b"old");
    assert!(!blob.exists());
    assert!(!f.trash.root().join(META_DIR).join("a.jpg.json").exists());

    // occupied slot: restore lands beside it
    f.trash.put(&file).await.unwrap();
    std::fs::write(&file, b"new").unwrap();
    let (blob, sc) = f.trash.find_for_path("Gone/Deep/a.jpg").await.unwrap();
    let dest = f.trash.take_back(&blob, &sc).await.unwrap();
    assert_eq!(dest.file_name().unwrap(), "a__1.jpg");
    assert_eq!(std::fs::read(&file).unwrap(), b"new");
    assert_eq!(std::fs::read(&dest).unwrap(), b"old");
}

#[tokio::test]
async fn tampered_sidecar_cannot_escape_root() {
    let f = fixture();
    std::fs::create_dir_all(f.trash.root().join(META_DIR)).unwrap();
    std::fs::create_dir_all(f.root.join("A")).unwrap();
    let blob = f.trash.root().join("evil.jpg");
    std::fs::write(&blob, b"e").unwrap();
    let tampered = [("../../outside", "evil.jpg"), ("A", ".."), ("", ".."), ("A", "x/../../../y"), ("A", ".")];
    for (dir, name) in tampered {
        let sc = Sidecar {
            id: Uuid::new_v4(),
            original_dir: dir.into(),
            original_name: name.into(),
            deleted_at: Utc::now(),
            is_dir: false,
        };
        let res = f.trash.take_back(&blob, &sc).await;
        assert!(
            matches!(res, Err(StoreError::PathEscape) | Err(StoreError::InvalidName(_))),
            "{dir:?}/{name:?} -> {res:?}"
        );
        assert!(blob.exists());
    }
    // nothing landed beside the storage root
    let beside: Vec<_> = std::fs::read_dir(f.root.parent().unwrap())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert!(beside.iter().all(|n| n == "uploads" || n == "trash"), "{beside:?}");
}

#[tokio::test]
async fn names_shaped_like_sidecars_are_ordinary_blobs() {
    let f = fixture();
    std::fs::write(f.root.join("x.meta.json"), b"USER DATA").unwrap();
    std::fs::write(f.root.join("x"), b"plain").unwrap();
    std::fs::write(f.root.join("x.json"), b"json").unwrap();
    let first = f.trash.put(&f.root.join("x.meta.json")).await.unwrap();
    f.trash.put(&f.root.join("x")).await.unwrap();
    f.trash.put(&f.root.join("x.json")).await.unwrap();

    let listed = f.trash.list().await.unwrap();
    assert_eq!(listed.len(), 3);
    assert_eq!(std::fs::read(f.trash.root().join("x.meta.json")).unwrap(), b"USER DATA");

    let (blob, sc) = f.trash.find_for_path("x.meta.json").await.unwrap();
    assert_eq!(sc.id, first.id);
    let dest = f.trash.take_back(&blob, &sc).await.unwrap();
    assert_eq!(std::fs::read(dest).unwrap(), b"USER DATA");
    let (blob, sc) = f.trash.find_for_path("x").await.unwrap();
    assert_eq!(std::fs::read(f.trash.take_back(&blob, &sc).await.unwrap()).unwrap(), b"plain");
}

#[tokio::test]
async fn leftover_sidecar_keeps_its_slot() {
    let f = fixture();
    let meta = f.trash.root().join(META_DIR);
    std::fs::create_dir_all(&meta).unwrap();
    std::fs::write(meta.join("y.jpg.json"), b"{}").unwrap();
    std::fs::write(f.root.join("y.jpg"), b"y").unwrap();

    let entry = f.trash.put(&f.root.join("y.jpg")).await.unwrap();
    assert_eq!(entry.trash_name, "y__1.jpg");
    assert_eq!(std::fs::read(meta.join("y.jpg.json")).unwrap(), b"{}");
    let (_, sc) = f.trash.find_by_id(entry.id).await.unwrap();
    assert_eq!(sc.original_name, "y.jpg");
}

#[tokio::test]
async fn trashed_file_named_like_the_sidecar_dir() {
    let f = fixture();
    std::fs::write(f.root.join(META_DIR), b"odd").unwrap();
    let entry = f.trash.put(&f.root.join(META_DIR)).await.unwrap();
    assert_eq!(entry.trash_name, format!("{META_DIR}__1"));
    assert_eq!(f.trash.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn folders_round_trip_and_purge() {
    let f = fixture();
    let dir = f.root.join("Session");
    std::fs::create_dir_all(dir.join("inner")).unwrap();
    std::fs::write(dir.join("inner").join("p.jpg"), b"p").unwrap();
    let entry = f.trash.put(&dir).await.unwrap();
    assert!(entry.is_dir);

    let listed = f.trash.list().await.unwrap();
    assert_eq!(listed.len(), 1);
    let (blob, sc) = f.trash.find_by_id(listed[0].id).await.unwrap();
    f.trash.take_back(&blob, &sc).await.unwrap();
    assert!(dir.join("inner").join("p.jpg").exists());

    f.trash.put(&dir).await.unwrap();
    std::fs::write(f.root.join("z.jpg"), b"z").unwrap();
    f.trash.put(&f.root.join("z.jpg")).await.unwrap();
    // two blobs, two sidecars
    assert_eq!(f.trash.purge_all().await.unwrap(), 4);
    let left: Vec<_> = std::fs::read_dir(f.trash.root()).unwrap().map(|e| e.unwrap().file_name()).collect();
    assert_eq!(left, vec![std::ffi::OsString::from(META_DIR)]);
    assert_eq!(std::fs::read_dir(f.trash.root().join(META_DIR)).unwrap().count(), 0);
    assert!(matches!(f.trash.find_by_id(entry.id).await, Err(StoreError::NotInTrash(_))));
}
