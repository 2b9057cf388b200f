use flywall::core::backups::BackupStore;
use tempfile::TempDir;

#[tokio::test]
async fn test_versions_are_monotonic_and_sorted() {
    let dir = TempDir::new().unwrap();
    let store = BackupStore::open(dir.path()).await.unwrap();

    let first = store.create("cfg-a", "first", false, 10).await.unwrap();
    let second = store.create("cfg-b", "second", false, 10).await.unwrap();
    assert!(second.version > first.version);

    let listed = store.list().await;
    let versions: Vec<u64> = listed.iter().map(|r| r.version).collect();
    let mut sorted = versions.clone();
    sorted.sort_unstable();
    assert_eq!(versions, sorted);
}

#[tokio::test]
async fn test_versions_never_reused_after_delete() {
    let dir = TempDir::new().unwrap();
    let store = BackupStore::open(dir.path()).await.unwrap();

    let first = store.create("cfg", "one", false, 10).await.unwrap();
    store.delete(first.version).await.unwrap();
    let second = store.create("cfg", "two", false, 10).await.unwrap();
    assert!(second.version > first.version);
}

#[tokio::test]
async fn test_retention_converges_to_max_backups() {
    let dir = TempDir::new().unwrap();
    let store = BackupStore::open(dir.path()).await.unwrap();

    for i in 0..8 {
        store
            .create("cfg", &format!("auto-{i}"), true, 3)
            .await
            .unwrap();
    }
    let listed = store.list().await;
    assert_eq!(listed.len(), 3);
    // Oldest were evicted first.
    assert!(listed.iter().all(|r| r.version > 5));
}

#[tokio::test]
async fn test_pinned_records_are_never_evicted() {
    let dir = TempDir::new().unwrap();
    let store = BackupStore::open(dir.path()).await.unwrap();

    let keeper = store.create("cfg", "keeper", false, 2).await.unwrap();
    store.set_pinned(keeper.version, true).await.unwrap();

    for i in 0..6 {
        store
            .create("cfg", &format!("auto-{i}"), true, 2)
            .await
            .unwrap();
    }

    let listed = store.list().await;
    assert!(listed.iter().any(|r| r.version == keeper.version));
    assert_eq!(listed.iter().filter(|r| !r.pinned).count(), 2);
}

#[tokio::test]
async fn test_read_returns_original_contents() {
    let dir = TempDir::new().unwrap();
    let store = BackupStore::open(dir.path()).await.unwrap();

    let record = store
        .create("schema_version = 2\n", "before-test", false, 10)
        .await
        .unwrap();
    assert_eq!(record.description, "before-test");
    let contents = store.read(record.version).await.unwrap();
    assert_eq!(contents, "schema_version = 2\n");
}

#[tokio::test]
async fn test_read_unknown_version_is_not_found() {
    let dir = TempDir::new().unwrap();
    let store = BackupStore::open(dir.path()).await.unwrap();
    let result = store.read(42).await;
    assert!(matches!(
        result,
        Err(flywall::core::errors::FlywallError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_index_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let version = {
        let store = BackupStore::open(dir.path()).await.unwrap();
        store.create("cfg", "persisted", false, 10).await.unwrap().version
    };

    let reopened = BackupStore::open(dir.path()).await.unwrap();
    let listed = reopened.list().await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].version, version);
    // The high-water mark survives too.
    let next = reopened.create("cfg", "later", false, 10).await.unwrap();
    assert!(next.version > version);
}
