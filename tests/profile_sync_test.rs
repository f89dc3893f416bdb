//! End-to-end tests for the profile sync core
//!
//! Remote databases are stood in for by `MemoryStore`s whose failure mode can
//! be flipped mid-test; the local replica and retry queue use real sled
//! databases in temporary directories.

use std::sync::Arc;
use std::time::Duration;

use profile_sync::store::{BackingStore, FailureMode, LocalStore, MemoryStore, StoreId, StoreSet};
use profile_sync::sync::SyncQueue;
use profile_sync::{CacheConfig, ProfilePatch, ProfileRecord, ProfileStore, SyncError};
use tempfile::TempDir;

const STORE_TIMEOUT: Duration = Duration::from_millis(200);

struct Harness {
    store: ProfileStore,
    queue: Arc<SyncQueue>,
    primary: Arc<MemoryStore>,
    secondary: Arc<MemoryStore>,
    local: Arc<LocalStore>,
    _dir: TempDir,
}

fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let db = sled::open(dir.path().join("profiles.sled")).unwrap();

    let local = Arc::new(LocalStore::new(&db, 0).unwrap());
    let primary = Arc::new(MemoryStore::new(StoreId::Primary));
    let secondary = Arc::new(MemoryStore::new(StoreId::Secondary));
    let stores = StoreSet::new(
        vec![
            local.clone() as Arc<dyn BackingStore>,
            primary.clone() as Arc<dyn BackingStore>,
            secondary.clone() as Arc<dyn BackingStore>,
        ],
        STORE_TIMEOUT,
    )
    .unwrap();
    let queue = Arc::new(SyncQueue::new(&db, stores.clone(), 3).unwrap());
    let store = ProfileStore::new(stores, queue.clone(), CacheConfig::default());

    Harness {
        store,
        queue,
        primary,
        secondary,
        local,
        _dir: dir,
    }
}

fn record(user_id: &str, bio: &str, updated_at: u64) -> ProfileRecord {
    let mut record = ProfileRecord::new(user_id);
    record.bio = bio.to_string();
    record.updated_at = updated_at;
    record
}

/// Wait for detached repair tasks to land.
async fn settle<F: Fn() -> bool>(done: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !done() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_read_your_writes() {
    let h = harness();

    let ack = h
        .store
        .update("u1", ProfilePatch::default().display_name("Ada").bio("hello"))
        .await
        .unwrap();
    assert_eq!(ack.report.failed.len(), 0);
    assert_eq!(ack.report.succeeded.len(), 3);

    let read = h.store.get("u1").await.unwrap().unwrap();
    assert_eq!(read.display_name, "Ada");
    assert_eq!(read.bio, "hello");

    // Every replica holds the same record
    assert_eq!(h.primary.peek("u1").unwrap(), ack.record);
    assert_eq!(h.secondary.peek("u1").unwrap(), ack.record);
    assert_eq!(h.local.get_record("u1").await.unwrap().unwrap(), ack.record);
}

#[tokio::test]
async fn test_freshest_replica_wins_and_stale_stores_are_repaired() {
    let h = harness();
    h.primary.seed(record("u1", "old", 100));
    h.secondary.seed(record("u1", "new", 200));

    let read = h.store.get("u1").await.unwrap().unwrap();
    assert_eq!(read.bio, "new");
    assert_eq!(read.updated_at, 200);

    let primary = h.primary.clone();
    settle(|| primary.peek("u1").map(|r| r.updated_at) == Some(200)).await;
    assert_eq!(h.primary.peek("u1").unwrap().bio, "new");

    let local = h.local.clone();
    let mut repaired = None;
    for _ in 0..500 {
        repaired = local.get_record("u1").await.unwrap();
        if repaired.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(repaired.unwrap().bio, "new");
}

#[tokio::test]
async fn test_partial_failure_queues_then_drains() {
    let h = harness();
    h.store
        .update("u1", ProfilePatch::default().display_name("Ada"))
        .await
        .unwrap();
    h.secondary.set_mode(FailureMode::Failing);

    let ack = h
        .store
        .update("u1", ProfilePatch::default().bio("offline for one store"))
        .await
        .unwrap();
    assert!(ack.report.failed.contains(&StoreId::Secondary));
    assert!(ack.report.succeeded.contains(&StoreId::Primary));
    assert_eq!(h.queue.len(), 1);
    assert!(h.queue.get(StoreId::Secondary, "u1").unwrap().is_some());

    h.secondary.set_mode(FailureMode::Healthy);
    let report = h.queue.drain().await.unwrap();
    assert_eq!(report.applied, vec![(StoreId::Secondary, "u1".to_string())]);
    assert!(h.queue.is_empty());
    assert_eq!(h.secondary.peek("u1").unwrap(), ack.record);
}

#[tokio::test]
async fn test_direct_write_makes_older_queued_write_obsolete() {
    let h = harness();
    h.store
        .update("u1", ProfilePatch::default().display_name("Ada"))
        .await
        .unwrap();

    h.primary.set_mode(FailureMode::Failing);
    h.store
        .update("u1", ProfilePatch::default().bio("old"))
        .await
        .unwrap();
    assert!(h.queue.get(StoreId::Primary, "u1").unwrap().is_some());

    h.primary.set_mode(FailureMode::Healthy);
    let ack = h
        .store
        .update("u1", ProfilePatch::default().bio("new"))
        .await
        .unwrap();
    assert!(ack.report.failed.is_empty());
    assert!(h.queue.is_empty());

    let report = h.queue.drain().await.unwrap();
    assert_eq!(report.attempted(), 0);
    assert_eq!(h.primary.peek("u1").unwrap(), ack.record);
}

#[tokio::test]
async fn test_update_with_unreachable_holder_never_blanks_profile() {
    let h = harness();
    let mut existing = record("u1", "", 5);
    existing.display_name = "Alice".into();
    existing.username = "alice".into();
    existing.followers.insert("u2".into());
    h.primary.seed(existing.clone());
    h.primary.set_mode(FailureMode::Hanging);

    let err = h
        .store
        .update("u1", ProfilePatch::default().bio("x"))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::BaseUnavailable { .. }));
    assert!(h.queue.is_empty());
    assert!(h.local.get_record("u1").await.unwrap().is_none());
    assert!(h.secondary.peek("u1").is_none());

    h.primary.set_mode(FailureMode::Healthy);
    h.queue.drain().await.unwrap();
    assert_eq!(h.primary.peek("u1").unwrap(), existing);

    // Once the real copy is readable the edit merges into it
    let ack = h
        .store
        .update("u1", ProfilePatch::default().bio("x"))
        .await
        .unwrap();
    assert_eq!(ack.record.display_name, "Alice");
    assert_eq!(ack.record.username, "alice");
    assert!(ack.record.followers.contains("u2"));
    assert_eq!(ack.record.bio, "x");
}

#[tokio::test]
async fn test_total_failure_surfaces_but_cache_keeps_edit() {
    let dir = TempDir::new().unwrap();
    let db = sled::open(dir.path().join("profiles.sled")).unwrap();
    let primary = Arc::new(MemoryStore::new(StoreId::Primary));
    let secondary = Arc::new(MemoryStore::new(StoreId::Secondary));
    let stores = StoreSet::new(
        vec![
            primary.clone() as Arc<dyn BackingStore>,
            secondary.clone() as Arc<dyn BackingStore>,
        ],
        STORE_TIMEOUT,
    )
    .unwrap();
    let queue = Arc::new(SyncQueue::new(&db, stores.clone(), 3).unwrap());
    let store = ProfileStore::new(stores, queue.clone(), CacheConfig::default());

    store
        .update("u1", ProfilePatch::default().display_name("Ada"))
        .await
        .unwrap();
    primary.set_mode(FailureMode::Failing);
    secondary.set_mode(FailureMode::Failing);

    let err = store
        .update("u1", ProfilePatch::default().bio("nowhere to go"))
        .await
        .unwrap_err();
    match err {
        SyncError::AllStoresFailed { failed } => assert_eq!(failed.len(), 2),
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(store.get("u1").await.unwrap().unwrap().bio, "nowhere to go");
    assert_eq!(queue.len(), 2);
}

#[tokio::test]
async fn test_hanging_store_times_out_without_blocking_siblings() {
    let h = harness();
    h.store
        .update("u1", ProfilePatch::default().display_name("Ada"))
        .await
        .unwrap();
    h.secondary.set_mode(FailureMode::Hanging);

    let started = tokio::time::Instant::now();
    let ack = h
        .store
        .update("u1", ProfilePatch::default().bio("still fast"))
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(ack.report.failed.iter().copied().collect::<Vec<_>>(), vec![StoreId::Secondary]);
    assert_eq!(h.primary.peek("u1").unwrap().bio, "still fast");
}

#[tokio::test]
async fn test_queue_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("profiles.sled");

    {
        let db = sled::open(&path).unwrap();
        let primary = Arc::new(MemoryStore::new(StoreId::Primary));
        let secondary = Arc::new(MemoryStore::new(StoreId::Secondary));
        let stores = StoreSet::new(
            vec![
                primary as Arc<dyn BackingStore>,
                secondary.clone() as Arc<dyn BackingStore>,
            ],
            STORE_TIMEOUT,
        )
        .unwrap();
        let queue = Arc::new(SyncQueue::new(&db, stores.clone(), 3).unwrap());
        let store = ProfileStore::new(stores, queue.clone(), CacheConfig::default());
        store
            .update("u1", ProfilePatch::default().display_name("Ada"))
            .await
            .unwrap();
        secondary.set_mode(FailureMode::Failing);
        store
            .update("u1", ProfilePatch::default().bio("persist me"))
            .await
            .unwrap();
        queue.flush().await.unwrap();
    }

    let db = sled::open(&path).unwrap();
    let secondary = Arc::new(MemoryStore::new(StoreId::Secondary));
    let stores = StoreSet::new(
        vec![secondary.clone() as Arc<dyn BackingStore>],
        STORE_TIMEOUT,
    )
    .unwrap();
    let queue = SyncQueue::new(&db, stores, 3).unwrap();

    let entries = queue.entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].store, StoreId::Secondary);
    assert_eq!(entries[0].record.bio, "persist me");

    queue.drain().await.unwrap();
    assert!(queue.is_empty());
    assert_eq!(secondary.peek("u1").unwrap().bio, "persist me");
}

#[tokio::test]
async fn test_concurrent_drain_is_single_flight() {
    let h = harness();
    h.store
        .update("u1", ProfilePatch::default().display_name("Ada"))
        .await
        .unwrap();
    h.secondary.set_mode(FailureMode::Hanging);
    h.store
        .update("u1", ProfilePatch::default().bio("slow"))
        .await
        .unwrap();
    assert_eq!(h.queue.len(), 1);

    let (first, second) = tokio::join!(h.queue.drain(), h.queue.drain());
    let (first, second) = (first.unwrap(), second.unwrap());
    assert!(first.skipped != second.skipped);
    assert_eq!(first.attempted() + second.attempted(), 1);

    let entry = h.queue.get(StoreId::Secondary, "u1").unwrap().unwrap();
    assert_eq!(entry.attempts, 1);
}

#[tokio::test]
async fn test_newer_queued_write_supersedes_older() {
    let h = harness();
    h.store
        .update("u1", ProfilePatch::default().display_name("Ada"))
        .await
        .unwrap();
    h.secondary.set_mode(FailureMode::Failing);

    h.store
        .update("u1", ProfilePatch::default().bio("first"))
        .await
        .unwrap();
    h.store
        .update("u1", ProfilePatch::default().bio("second"))
        .await
        .unwrap();

    assert_eq!(h.queue.len(), 1);
    let entry = h.queue.get(StoreId::Secondary, "u1").unwrap().unwrap();
    assert_eq!(entry.record.bio, "second");
}

#[tokio::test]
async fn test_username_conflicts_are_rejected() {
    let h = harness();
    h.store
        .update("u1", ProfilePatch::default().username("alice"))
        .await
        .unwrap();

    let err = h
        .store
        .update("u2", ProfilePatch::default().username("Alice"))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::UsernameTaken(ref name) if name == "alice"));

    let found = h.store.find_by_username("ALICE").await.unwrap().unwrap();
    assert_eq!(found.user_id, "u1");

    // Re-saving your own username is fine
    h.store
        .update("u1", ProfilePatch::default().username("alice").bio("me"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_invalid_patch_touches_nothing() {
    let h = harness();
    let err = h
        .store
        .update("u1", ProfilePatch::default().bio("x".repeat(501)))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));
    assert!(h.primary.peek("u1").is_none());
    assert!(h.queue.is_empty());
}

#[tokio::test]
async fn test_delete_is_unsupported() {
    let h = harness();
    assert!(matches!(
        h.store.delete("u1").await,
        Err(SyncError::Unsupported(_))
    ));
}
