//! Read-cache decorator tests: coherency rules over a real engine.

use std::sync::Arc;

use tempfile::TempDir;

use kozane_core::{Error, KeyValueStore, ManualClock};
use kozane_storage::{CachedStore, FileStore};

fn cached_store(dir: &TempDir, start_nanos: i64) -> (CachedStore<FileStore>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start_nanos));
    let store = FileStore::new(dir.path()).with_clock(clock.clone());
    (CachedStore::new(store), clock)
}

#[tokio::test]
async fn get_populates_and_serves_from_cache() {
    let dir = TempDir::new().unwrap();
    let (store, _clock) = cached_store(&dir, 1000);

    store.set("test/cached", b"cached value").await.unwrap();

    let first = store.get("test/cached").await.unwrap();
    assert_eq!(&first[..], b"cached value");

    // Clobber the live file behind the decorator's back; the cached bytes
    // keep winning, which is exactly the documented (in)coherency.
    std::fs::write(dir.path().join("test/cached"), b"external edit").unwrap();
    let second = store.get("test/cached").await.unwrap();
    assert_eq!(&second[..], b"cached value");

    let stats = store.stats();
    assert!(stats.hits >= 1);
    assert_eq!(stats.entries, 1);
}

#[tokio::test]
async fn set_refreshes_the_cached_entry() {
    let dir = TempDir::new().unwrap();
    let (store, clock) = cached_store(&dir, 1000);

    store.set("k", b"v1").await.unwrap();
    assert_eq!(&store.get("k").await.unwrap()[..], b"v1");

    clock.set(2000);
    let version = store.set("k", b"v2").await.unwrap();
    assert!(version.is_some());
    assert_eq!(&store.get("k").await.unwrap()[..], b"v2");
}

#[tokio::test]
async fn noop_set_leaves_cache_intact() {
    let dir = TempDir::new().unwrap();
    let (store, clock) = cached_store(&dir, 1000);

    store.set("k", b"same").await.unwrap();
    store.get("k").await.unwrap();

    clock.set(2000);
    let version = store.set("k", b"same").await.unwrap();
    assert_eq!(version, None);
    assert_eq!(&store.get("k").await.unwrap()[..], b"same");

    // Still exactly one snapshot underneath.
    assert_eq!(store.get_histories("k").await.unwrap().len(), 1);
}

#[tokio::test]
async fn delete_evicts_the_entry() {
    let dir = TempDir::new().unwrap();
    let (store, _clock) = cached_store(&dir, 1000);

    store.set("k", b"v").await.unwrap();
    store.get("k").await.unwrap();

    store.delete("k", true).await.unwrap();
    let err = store.get("k").await.unwrap_err();
    assert!(matches!(err, Error::KeyNotFound { .. }), "got {err:?}");
}

#[tokio::test]
async fn exists_treats_cache_hit_as_present() {
    let dir = TempDir::new().unwrap();
    let (store, _clock) = cached_store(&dir, 1000);

    store.set("k", b"v").await.unwrap();
    assert!(store.exists("k").await.unwrap());

    // External deletion is invisible while the entry is cached.
    std::fs::remove_file(dir.path().join("k")).unwrap();
    assert!(store.exists("k").await.unwrap());

    // Dropping the cache restores delegation.
    store.clear();
    assert!(!store.exists("k").await.unwrap());

    assert!(!store.exists("never/written").await.unwrap());
}

#[tokio::test]
async fn history_operations_pass_through() {
    let dir = TempDir::new().unwrap();
    let (store, _clock) = cached_store(&dir, 0);

    store.set_with_timestamp("k", b"v1", 1000).await.unwrap();
    store.set_with_timestamp("k", b"v2", 2000).await.unwrap();

    let histories = store.get_histories("k").await.unwrap();
    assert_eq!(histories.len(), 2);

    let last = store.get_last_version("k").await.unwrap();
    assert_eq!(last.version, "2000");

    let prev = store.get_prev_version("k", "head").await.unwrap();
    assert_eq!(prev.version, "1000");

    let old = store.get_by_version("k", "1000").await.unwrap();
    assert_eq!(&old[..], b"v1");

    assert_eq!(store.list_keys("").await.unwrap(), vec!["k"]);
}
